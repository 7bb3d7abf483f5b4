pub mod field;
pub mod form;
pub mod section;

pub use field::{
    CalculatedAttrs, ChoiceAttrs, Field, FieldKind, FieldOption, FileAttrs, MatrixAttrs,
    NumericAttrs, Requirement, ValidationRules,
};
pub use form::{FieldRef, FormSchema, Page};
pub use section::{REPEAT_INDEX_PLACEHOLDER, Section};
