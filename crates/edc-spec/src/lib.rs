#![allow(missing_docs)]

pub mod calculate;
pub mod expr;
pub mod ident;
pub mod pattern;
pub mod spec;
pub mod structure;
pub mod validate;

pub use calculate::calculation_order;
pub use expr::{Expression, ExpressionCache, ExpressionError, Scalar, evaluate, evaluate_boolean};
pub use pattern::{CompiledPattern, PatternError, check_pattern};
pub use spec::{Field, FieldKind, FieldOption, FormSchema, Page, Requirement, Section, ValidationRules};
pub use structure::{StructuralError, check_structure};
pub use validate::{FieldError, FieldState, FormState, ValidationOutcome, Validator, compile};

/// JSON Schema describing the form schema document.
pub fn schema_document() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(FormSchema)).unwrap_or(serde_json::Value::Null)
}
