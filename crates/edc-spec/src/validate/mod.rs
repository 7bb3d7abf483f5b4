//! Compiles a [`FormSchema`] into a reusable payload validator.
//!
//! The same compiled [`Validator`] backs client-side feedback and the
//! authoritative server-side check that runs before a response leaves draft.

mod field;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::calculate::calculation_order;
use crate::expr::{Bindings, Expression, ItemScope};
use crate::spec::FormSchema;
use crate::structure::{StructuralError, check_structure};
use field::CompiledField;

/// One offending field in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub field_id: String,
    /// Dotted location, e.g. `age` or `medications.1.dose`.
    pub path: String,
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ValidationOutcome {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Visibility and required-ness of one field instance at fill time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldState {
    pub visible: bool,
    pub required: bool,
}

/// Fill-time view of the form for a given payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormState {
    pub pages: BTreeMap<String, bool>,
    pub sections: BTreeMap<String, bool>,
    /// Keyed by the same dotted path used in [`FieldError::path`].
    pub fields: BTreeMap<String, FieldState>,
}

struct RepeatBounds {
    min: usize,
    max: Option<usize>,
}

struct CompiledSection {
    id: String,
    visible_if: Option<Expression>,
    repeat: Option<RepeatBounds>,
    fields: Vec<CompiledField>,
}

struct CompiledPage {
    id: String,
    visible_if: Option<Expression>,
    sections: Vec<CompiledSection>,
}

/// Compiled validation contract for one schema version.
pub struct Validator {
    pages: Vec<CompiledPage>,
    calculations: Vec<String>,
}

fn visible(expr: &Option<Expression>, scope: &dyn Bindings) -> bool {
    expr.as_ref().is_none_or(|expr| expr.truthy(scope))
}

/// Checks `schema` and compiles it. Structural violations are returned, never raised.
pub fn compile(schema: &FormSchema) -> Result<Validator, Vec<StructuralError>> {
    let errors = check_structure(schema);
    if !errors.is_empty() {
        debug!(count = errors.len(), "schema failed structural checks");
        return Err(errors);
    }
    // Cycles are already reported by `check_structure`.
    let calculations = calculation_order(schema).unwrap_or_default();

    let compile_expr = |source: &Option<String>| {
        source
            .as_deref()
            .and_then(|source| Expression::compile(source).ok())
    };
    let pages = schema
        .pages
        .iter()
        .map(|page| CompiledPage {
            id: page.id.clone(),
            visible_if: compile_expr(&page.visible_if),
            sections: page
                .sections
                .iter()
                .map(|section| CompiledSection {
                    id: section.id.clone(),
                    visible_if: compile_expr(&section.visible_if),
                    repeat: section.repeatable.then(|| RepeatBounds {
                        min: section.min_instances(),
                        max: section.max_repeat,
                    }),
                    fields: section.fields.iter().filter_map(CompiledField::compile).collect(),
                })
                .collect(),
        })
        .collect();

    Ok(Validator {
        pages,
        calculations,
    })
}

impl Validator {
    fn visible_sections<'a>(
        &'a self,
        payload: &'a Value,
    ) -> impl Iterator<Item = &'a CompiledSection> + 'a {
        self.pages
            .iter()
            .filter(move |page| visible(&page.visible_if, payload))
            .flat_map(|page| page.sections.iter())
            .filter(move |section| visible(&section.visible_if, payload))
    }

    /// Validates a full payload. Hidden pages, sections, and fields are skipped.
    pub fn validate(&self, payload: &Value) -> ValidationOutcome {
        let mut errors = Vec::new();

        for section in self.visible_sections(payload) {
            let Some(bounds) = &section.repeat else {
                for field in &section.fields {
                    if !field.is_visible(payload) {
                        continue;
                    }
                    if let Some(error) = field.check(payload.lookup(&field.id), payload, &field.id)
                    {
                        errors.push(error);
                    }
                }
                continue;
            };

            let items = match payload.lookup(&section.id) {
                None | Some(Value::Null) => &[][..],
                Some(Value::Array(items)) => items.as_slice(),
                Some(_) => {
                    errors.push(section_error(section, "Expected a list of entries", "type_mismatch"));
                    continue;
                }
            };
            if items.len() < bounds.min {
                let noun = if bounds.min == 1 { "entry" } else { "entries" };
                errors.push(section_error(
                    section,
                    format!("At least {} {noun} required", bounds.min),
                    "min_items",
                ));
            }
            if let Some(max) = bounds.max
                && items.len() > max
            {
                let noun = if max == 1 { "entry" } else { "entries" };
                errors.push(section_error(
                    section,
                    format!("At most {max} {noun} allowed"),
                    "max_items",
                ));
            }

            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{}.{index}", section.id);
                if !item.is_object() {
                    errors.push(FieldError {
                        field_id: section.id.clone(),
                        path: item_path,
                        message: "Expected an object".into(),
                        code: "type_mismatch".into(),
                    });
                    continue;
                }
                let scope = ItemScope {
                    item,
                    root: payload,
                };
                for field in &section.fields {
                    if !field.is_visible(&scope) {
                        continue;
                    }
                    let path = format!("{item_path}.{}", field.id);
                    if let Some(error) = field.check(item.lookup(&field.id), &scope, &path) {
                        errors.push(error);
                    }
                }
            }
        }

        ValidationOutcome::from_errors(errors)
    }

    /// Visibility and required-ness for every page, section, and field instance.
    pub fn form_state(&self, payload: &Value) -> FormState {
        let mut state = FormState::default();
        for page in &self.pages {
            let page_visible = visible(&page.visible_if, payload);
            state.pages.insert(page.id.clone(), page_visible);
            for section in &page.sections {
                let section_visible = page_visible && visible(&section.visible_if, payload);
                state.sections.insert(section.id.clone(), section_visible);

                if section.repeat.is_none() {
                    for field in &section.fields {
                        let shown = section_visible && field.is_visible(payload);
                        state.fields.insert(
                            field.id.clone(),
                            FieldState {
                                visible: shown,
                                required: shown && field.required.applies(payload),
                            },
                        );
                    }
                    continue;
                }

                let items = payload
                    .lookup(&section.id)
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for (index, item) in items.iter().enumerate() {
                    let scope = ItemScope {
                        item,
                        root: payload,
                    };
                    for field in &section.fields {
                        let shown = section_visible && field.is_visible(&scope);
                        state.fields.insert(
                            format!("{}.{index}.{}", section.id, field.id),
                            FieldState {
                                visible: shown,
                                required: shown && field.required.applies(&scope),
                            },
                        );
                    }
                }
            }
        }
        state
    }

    /// Recomputes every calculated field in dependency order, in place.
    ///
    /// Calculated fields inside repeatable sections are computed per item.
    /// A calculation that fails to evaluate stores `null`.
    pub fn apply_calculations(&self, payload: &mut Value) {
        if !payload.is_object() {
            *payload = Value::Object(Map::new());
        }
        for id in &self.calculations {
            let Some((section, field)) = self.locate(id) else {
                continue;
            };
            let Some(expr) = &field.calculation else {
                continue;
            };

            if section.repeat.is_none() {
                let value = expr
                    .scalar(&*payload)
                    .map_or(Value::Null, |scalar| scalar.to_json());
                if let Some(map) = payload.as_object_mut() {
                    map.insert(field.id.clone(), value);
                }
                continue;
            }

            let count = payload
                .lookup(&section.id)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            for index in 0..count {
                let value = {
                    let root = &*payload;
                    let Some(item) = root
                        .get(&section.id)
                        .and_then(|items| items.get(index))
                        .filter(|item| item.is_object())
                    else {
                        continue;
                    };
                    let scope = ItemScope { item, root };
                    expr.scalar(&scope).map_or(Value::Null, |scalar| scalar.to_json())
                };
                if let Some(item) = payload
                    .get_mut(&section.id)
                    .and_then(|items| items.get_mut(index))
                    .and_then(Value::as_object_mut)
                {
                    item.insert(field.id.clone(), value);
                }
            }
        }
    }

    /// Payload seeded with declared defaults and `minRepeat` empty entries.
    pub fn initial_payload(&self) -> Value {
        let mut payload = Map::new();
        for section in self.pages.iter().flat_map(|page| page.sections.iter()) {
            let defaults: Map<String, Value> = section
                .fields
                .iter()
                .filter_map(|field| Some((field.id.clone(), field.default_value.clone()?)))
                .collect();
            match &section.repeat {
                None => payload.extend(defaults),
                Some(bounds) => {
                    let items = (0..bounds.min)
                        .map(|_| Value::Object(defaults.clone()))
                        .collect();
                    payload.insert(section.id.clone(), Value::Array(items));
                }
            }
        }
        Value::Object(payload)
    }

    fn locate(&self, field_id: &str) -> Option<(&CompiledSection, &CompiledField)> {
        self.pages
            .iter()
            .flat_map(|page| page.sections.iter())
            .find_map(|section| {
                section
                    .fields
                    .iter()
                    .find(|field| field.id == field_id)
                    .map(|field| (section, field))
            })
    }
}

fn section_error(section: &CompiledSection, message: impl Into<String>, code: &str) -> FieldError {
    FieldError {
        field_id: section.id.clone(),
        path: section.id.clone(),
        message: message.into(),
        code: code.to_string(),
    }
}
