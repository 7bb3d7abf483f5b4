use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calculate::calculation_order;
use crate::expr;
use crate::ident::{ID_PATTERN, is_valid_id};
use crate::pattern::check_pattern;
use crate::spec::{Field, FieldKind, FieldOption, FormSchema, REPEAT_INDEX_PLACEHOLDER, Section};

/// Schema authoring violation, reported to the form author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{path}: {message}")]
pub struct StructuralError {
    pub path: String,
    pub message: String,
}

/// Checks every structural invariant of `schema` and returns all violations.
pub fn check_structure(schema: &FormSchema) -> Vec<StructuralError> {
    let mut checker = Checker {
        errors: Vec::new(),
        known: schema
            .pages
            .iter()
            .flat_map(|page| page.sections.iter())
            .flat_map(|section| {
                std::iter::once(section.id.clone())
                    .chain(section.fields.iter().map(|field| field.id.clone()))
            })
            .collect(),
        seen: HashSet::new(),
    };

    if schema.pages.is_empty() {
        checker.push("pages", "form must contain at least one page");
    }

    for (page_index, page) in schema.pages.iter().enumerate() {
        let page_path = format!("pages[{page_index}]");
        checker.identifier(&page_path, &page.id);
        if let Some(source) = &page.visible_if {
            checker.expression(&format!("{page_path}.visibleIf"), source);
        }
        for (section_index, section) in page.sections.iter().enumerate() {
            let section_path = format!("{page_path}.sections[{section_index}]");
            checker.section(&section_path, section);
            for (field_index, field) in section.fields.iter().enumerate() {
                checker.field(&format!("{section_path}.fields[{field_index}]"), field);
            }
        }
    }

    if let Err(cycle) = calculation_order(schema) {
        checker.push(
            "pages",
            format!("calculated fields depend on each other in a cycle: {}", cycle.join(" -> ")),
        );
    }

    checker.errors
}

struct Checker {
    errors: Vec<StructuralError>,
    known: BTreeSet<String>,
    seen: HashSet<String>,
}

impl Checker {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(StructuralError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn identifier(&mut self, path: &str, id: &str) {
        if !is_valid_id(id) {
            self.push(format!("{path}.id"), format!("id '{id}' must match {ID_PATTERN}"));
        }
        if !self.seen.insert(id.to_string()) {
            self.push(format!("{path}.id"), format!("duplicate id '{id}'"));
        }
    }

    fn expression(&mut self, path: &str, source: &str) {
        match expr::check(source) {
            Ok(mut fields) => {
                fields.retain(|name| !self.known.contains(name));
                for unknown in fields {
                    self.push(path, format!("expression references unknown field '{unknown}'"));
                }
            }
            Err(err) => self.push(path, err.to_string()),
        }
    }

    fn section(&mut self, path: &str, section: &Section) {
        self.identifier(path, &section.id);
        if let Some(source) = &section.visible_if {
            self.expression(&format!("{path}.visibleIf"), source);
        }
        if section.repeatable {
            if let (Some(min), Some(max)) = (section.min_repeat, section.max_repeat)
                && min > max
            {
                self.push(
                    format!("{path}.minRepeat"),
                    format!("minRepeat ({min}) exceeds maxRepeat ({max})"),
                );
            }
            if section.max_repeat == Some(0) {
                self.push(format!("{path}.maxRepeat"), "maxRepeat must be at least 1");
            }
            if let Some(label) = &section.repeat_label
                && !label.contains(REPEAT_INDEX_PLACEHOLDER)
            {
                self.push(
                    format!("{path}.repeatLabel"),
                    format!("repeat label must contain {REPEAT_INDEX_PLACEHOLDER}"),
                );
            }
        } else if section.min_repeat.is_some()
            || section.max_repeat.is_some()
            || section.repeat_label.is_some()
        {
            self.push(
                path,
                "repeat settings are only allowed on repeatable sections",
            );
        }
    }

    fn options(&mut self, path: &str, options: &[FieldOption]) {
        let mut values = HashSet::new();
        for (index, option) in options.iter().enumerate() {
            if !values.insert(option.value.as_str()) {
                self.push(
                    format!("{path}[{index}].value"),
                    format!("duplicate option value '{}'", option.value),
                );
            }
        }
    }

    fn field(&mut self, path: &str, field: &Field) {
        self.identifier(path, &field.id);

        for (label, source) in field.expressions() {
            self.expression(&format!("{path}.{label}"), source);
        }

        match &field.kind {
            FieldKind::Radio(attrs)
            | FieldKind::Checkbox(attrs)
            | FieldKind::Dropdown(attrs)
            | FieldKind::Lookup(attrs)
            | FieldKind::Likert(attrs) => {
                if attrs.options.is_empty() && attrs.option_list.is_none() {
                    self.push(
                        format!("{path}.options"),
                        format!("{} field needs options or an optionList", field.kind.label()),
                    );
                }
                self.options(&format!("{path}.options"), &attrs.options);
            }
            FieldKind::Matrix(attrs) => {
                if attrs.rows.is_empty() {
                    self.push(format!("{path}.rows"), "matrix field needs rows");
                }
                if attrs.columns.is_empty() {
                    self.push(format!("{path}.columns"), "matrix field needs at least one column");
                }
                self.options(&format!("{path}.rows"), &attrs.rows);
                self.options(&format!("{path}.columns"), &attrs.columns);
            }
            FieldKind::Calculated(attrs) => {
                if attrs.expression.trim().is_empty() {
                    self.push(format!("{path}.expression"), "calculated field needs an expression");
                }
                for dependency in &attrs.dependencies {
                    if !self.known.contains(dependency) {
                        self.push(
                            format!("{path}.dependencies"),
                            format!("unknown dependency '{dependency}'"),
                        );
                    }
                }
            }
            FieldKind::Slider(attrs) => match (attrs.min, attrs.max) {
                (Some(min), Some(max)) if min < max => {}
                (Some(_), Some(_)) => self.push(path, "slider min must be below max"),
                _ => self.push(path, "slider field needs min and max"),
            },
            FieldKind::Number(attrs) | FieldKind::Integer(attrs) => {
                if let (Some(min), Some(max)) = (attrs.min, attrs.max)
                    && min > max
                {
                    self.push(format!("{path}.min"), "min exceeds max");
                }
            }
            FieldKind::File(attrs) => {
                if attrs.max_size == Some(0) {
                    self.push(format!("{path}.maxSize"), "maxSize must be positive");
                }
            }
            FieldKind::Descriptive => {
                if !field.required.is_never() {
                    self.push(format!("{path}.required"), "descriptive fields cannot be required");
                }
                if field.validation.is_some() {
                    self.push(format!("{path}.validation"), "descriptive fields carry no validation");
                }
            }
            FieldKind::Text
            | FieldKind::Textarea
            | FieldKind::Date
            | FieldKind::Datetime
            | FieldKind::Time
            | FieldKind::Signature => {}
        }

        if let FieldKind::Number(attrs) | FieldKind::Integer(attrs) | FieldKind::Slider(attrs) =
            &field.kind
            && attrs.step.is_some_and(|step| step <= 0.0 || !step.is_finite())
        {
            self.push(format!("{path}.step"), "step must be positive");
        }

        if let Some(rules) = &field.validation {
            if let (Some(min), Some(max)) = (rules.min_length, rules.max_length)
                && min > max
            {
                self.push(format!("{path}.validation.minLength"), "minLength exceeds maxLength");
            }
            if let (Some(min), Some(max)) = (rules.min, rules.max)
                && min > max
            {
                self.push(format!("{path}.validation.min"), "min exceeds max");
            }
            if let Some(pattern) = &rules.pattern
                && let Err(err) = check_pattern(pattern)
            {
                self.push(format!("{path}.validation.pattern"), err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: serde_json::Value) -> FormSchema {
        serde_json::from_value(value).expect("schema")
    }

    fn paths(errors: &[StructuralError]) -> Vec<&str> {
        errors.iter().map(|error| error.path.as_str()).collect()
    }

    #[test]
    fn empty_form_is_rejected() {
        let errors = check_structure(&schema(json!({ "pages": [] })));
        assert_eq!(paths(&errors), vec!["pages"]);
    }

    #[test]
    fn reports_bad_and_duplicate_ids_together() {
        let errors = check_structure(&schema(json!({
            "pages": [{
                "id": "Intro",
                "title": "Intro",
                "sections": [{
                    "id": "main",
                    "title": "Main",
                    "fields": [
                        { "id": "age", "type": "integer", "label": "Age" },
                        { "id": "age", "type": "text", "label": "Age again" }
                    ]
                }]
            }]
        })));
        assert_eq!(
            paths(&errors),
            vec!["pages[0].id", "pages[0].sections[0].fields[1].id"]
        );
    }

    #[test]
    fn kind_specific_attributes_are_checked() {
        let errors = check_structure(&schema(json!({
            "pages": [{
                "id": "p",
                "title": "P",
                "sections": [{
                    "id": "s",
                    "title": "S",
                    "fields": [
                        { "id": "grid", "type": "matrix", "label": "Grid", "rows": [{ "value": "r", "label": "R" }] },
                        { "id": "total", "type": "calculated", "label": "Total" },
                        { "id": "pick", "type": "radio", "label": "Pick",
                          "options": [{ "value": "a", "label": "A" }, { "value": "a", "label": "A2" }] },
                        { "id": "pain", "type": "slider", "label": "Pain", "min": 10, "max": 0 }
                    ]
                }]
            }]
        })));
        let messages: Vec<_> = errors.iter().map(|error| error.message.as_str()).collect();
        assert!(messages.contains(&"matrix field needs at least one column"));
        assert!(messages.contains(&"calculated field needs an expression"));
        assert!(messages.contains(&"duplicate option value 'a'"));
        assert!(messages.contains(&"slider min must be below max"));
    }

    #[test]
    fn expressions_and_patterns_are_checked() {
        let errors = check_structure(&schema(json!({
            "pages": [{
                "id": "p",
                "title": "P",
                "sections": [{
                    "id": "s",
                    "title": "S",
                    "visibleIf": "{ghost} == 1",
                    "fields": [
                        { "id": "code", "type": "text", "label": "Code",
                          "required": "{code} >",
                          "validation": { "pattern": "(a+)+" } }
                    ]
                }]
            }]
        })));
        assert_eq!(
            paths(&errors),
            vec![
                "pages[0].sections[0].visibleIf",
                "pages[0].sections[0].fields[0].required",
                "pages[0].sections[0].fields[0].validation.pattern",
            ]
        );
    }

    #[test]
    fn repeat_settings_are_checked() {
        let errors = check_structure(&schema(json!({
            "pages": [{
                "id": "p",
                "title": "P",
                "sections": [
                    { "id": "meds", "title": "Meds", "repeatable": true,
                      "minRepeat": 3, "maxRepeat": 2, "repeatLabel": "Medication" },
                    { "id": "plain", "title": "Plain", "maxRepeat": 2 }
                ]
            }]
        })));
        assert_eq!(
            paths(&errors),
            vec![
                "pages[0].sections[0].minRepeat",
                "pages[0].sections[0].repeatLabel",
                "pages[0].sections[1]",
            ]
        );
    }

    #[test]
    fn calculated_cycles_are_reported() {
        let errors = check_structure(&schema(json!({
            "pages": [{
                "id": "p",
                "title": "P",
                "sections": [{
                    "id": "s",
                    "title": "S",
                    "fields": [
                        { "id": "a", "type": "calculated", "label": "A", "expression": "{b} + 1" },
                        { "id": "b", "type": "calculated", "label": "B", "expression": "{a} + 1" }
                    ]
                }]
            }]
        })));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cycle"));
    }

    #[test]
    fn every_unknown_reference_is_reported() {
        let errors = check_structure(&schema(json!({
            "pages": [{
                "id": "p",
                "title": "P",
                "visibleIf": "{consent} == 'yes' and {ghost} > 1 and {phantom}",
                "sections": [{
                    "id": "s",
                    "title": "S",
                    "fields": [{ "id": "consent", "type": "text", "label": "Consent" }]
                }]
            }]
        })));
        let messages: Vec<_> = errors.iter().map(|error| error.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "expression references unknown field 'ghost'",
                "expression references unknown field 'phantom'",
            ]
        );
        assert_eq!(paths(&errors), vec!["pages[0].visibleIf", "pages[0].visibleIf"]);
    }
}
