use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};

use crate::expr::{Bindings, Expression};
use crate::pattern::CompiledPattern;
use crate::spec::{Field, FieldKind, FileAttrs, NumericAttrs, Requirement, ValidationRules};
use crate::validate::FieldError;

pub(crate) enum RequiredRule {
    Never,
    Always,
    When(Expression),
}

impl RequiredRule {
    pub(crate) fn applies(&self, scope: &dyn Bindings) -> bool {
        match self {
            RequiredRule::Never => false,
            RequiredRule::Always => true,
            RequiredRule::When(expr) => expr.truthy(scope),
        }
    }
}

enum KindRule {
    Text,
    Number { integer: bool },
    Date,
    Datetime,
    Time,
    Choice { allowed: Option<Vec<String>>, numeric: bool },
    Checkbox { allowed: Option<Vec<String>> },
    Matrix { rows: Option<Vec<String>>, columns: Vec<String> },
    Calculated,
    File(FileAttrs),
    Signature,
}

#[derive(Default)]
struct Bounds {
    min: Option<f64>,
    max: Option<f64>,
    step: Option<f64>,
}

impl Bounds {
    /// Kind attributes and validation rules combine; the tighter bound wins.
    fn from_kind(attrs: &NumericAttrs, rules: Option<&ValidationRules>) -> Self {
        Self {
            min: tighter(attrs.min, rules.and_then(|r| r.min), f64::max),
            max: tighter(attrs.max, rules.and_then(|r| r.max), f64::min),
            step: attrs.step,
        }
    }
}

fn tighter(a: Option<f64>, b: Option<f64>, take: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(take(x, y)),
        (x, y) => x.or(y),
    }
}

/// Validation contract for one field, built once per schema.
pub(crate) struct CompiledField {
    pub(crate) id: String,
    pub(crate) visible_if: Option<Expression>,
    pub(crate) required: RequiredRule,
    pub(crate) default_value: Option<Value>,
    pub(crate) calculation: Option<Expression>,
    kind: KindRule,
    bounds: Bounds,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<(CompiledPattern, Option<String>)>,
    custom: Option<(Expression, Option<String>)>,
}

fn compile_expression(source: &str) -> Option<Expression> {
    Expression::compile(source).ok()
}

impl CompiledField {
    /// Returns `None` for descriptive fields, which carry no value.
    pub(crate) fn compile(field: &Field) -> Option<Self> {
        let rules = field.validation.as_ref();
        let mut bounds = Bounds {
            min: rules.and_then(|r| r.min),
            max: rules.and_then(|r| r.max),
            step: None,
        };
        let kind = match &field.kind {
            FieldKind::Descriptive => return None,
            FieldKind::Text | FieldKind::Textarea => KindRule::Text,
            FieldKind::Number(attrs) | FieldKind::Slider(attrs) => {
                bounds = Bounds::from_kind(attrs, rules);
                KindRule::Number { integer: false }
            }
            FieldKind::Integer(attrs) => {
                bounds = Bounds::from_kind(attrs, rules);
                KindRule::Number { integer: true }
            }
            FieldKind::Date => KindRule::Date,
            FieldKind::Datetime => KindRule::Datetime,
            FieldKind::Time => KindRule::Time,
            FieldKind::Radio(attrs) | FieldKind::Dropdown(attrs) | FieldKind::Lookup(attrs) => {
                KindRule::Choice {
                    allowed: owned(attrs.inline_values()),
                    numeric: false,
                }
            }
            FieldKind::Likert(attrs) => KindRule::Choice {
                allowed: owned(attrs.inline_values()),
                numeric: true,
            },
            FieldKind::Checkbox(attrs) => KindRule::Checkbox {
                allowed: owned(attrs.inline_values()),
            },
            FieldKind::Matrix(attrs) => KindRule::Matrix {
                rows: (!attrs.rows.is_empty())
                    .then(|| attrs.rows.iter().map(|row| row.value.clone()).collect()),
                columns: attrs.columns.iter().map(|col| col.value.clone()).collect(),
            },
            FieldKind::Calculated(_) => KindRule::Calculated,
            FieldKind::File(attrs) => KindRule::File(attrs.clone()),
            FieldKind::Signature => KindRule::Signature,
        };

        let required = match (&field.kind, &field.required) {
            (FieldKind::Calculated(_), _) => RequiredRule::Never,
            (_, Requirement::Always(true)) => RequiredRule::Always,
            (_, Requirement::Always(false)) => RequiredRule::Never,
            (_, Requirement::When(source)) => match compile_expression(source) {
                Some(expr) => RequiredRule::When(expr),
                None => RequiredRule::Never,
            },
        };

        let calculation = match &field.kind {
            FieldKind::Calculated(attrs) => compile_expression(&attrs.expression),
            _ => None,
        };

        Some(Self {
            id: field.id.clone(),
            visible_if: field.visible_if.as_deref().and_then(compile_expression),
            required,
            default_value: field.default_value.clone(),
            calculation,
            kind,
            bounds,
            min_length: rules.and_then(|r| r.min_length),
            max_length: rules.and_then(|r| r.max_length),
            pattern: rules.and_then(|r| {
                let source = r.pattern.as_deref()?;
                let compiled = CompiledPattern::new(source).ok()?;
                Some((compiled, r.pattern_message.clone()))
            }),
            custom: rules.and_then(|r| {
                let expr = compile_expression(r.custom.as_deref()?)?;
                Some((expr, r.custom_message.clone()))
            }),
        })
    }

    pub(crate) fn is_visible(&self, scope: &dyn Bindings) -> bool {
        self.visible_if.as_ref().is_none_or(|expr| expr.truthy(scope))
    }

    /// Validates one value; returns the first failing rule.
    pub(crate) fn check(
        &self,
        value: Option<&Value>,
        scope: &dyn Bindings,
        path: &str,
    ) -> Option<FieldError> {
        let required = self.required.applies(scope);
        let value = match value {
            Some(value) if !is_blank(value) => value,
            _ if required => return Some(self.error(path, "This field is required", "required")),
            _ => return None,
        };

        self.check_kind(value, required, path)
            .or_else(|| self.check_custom(scope, path))
    }

    fn error(&self, path: &str, message: impl Into<String>, code: &str) -> FieldError {
        FieldError {
            field_id: self.id.clone(),
            path: path.to_string(),
            message: message.into(),
            code: code.to_string(),
        }
    }

    fn check_kind(&self, value: &Value, required: bool, path: &str) -> Option<FieldError> {
        match &self.kind {
            KindRule::Text => {
                let Some(text) = value.as_str() else {
                    return Some(self.error(path, "Expected text", "type_mismatch"));
                };
                self.check_text(text, path)
            }
            KindRule::Number { integer } => {
                let Some(number) = value.as_f64().filter(|n| n.is_finite()) else {
                    return Some(self.error(path, "Expected a number", "type_mismatch"));
                };
                if *integer && number.fract() != 0.0 {
                    return Some(self.error(path, "Must be a whole number", "type_mismatch"));
                }
                self.check_bounds(number, path)
            }
            KindRule::Date => {
                let ok = value
                    .as_str()
                    .is_some_and(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok());
                (!ok).then(|| self.error(path, "Invalid date (expected YYYY-MM-DD)", "invalid_date"))
            }
            KindRule::Datetime => {
                let ok = value.as_str().is_some_and(|text| {
                    DateTime::parse_from_rfc3339(text).is_ok()
                        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M").is_ok()
                        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
                });
                (!ok).then(|| self.error(path, "Invalid date and time", "invalid_datetime"))
            }
            KindRule::Time => {
                let ok = value.as_str().is_some_and(|text| {
                    NaiveTime::parse_from_str(text, "%H:%M").is_ok()
                        || NaiveTime::parse_from_str(text, "%H:%M:%S").is_ok()
                });
                (!ok).then(|| self.error(path, "Invalid time (expected HH:MM)", "invalid_time"))
            }
            KindRule::Choice { allowed, numeric } => {
                let listed = match value {
                    Value::String(text) => allowed.as_ref().is_none_or(|values| values.contains(text)),
                    // 2 and 2.0 both select option "2"
                    Value::Number(number) if *numeric => {
                        let number = number.as_f64();
                        allowed.as_ref().is_none_or(|values| {
                            values
                                .iter()
                                .any(|option| option.trim().parse::<f64>().ok() == number)
                        })
                    }
                    _ => return Some(self.error(path, "Expected a single option", "type_mismatch")),
                };
                (!listed).then(|| self.error(path, "Invalid option", "invalid_option"))
            }
            KindRule::Checkbox { allowed } => {
                let Some(items) = value.as_array() else {
                    return Some(self.error(path, "Expected a list of options", "type_mismatch"));
                };
                for item in items {
                    let Some(text) = item.as_str() else {
                        return Some(self.error(path, "Expected a list of options", "type_mismatch"));
                    };
                    if let Some(values) = allowed
                        && !values.iter().any(|allowed| allowed == text)
                    {
                        return Some(self.error(
                            path,
                            format!("Invalid option '{text}'"),
                            "invalid_option",
                        ));
                    }
                }
                None
            }
            KindRule::Matrix { rows, columns } => {
                let Some(map) = value.as_object() else {
                    return Some(self.error(path, "Expected one answer per row", "type_mismatch"));
                };
                self.check_matrix(map, rows.as_deref(), columns, required, path)
            }
            KindRule::Calculated => match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => None,
                _ => Some(self.error(path, "Calculated value must be a scalar", "type_mismatch")),
            },
            KindRule::File(attrs) => {
                let Some(map) = value.as_object() else {
                    return Some(self.error(path, "Expected an uploaded file", "type_mismatch"));
                };
                self.check_file(map, attrs, path)
            }
            KindRule::Signature => {
                let Some(map) = value.as_object() else {
                    return Some(self.error(path, "Expected a signature", "type_mismatch"));
                };
                self.check_signature(map, path)
            }
        }
    }

    fn check_text(&self, text: &str, path: &str) -> Option<FieldError> {
        let length = text.chars().count();
        if let Some(min) = self.min_length
            && length < min
        {
            return Some(self.error(path, format!("Must be at least {min} characters"), "min_length"));
        }
        if let Some(max) = self.max_length
            && length > max
        {
            return Some(self.error(path, format!("Must be at most {max} characters"), "max_length"));
        }
        if let Some((pattern, message)) = &self.pattern
            && !pattern.matches(text)
        {
            let message = message.clone().unwrap_or_else(|| "Invalid format".into());
            return Some(self.error(path, message, "pattern_mismatch"));
        }
        None
    }

    fn check_bounds(&self, number: f64, path: &str) -> Option<FieldError> {
        if let Some(min) = self.bounds.min
            && number < min
        {
            return Some(self.error(path, format!("Must be at least {}", display(min)), "min"));
        }
        if let Some(max) = self.bounds.max
            && number > max
        {
            return Some(self.error(path, format!("Must be at most {}", display(max)), "max"));
        }
        if let Some(step) = self.bounds.step.filter(|step| *step > 0.0) {
            let offset = (number - self.bounds.min.unwrap_or(0.0)) / step;
            if (offset - offset.round()).abs() > 1e-9 {
                return Some(self.error(
                    path,
                    format!("Must be a multiple of {}", display(step)),
                    "step",
                ));
            }
        }
        None
    }

    fn check_matrix(
        &self,
        map: &Map<String, Value>,
        rows: Option<&[String]>,
        columns: &[String],
        required: bool,
        path: &str,
    ) -> Option<FieldError> {
        let Some(rows) = rows else {
            return map
                .values()
                .any(|answer| !answer.is_string())
                .then(|| self.error(path, "Matrix answers must be text", "type_mismatch"));
        };
        for row in rows {
            match map.get(row) {
                Some(Value::String(answer)) if !answer.is_empty() => {
                    if !columns.iter().any(|column| column == answer) {
                        return Some(self.error(
                            path,
                            format!("Row '{row}' has an invalid answer"),
                            "invalid_option",
                        ));
                    }
                }
                Some(Value::String(_)) | Some(Value::Null) | None => {
                    if required {
                        return Some(self.error(path, "All rows must be answered", "required"));
                    }
                }
                Some(_) => {
                    return Some(self.error(path, "Matrix answers must be text", "type_mismatch"));
                }
            }
        }
        None
    }

    fn check_file(
        &self,
        map: &Map<String, Value>,
        attrs: &FileAttrs,
        path: &str,
    ) -> Option<FieldError> {
        let non_empty = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
        };
        let Some(filename) = non_empty("filename") else {
            return Some(self.error(path, "File name is required", "invalid_file"));
        };
        if non_empty("path").is_none() {
            return Some(self.error(path, "File path is required", "invalid_file"));
        }
        let Some(size) = map.get("size").and_then(Value::as_f64).filter(|size| *size > 0.0) else {
            return Some(self.error(path, "File size must be positive", "invalid_file"));
        };
        if let Some(max) = attrs.max_size
            && size > max as f64
        {
            return Some(self.error(
                path,
                format!("File exceeds the maximum size of {max} bytes"),
                "max_size",
            ));
        }
        if !attrs.accept.is_empty() {
            let mime = map.get("mimeType").and_then(Value::as_str);
            if !attrs.accept.iter().any(|rule| accepts(rule, filename, mime)) {
                return Some(self.error(path, "File type is not accepted", "file_type"));
            }
        }
        None
    }

    fn check_signature(&self, map: &Map<String, Value>, path: &str) -> Option<FieldError> {
        let name_ok = map
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| name.trim().chars().count() >= 2);
        if !name_ok {
            return Some(self.error(
                path,
                "Signer name must be at least 2 characters",
                "signature_name",
            ));
        }
        if map.get("confirmed") != Some(&Value::Bool(true)) {
            return Some(self.error(path, "Signature must be confirmed", "signature_unconfirmed"));
        }
        let timestamp_ok = map
            .get("timestamp")
            .and_then(Value::as_str)
            .is_some_and(|stamp| !stamp.trim().is_empty());
        if !timestamp_ok {
            return Some(self.error(path, "Signature timestamp is required", "signature_timestamp"));
        }
        None
    }

    fn check_custom(&self, scope: &dyn Bindings, path: &str) -> Option<FieldError> {
        let (expr, message) = self.custom.as_ref()?;
        if expr.truthy(scope) {
            return None;
        }
        let message = message.clone().unwrap_or_else(|| "Invalid value".into());
        Some(self.error(path, message, "custom"))
    }
}

fn owned(values: Option<Vec<&str>>) -> Option<Vec<String>> {
    values.map(|values| values.into_iter().map(str::to_string).collect())
}

/// Null, whitespace-only text, and empty arrays or objects count as unanswered.
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn display(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

fn accepts(rule: &str, filename: &str, mime: Option<&str>) -> bool {
    let rule = rule.trim().to_ascii_lowercase();
    if rule.starts_with('.') {
        return filename.to_ascii_lowercase().ends_with(&rule);
    }
    let Some(mime) = mime.map(str::to_ascii_lowercase) else {
        return false;
    };
    match rule.strip_suffix("/*") {
        Some(family) => mime.split('/').next() == Some(family),
        None => mime == rule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compiled(field: Value) -> CompiledField {
        let field: Field = serde_json::from_value(field).expect("field");
        CompiledField::compile(&field).expect("value field")
    }

    fn check(field: &CompiledField, value: Value) -> Option<String> {
        let scope = json!({});
        field
            .check(Some(&value), &scope, &field.id)
            .map(|error| error.code)
    }

    #[test]
    fn slider_respects_step() {
        let slider = compiled(json!({
            "id": "pain", "type": "slider", "label": "Pain", "min": 0, "max": 10, "step": 0.5
        }));
        assert_eq!(check(&slider, json!(7.5)), None);
        assert_eq!(check(&slider, json!(7.3)).as_deref(), Some("step"));
        assert_eq!(check(&slider, json!(11)).as_deref(), Some("max"));
    }

    #[test]
    fn likert_accepts_numeric_option_values() {
        let likert = compiled(json!({
            "id": "mood", "type": "likert", "label": "Mood",
            "options": [{ "value": "1", "label": "Low" }, { "value": "2", "label": "High" }]
        }));
        assert_eq!(check(&likert, json!(2)), None);
        assert_eq!(check(&likert, json!(2.0)), None);
        assert_eq!(check(&likert, json!("2")), None);
        assert_eq!(check(&likert, json!(2.5)).as_deref(), Some("invalid_option"));
        assert_eq!(check(&likert, json!("3")).as_deref(), Some("invalid_option"));
    }

    #[test]
    fn external_option_lists_accept_any_text() {
        let lookup = compiled(json!({
            "id": "site", "type": "lookup", "label": "Site", "optionList": "sites"
        }));
        assert_eq!(check(&lookup, json!("anything")), None);
        assert_eq!(check(&lookup, json!(4)).as_deref(), Some("type_mismatch"));
    }

    #[test]
    fn file_accept_rules() {
        let file = compiled(json!({
            "id": "scan", "type": "file", "label": "Scan",
            "accept": [".pdf", "image/*"], "maxSize": 1000
        }));
        let upload = |name: &str, mime: &str, size: u64| {
            json!({ "filename": name, "path": "/uploads/x", "size": size, "mimeType": mime })
        };
        assert_eq!(check(&file, upload("a.PDF", "application/pdf", 10)), None);
        assert_eq!(check(&file, upload("a.png", "image/png", 10)), None);
        assert_eq!(
            check(&file, upload("a.exe", "application/octet-stream", 10)).as_deref(),
            Some("file_type")
        );
        assert_eq!(check(&file, upload("a.pdf", "application/pdf", 5000)).as_deref(), Some("max_size"));
        assert_eq!(check(&file, upload("a.pdf", "application/pdf", 0)).as_deref(), Some("invalid_file"));
    }

    #[test]
    fn date_and_time_formats() {
        let date = compiled(json!({ "id": "visit", "type": "date", "label": "Visit" }));
        assert_eq!(check(&date, json!("2024-02-29")), None);
        assert_eq!(check(&date, json!("2023-02-29")).as_deref(), Some("invalid_date"));
        let time = compiled(json!({ "id": "dose_time", "type": "time", "label": "Time" }));
        assert_eq!(check(&time, json!("08:30")), None);
        assert_eq!(check(&time, json!("25:00")).as_deref(), Some("invalid_time"));
        let stamp = compiled(json!({ "id": "onset", "type": "datetime", "label": "Onset" }));
        assert_eq!(check(&stamp, json!("2024-01-01T10:00")), None);
        assert_eq!(check(&stamp, json!("2024-01-01T10:00:00Z")), None);
        assert_eq!(check(&stamp, json!("yesterday")).as_deref(), Some("invalid_datetime"));
    }

    #[test]
    fn blank_values_are_unanswered() {
        assert!(is_blank(&json!("  ")));
        assert!(is_blank(&json!([])));
        assert!(!is_blank(&json!(0)));
        assert!(!is_blank(&json!(false)));
    }
}
