//! String-in, string-out entry points over `edc-spec`.
//!
//! Every function returns a JSON document; failures are reported as
//! `{"error": "..."}` so that host bindings never see a panic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use edc_spec::{FormSchema, Validator, compile};

#[derive(Debug, Error)]
enum ComponentError {
    #[error("failed to parse config/{0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("failed to parse payload/{0}")]
    PayloadParse(#[source] serde_json::Error),
    #[error("config does not contain a form schema")]
    MissingSchema,
    #[error("form '{0}' is not available")]
    FormUnavailable(String),
    #[error("schema has {} structural error(s): {}", .0.len(), .0.join("; "))]
    Structure(Vec<String>),
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
}

/// Host configuration. The schema may be given inline or as an embedded JSON string.
#[derive(Debug, Deserialize, Serialize, Default)]
struct ComponentConfig {
    #[serde(default)]
    form_schema: Option<Value>,
    #[serde(default)]
    form_schema_json: Option<String>,
}

fn load_schema(config_json: &str) -> Result<FormSchema, ComponentError> {
    let config: ComponentConfig = if config_json.trim().is_empty() {
        ComponentConfig::default()
    } else {
        serde_json::from_str(config_json).map_err(ComponentError::ConfigParse)?
    };

    match (config.form_schema, config.form_schema_json) {
        (Some(inline), _) => serde_json::from_value(inline).map_err(ComponentError::ConfigParse),
        (None, Some(raw)) => serde_json::from_str(&raw).map_err(ComponentError::ConfigParse),
        (None, None) => Err(ComponentError::MissingSchema),
    }
}

fn load_validator(config_json: &str) -> Result<Validator, ComponentError> {
    let schema = load_schema(config_json)?;
    compile(&schema).map_err(|errors| {
        ComponentError::Structure(errors.iter().map(ToString::to_string).collect())
    })
}

/// Missing or malformed payloads are treated as an empty form.
fn parse_payload(payload_json: &str) -> Value {
    serde_json::from_str(payload_json).unwrap_or_else(|_| Value::Object(Map::new()))
}

fn parse_payload_strict(payload_json: &str) -> Result<Value, ComponentError> {
    serde_json::from_str(payload_json).map_err(ComponentError::PayloadParse)
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ComponentError> {
    serde_json::to_value(value).map_err(ComponentError::JsonEncode)
}

pub fn describe(form_id: &str, config_json: &str) -> String {
    respond(load_schema(config_json).and_then(|schema| {
        if schema.id.as_deref().is_some_and(|id| id != form_id) {
            Err(ComponentError::FormUnavailable(form_id.to_string()))
        } else {
            encode(&schema)
        }
    }))
}

/// Structural check of an authored schema: `{"valid": bool, "errors": [...]}`.
pub fn check_schema(schema_json: &str) -> String {
    respond(
        serde_json::from_str::<FormSchema>(schema_json)
            .map_err(ComponentError::ConfigParse)
            .and_then(|schema| {
                let errors = edc_spec::check_structure(&schema);
                Ok(json!({ "valid": errors.is_empty(), "errors": encode(&errors)? }))
            }),
    )
}

pub fn validate_payload(config_json: &str, payload_json: &str) -> String {
    respond(load_validator(config_json).and_then(|validator| {
        let payload = parse_payload_strict(payload_json)?;
        encode(&validator.validate(&payload))
    }))
}

pub fn evaluate_boolean(expression: &str, data_json: &str) -> String {
    let data = parse_payload(data_json);
    json!({ "value": edc_spec::evaluate_boolean(expression, &data) }).to_string()
}

pub fn evaluate(expression: &str, data_json: &str) -> String {
    let data = parse_payload(data_json);
    let value = edc_spec::evaluate(expression, &data).map_or(Value::Null, |scalar| scalar.to_json());
    json!({ "value": value }).to_string()
}

pub fn form_state(config_json: &str, payload_json: &str) -> String {
    respond(load_validator(config_json).and_then(|validator| {
        encode(&validator.form_state(&parse_payload(payload_json)))
    }))
}

pub fn apply_calculations(config_json: &str, payload_json: &str) -> String {
    respond(load_validator(config_json).map(|validator| {
        let mut payload = parse_payload(payload_json);
        validator.apply_calculations(&mut payload);
        payload
    }))
}

pub fn initial_payload(config_json: &str) -> String {
    respond(load_validator(config_json).map(|validator| validator.initial_payload()))
}

/// Recomputes calculated fields, then validates the whole payload.
pub fn submit(config_json: &str, payload_json: &str) -> String {
    respond(load_validator(config_json).and_then(|validator| {
        let mut payload = parse_payload_strict(payload_json)?;
        validator.apply_calculations(&mut payload);
        let outcome = validator.validate(&payload);
        let status = if outcome.valid { "complete" } else { "error" };
        Ok(json!({
            "status": status,
            "payload": payload,
            "validation": encode(&outcome)?,
        }))
    }))
}

/// `{"safe": true}` or `{"safe": false, "reason": "..."}`.
pub fn check_pattern(pattern: &str) -> String {
    let verdict = match edc_spec::check_pattern(pattern) {
        Ok(()) => json!({ "safe": true }),
        Err(err) => json!({ "safe": false, "reason": err.to_string() }),
    };
    verdict.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "id": "vitals",
            "pages": [{
                "id": "main",
                "title": "Vitals",
                "sections": [{
                    "id": "body",
                    "title": "Body",
                    "fields": [
                        { "id": "weight", "type": "number", "label": "Weight", "required": true, "min": 1 },
                        { "id": "height", "type": "number", "label": "Height", "required": true },
                        { "id": "smoker", "type": "radio", "label": "Smoker", "defaultValue": "no",
                          "options": [{ "value": "yes", "label": "Yes" }, { "value": "no", "label": "No" }] },
                        { "id": "packs", "type": "integer", "label": "Packs per day",
                          "visibleIf": "{smoker} == 'yes'", "required": true },
                        { "id": "bmi", "type": "calculated", "label": "BMI",
                          "expression": "round({weight} / ({height} / 100) ^ 2, 1)" }
                    ]
                }]
            }]
        })
    }

    fn config() -> String {
        json!({ "form_schema": schema() }).to_string()
    }

    fn parse(output: &str) -> Value {
        serde_json::from_str(output).expect("json")
    }

    #[test]
    fn describe_returns_schema_json() {
        let described = parse(&describe("vitals", &config()));
        assert_eq!(described["pages"][0]["id"], "main");
        let missing = parse(&describe("labs", &config()));
        assert_eq!(missing["error"], "form 'labs' is not available");
    }

    #[test]
    fn schema_may_be_embedded_as_string() {
        let config = json!({ "form_schema_json": schema().to_string() }).to_string();
        let result = parse(&validate_payload(&config, r#"{"weight": 70, "height": 175}"#));
        assert_eq!(result["valid"], true);
    }

    #[test]
    fn missing_schema_is_an_error() {
        let result = parse(&validate_payload("", "{}"));
        assert_eq!(result["error"], "config does not contain a form schema");
    }

    #[test]
    fn check_schema_lists_structural_errors() {
        let mut broken = schema();
        broken["pages"][0]["sections"][0]["fields"][3]["visibleIf"] = json!("{cigars} > 1");
        let result = parse(&check_schema(&broken.to_string()));
        assert_eq!(result["valid"], false);
        assert_eq!(
            result["errors"][0]["path"],
            "pages[0].sections[0].fields[3].visibleIf"
        );

        let result = parse(&check_schema(&schema().to_string()));
        assert_eq!(result["valid"], true);
    }

    #[test]
    fn validate_payload_reports_field_errors() {
        let result = parse(&validate_payload(&config(), r#"{"weight": 0, "height": 175}"#));
        assert_eq!(result["valid"], false);
        assert_eq!(result["errors"][0]["fieldId"], "weight");
        assert_eq!(result["errors"][0]["code"], "min");
    }

    #[test]
    fn malformed_payload_is_rejected_on_validate() {
        let result = parse(&validate_payload(&config(), "{not json"));
        assert!(result["error"].as_str().unwrap_or_default().starts_with("failed to parse payload"));
    }

    #[test]
    fn evaluate_functions_never_fail() {
        assert_eq!(parse(&evaluate_boolean("{a} > 2", r#"{"a": "3"}"#))["value"], true);
        assert_eq!(parse(&evaluate_boolean("{a} >", "{}"))["value"], false);
        assert_eq!(parse(&evaluate("{a} * 2", r#"{"a": 4}"#))["value"], 8);
        assert_eq!(parse(&evaluate("{a} / 0", r#"{"a": 4}"#))["value"], Value::Null);
    }

    #[test]
    fn form_state_follows_visibility() {
        let hidden = parse(&form_state(&config(), r#"{"smoker": "no"}"#));
        assert_eq!(hidden["fields"]["packs"]["visible"], false);
        let shown = parse(&form_state(&config(), r#"{"smoker": "yes"}"#));
        assert_eq!(shown["fields"]["packs"]["required"], true);
    }

    #[test]
    fn calculations_and_defaults() {
        let calculated = parse(&apply_calculations(&config(), r#"{"weight": 70, "height": 175}"#));
        assert_eq!(calculated["bmi"], 22.9);
        let initial = parse(&initial_payload(&config()));
        assert_eq!(initial["smoker"], "no");
    }

    #[test]
    fn submit_reports_status() {
        let ok = parse(&submit(&config(), r#"{"weight": 70, "height": 175}"#));
        assert_eq!(ok["status"], "complete");
        assert_eq!(ok["payload"]["bmi"], 22.9);

        let failed = parse(&submit(&config(), r#"{"weight": 70, "height": 175, "smoker": "yes"}"#));
        assert_eq!(failed["status"], "error");
        assert_eq!(failed["validation"]["errors"][0]["fieldId"], "packs");
    }

    #[test]
    fn check_pattern_flags_catastrophic_shapes() {
        assert_eq!(parse(&check_pattern("^[A-Z]{2}[0-9]{4}$"))["safe"], true);
        let verdict = parse(&check_pattern("(a+)+$"));
        assert_eq!(verdict["safe"], false);
        assert!(verdict["reason"].is_string());
    }
}
