use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Selectable value for choice, likert, and matrix fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

/// Whether a field must be answered.
///
/// Serialized either as a plain boolean or as an expression string that is
/// evaluated against the candidate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Requirement {
    Always(bool),
    When(String),
}

impl Default for Requirement {
    fn default() -> Self {
        Requirement::Always(false)
    }
}

impl Requirement {
    pub fn is_never(&self) -> bool {
        matches!(self, Requirement::Always(false))
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Requirement::When(expr) => Some(expr.as_str()),
            Requirement::Always(_) => None,
        }
    }
}

/// Author-declared validation rules layered on top of the field kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

/// Bounds shared by number, integer, and slider fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct NumericAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// Options for choice kinds. `option_list` names an externally managed list
/// whose contents are unknown to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceAttrs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_list: Option<String>,
}

impl ChoiceAttrs {
    /// Inline options constrain values only when no external list is referenced.
    pub fn inline_values(&self) -> Option<Vec<&str>> {
        if self.option_list.is_some() || self.options.is_empty() {
            return None;
        }
        Some(self.options.iter().map(|option| option.value.as_str()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MatrixAttrs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<FieldOption>,
    #[serde(default)]
    pub columns: Vec<FieldOption>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CalculatedAttrs {
    #[serde(default)]
    pub expression: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileAttrs {
    /// File extensions (`.pdf`) or MIME types (`image/png`, `image/*`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// Closed set of field kinds, tagged by `type` in the schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Number(NumericAttrs),
    Integer(NumericAttrs),
    Date,
    Datetime,
    Time,
    Radio(ChoiceAttrs),
    Checkbox(ChoiceAttrs),
    Dropdown(ChoiceAttrs),
    Lookup(ChoiceAttrs),
    Slider(NumericAttrs),
    Likert(ChoiceAttrs),
    Matrix(MatrixAttrs),
    Calculated(CalculatedAttrs),
    File(FileAttrs),
    Signature,
    Descriptive,
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number(_) => "number",
            FieldKind::Integer(_) => "integer",
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            FieldKind::Time => "time",
            FieldKind::Radio(_) => "radio",
            FieldKind::Checkbox(_) => "checkbox",
            FieldKind::Dropdown(_) => "dropdown",
            FieldKind::Lookup(_) => "lookup",
            FieldKind::Slider(_) => "slider",
            FieldKind::Likert(_) => "likert",
            FieldKind::Matrix(_) => "matrix",
            FieldKind::Calculated(_) => "calculated",
            FieldKind::File(_) => "file",
            FieldKind::Signature => "signature",
            FieldKind::Descriptive => "descriptive",
        }
    }

    pub fn choices(&self) -> Option<&ChoiceAttrs> {
        match self {
            FieldKind::Radio(attrs)
            | FieldKind::Checkbox(attrs)
            | FieldKind::Dropdown(attrs)
            | FieldKind::Lookup(attrs)
            | FieldKind::Likert(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Descriptive fields carry no value at all.
    pub fn holds_value(&self) -> bool {
        !matches!(self, FieldKind::Descriptive)
    }
}

/// One input (or static text block) on a case-report form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Requirement::is_never")]
    pub required: Requirement,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

impl Field {
    /// Every expression source attached to this field, with a label for error paths.
    pub fn expressions(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(expr) = &self.visible_if {
            out.push(("visibleIf", expr.as_str()));
        }
        if let Some(expr) = self.required.expression() {
            out.push(("required", expr));
        }
        if let Some(custom) = self.validation.as_ref().and_then(|rules| rules.custom.as_deref()) {
            out.push(("validation.custom", custom));
        }
        if let FieldKind::Calculated(attrs) = &self.kind
            && !attrs.expression.trim().is_empty()
        {
            out.push(("expression", attrs.expression.as_str()));
        }
        out
    }
}
