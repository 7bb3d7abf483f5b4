use handlebars::{Handlebars, no_escape};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::spec::field::Field;

/// Placeholder for the 1-based instance index inside a repeat label.
pub const REPEAT_INDEX_PLACEHOLDER: &str = "#{n}";

/// Group of fields; repeatable sections collect an array of item objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_if: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_repeat: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_repeat: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_label: Option<String>,
}

impl Section {
    /// Inclusive lower bound on repeat instances.
    pub fn min_instances(&self) -> usize {
        self.min_repeat.unwrap_or(0)
    }

    /// Label shown for instance `index` (1-based) of a repeatable section.
    pub fn repeat_label(&self, index: usize) -> String {
        let Some(template) = &self.repeat_label else {
            return format!("{} {}", self.title, index);
        };
        let converted = template.replace(REPEAT_INDEX_PLACEHOLDER, "{{n}}");
        let mut engine = Handlebars::new();
        engine.register_escape_fn(no_escape);
        engine
            .render_template(&converted, &json!({ "n": index }))
            .unwrap_or_else(|_| template.replace(REPEAT_INDEX_PLACEHOLDER, &index.to_string()))
    }
}
