use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::spec::field::Field;
use crate::spec::section::Section;

/// One page of a case-report form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_if: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// Top-level case-report form definition.
///
/// A schema is immutable once a response references it; editing a form
/// produces a new `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub pages: Vec<Page>,
}

/// A field together with the page and section that contain it.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    pub page: &'a Page,
    pub section: &'a Section,
    pub field: &'a Field,
}

impl FormSchema {
    /// Walks every field in document order.
    pub fn fields(&self) -> impl Iterator<Item = FieldRef<'_>> {
        self.pages.iter().flat_map(|page| {
            page.sections.iter().flat_map(move |section| {
                section
                    .fields
                    .iter()
                    .map(move |field| FieldRef { page, section, field })
            })
        })
    }

    pub fn field(&self, id: &str) -> Option<FieldRef<'_>> {
        self.fields().find(|entry| entry.field.id == id)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.pages.iter().flat_map(|page| page.sections.iter())
    }
}
