use std::sync::LazyLock;

use regex::Regex;

/// Identifier grammar shared by pages, sections, fields, and field references.
pub const ID_PATTERN: &str = "^[a-z][a-z0-9_]*$";

static ID_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(ID_PATTERN).ok());

pub fn is_valid_id(candidate: &str) -> bool {
    match ID_REGEX.as_ref() {
        Some(regex) => regex.is_match(candidate),
        None => false,
    }
}
