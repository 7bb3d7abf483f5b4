use std::sync::LazyLock;

use regex::Regex;

use crate::expr::ExpressionError;

/// Longest expression source accepted at authoring or evaluation time.
pub const MAX_EXPRESSION_LEN: usize = 2_000;

const DENIED_IDENTIFIERS: &[&str] = &[
    "constructor",
    "prototype",
    "__proto__",
    "eval",
    "function",
    "new",
    "import",
    "require",
    "this",
    "window",
    "globalThis",
    "process",
];

static STRING_LITERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).ok());

static FIELD_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").ok());

static PROPERTY_ACCESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9\s])\s*\.\s*[A-Za-z_$]|[A-Za-z_$}\)]\s*\.").ok());

static LONE_ASSIGNMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|[^=!<>])=(?:[^=]|$)").ok());

static DENIED_WORDS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let alternation = DENIED_IDENTIFIERS.join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).ok()
});

fn unsafe_expr(reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Unsafe(reason.into())
}

fn check(regex: &LazyLock<Option<Regex>>, text: &str) -> Result<bool, ExpressionError> {
    match regex.as_ref() {
        Some(regex) => Ok(regex.is_match(text)),
        None => Err(unsafe_expr("safety screen unavailable")),
    }
}

/// Rejects constructs outside the expression grammar before any parsing happens.
///
/// String literals and field references are blanked first so quoted answers
/// such as `'new onset'` or a field named `{process}` do not trip the
/// identifier deny-list.
pub fn screen(source: &str) -> Result<(), ExpressionError> {
    if source.len() > MAX_EXPRESSION_LEN {
        return Err(unsafe_expr(format!(
            "expression longer than {MAX_EXPRESSION_LEN} characters"
        )));
    }
    let Some(literals) = STRING_LITERAL.as_ref() else {
        return Err(unsafe_expr("safety screen unavailable"));
    };
    let Some(fields) = FIELD_REFERENCE.as_ref() else {
        return Err(unsafe_expr("safety screen unavailable"));
    };
    let code = literals.replace_all(source, "''");
    let code = fields.replace_all(&code, "{f}");

    for (needle, reason) in [
        ("`", "template literals are not allowed"),
        (";", "statement separators are not allowed"),
        ("[", "index access is not allowed"),
        ("]", "index access is not allowed"),
        ("=>", "function literals are not allowed"),
    ] {
        if code.contains(needle) {
            return Err(unsafe_expr(reason));
        }
    }
    if check(&LONE_ASSIGNMENT, &code)? {
        return Err(unsafe_expr("assignment is not allowed"));
    }
    if check(&PROPERTY_ACCESS, &code)? {
        return Err(unsafe_expr("property access is not allowed"));
    }
    if check(&DENIED_WORDS, &code)? {
        return Err(unsafe_expr("expression uses a reserved identifier"));
    }
    Ok(())
}
