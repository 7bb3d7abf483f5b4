//! Expression language for visibility, conditional requirements, and
//! calculated fields.
//!
//! Field values are referenced as `{field_id}`; unbound references evaluate to
//! null. Sources are screened against a deny-list before parsing and parsed
//! once into an AST that can be evaluated any number of times.

mod cache;
mod eval;
mod lexer;
pub mod parser;
pub mod safety;
mod value;

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use cache::ExpressionCache;
pub use parser::Node;
pub use value::{Bindings, ExprValue, ItemScope, Scalar};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("expression rejected: {0}")]
    Unsafe(String),
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

/// A screened and parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        safety::screen(source)?;
        let root = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Field ids referenced anywhere in the expression.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.collect_fields(&mut out);
        out
    }

    pub fn eval(&self, scope: &dyn Bindings) -> Result<ExprValue, ExpressionError> {
        eval::eval(&self.root, scope)
    }

    /// Boolean view used for visibility and requirements; errors read as false.
    pub fn truthy(&self, scope: &dyn Bindings) -> bool {
        match self.eval(scope) {
            Ok(value) => value.truthy(),
            Err(err) => {
                debug!(expression = %self.source, error = %err, "expression degraded to false");
                false
            }
        }
    }

    /// Scalar view used for calculated fields; errors and non-scalars read as `None`.
    pub fn scalar(&self, scope: &dyn Bindings) -> Option<Scalar> {
        match self.eval(scope) {
            Ok(value) => value.into_scalar(),
            Err(err) => {
                debug!(expression = %self.source, error = %err, "expression degraded to null");
                None
            }
        }
    }
}

/// Screens and parses `source` without evaluating it; used at authoring time.
pub fn check(source: &str) -> Result<BTreeSet<String>, ExpressionError> {
    Expression::compile(source).map(|expr| expr.fields())
}

/// Evaluates `source` as a condition. Never fails: any error yields `false`.
pub fn evaluate_boolean(source: &str, data: &Value) -> bool {
    let compiled = cache::SHARED.get(source);
    match &*compiled {
        Ok(expr) => expr.truthy(data),
        Err(_) => false,
    }
}

/// Evaluates `source` as a calculation. Never fails: any error yields `None`.
pub fn evaluate(source: &str, data: &Value) -> Option<Scalar> {
    let compiled = cache::SHARED.get(source);
    match &*compiled {
        Ok(expr) => expr.scalar(data),
        Err(_) => None,
    }
}
