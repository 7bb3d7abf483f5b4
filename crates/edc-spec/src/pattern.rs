//! Static guard for author-supplied `pattern` validation rules.
//!
//! Patterns travel with the schema to every client that renders the form,
//! including backtracking regex engines, so shapes known to backtrack
//! catastrophically are refused at authoring time: nested unbounded
//! quantifiers and repeated alternations whose branches can start alike. Server-side matching also
//! caps the compiled program size and the length of the input it will scan.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use regex_syntax::ast::{self, Ast, RepetitionKind, RepetitionRange};
use regex_syntax::hir::translate::Translator;
use regex_syntax::hir::{Class, Hir, HirKind};
use thiserror::Error;

pub const MAX_PATTERN_LEN: usize = 512;
pub const MAX_INPUT_LEN: usize = 10_000;
const MAX_COMPILED_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern longer than {MAX_PATTERN_LEN} characters")]
    TooLong,
    #[error("pattern is prone to catastrophic backtracking: {0}")]
    Backtracking(&'static str),
    #[error("invalid pattern: {0}")]
    Invalid(String),
}

struct Shape {
    regex: Option<Regex>,
    reason: &'static str,
}

fn shape(pattern: &str, reason: &'static str) -> Shape {
    Shape {
        regex: Regex::new(pattern).ok(),
        reason,
    }
}

// Shapes the pattern parser cannot express, so they are matched on the source text.
static DANGEROUS_SHAPES: LazyLock<Vec<Shape>> = LazyLock::new(|| {
    vec![
        // \1+ ...: quantified back-reference
        shape(r"\\[1-9](?:[+*]|\{\d+,\d*\})", "quantified back-reference"),
        // .*.* ...: adjacent unbounded wildcards
        shape(r"\.[*+]\??\.[*+]", "adjacent unbounded wildcards"),
    ]
});

/// Best-effort static check; see the module docs for the runtime backstop.
pub fn check_pattern(pattern: &str) -> Result<(), PatternError> {
    if pattern.chars().count() > MAX_PATTERN_LEN {
        return Err(PatternError::TooLong);
    }
    for danger in DANGEROUS_SHAPES.iter() {
        if danger
            .regex
            .as_ref()
            .is_some_and(|regex| regex.is_match(pattern))
        {
            return Err(PatternError::Backtracking(danger.reason));
        }
    }
    let ast = ast::parse::Parser::new()
        .parse(pattern)
        .map_err(|err| PatternError::Invalid(err.to_string()))?;
    if let Some(reason) = (Guard { pattern }).backtracking(&ast) {
        return Err(PatternError::Backtracking(reason));
    }
    build(pattern).map(|_| ())
}

/// Inclusive code point ranges one position can match.
type CharSet = Vec<(u32, u32)>;

const ANY_CHAR: (u32, u32) = (0, 0x10FFFF);

fn intersects(left: &CharSet, right: &CharSet) -> bool {
    left.iter()
        .any(|&(lo, hi)| right.iter().any(|&(start, end)| lo <= end && start <= hi))
}

fn repeats(rep: &ast::Repetition) -> bool {
    match &rep.op.kind {
        RepetitionKind::ZeroOrOne => false,
        RepetitionKind::Range(RepetitionRange::Exactly(count)) => *count > 1,
        RepetitionKind::Range(RepetitionRange::Bounded(_, max)) => *max > 1,
        RepetitionKind::ZeroOrMore
        | RepetitionKind::OneOrMore
        | RepetitionKind::Range(RepetitionRange::AtLeast(_)) => true,
    }
}

fn unbounded(rep: &ast::Repetition) -> bool {
    matches!(
        rep.op.kind,
        RepetitionKind::ZeroOrMore
            | RepetitionKind::OneOrMore
            | RepetitionKind::Range(RepetitionRange::AtLeast(_))
    )
}

fn min_count(rep: &ast::Repetition) -> u32 {
    match &rep.op.kind {
        RepetitionKind::ZeroOrOne | RepetitionKind::ZeroOrMore => 0,
        RepetitionKind::OneOrMore => 1,
        RepetitionKind::Range(
            RepetitionRange::Exactly(min)
            | RepetitionRange::AtLeast(min)
            | RepetitionRange::Bounded(min, _),
        ) => *min,
    }
}

fn contains(node: &Ast, predicate: &dyn Fn(&Ast) -> bool) -> bool {
    predicate(node)
        || match node {
            Ast::Repetition(rep) => contains(&rep.ast, predicate),
            Ast::Group(group) => contains(&group.ast, predicate),
            Ast::Concat(concat) => concat.asts.iter().any(|child| contains(child, predicate)),
            Ast::Alternation(alternation) => {
                alternation.asts.iter().any(|child| contains(child, predicate))
            }
            _ => false,
        }
}

struct Guard<'p> {
    pattern: &'p str,
}

impl Guard<'_> {
    /// First shape under a repeating quantifier that can match one input in many ways.
    fn backtracking(&self, node: &Ast) -> Option<&'static str> {
        match node {
            Ast::Repetition(rep) => {
                if repeats(rep) {
                    if contains(&rep.ast, &|child| {
                        matches!(child, Ast::Repetition(inner) if unbounded(inner))
                    }) {
                        return Some("nested quantifier");
                    }
                    if contains(&rep.ast, &|child| {
                        matches!(child, Ast::Alternation(alternation) if self.overlapping(&alternation.asts))
                    }) {
                        return Some("quantified alternation with overlapping branches");
                    }
                }
                self.backtracking(&rep.ast)
            }
            Ast::Group(group) => self.backtracking(&group.ast),
            Ast::Concat(concat) => concat.asts.iter().find_map(|child| self.backtracking(child)),
            Ast::Alternation(alternation) => alternation
                .asts
                .iter()
                .find_map(|child| self.backtracking(child)),
            _ => None,
        }
    }

    /// Two branches overlap when their fixed leading positions can all match
    /// the same characters.
    fn overlapping(&self, branches: &[Ast]) -> bool {
        let prefixes: Vec<Vec<CharSet>> = branches
            .iter()
            .map(|branch| {
                let mut positions = Vec::new();
                self.fixed_prefix(branch, &mut positions);
                positions
            })
            .collect();
        prefixes.iter().enumerate().any(|(index, first)| {
            prefixes[index + 1..].iter().any(|second| {
                first
                    .iter()
                    .zip(second)
                    .all(|(left, right)| intersects(left, right))
            })
        })
    }

    /// Pushes one set per leading single-character position of `node`.
    /// Returns false where the sequence stops being fixed.
    fn fixed_prefix(&self, node: &Ast, positions: &mut Vec<CharSet>) -> bool {
        match node {
            Ast::Empty(_) | Ast::Flags(_) | Ast::Assertion(_) => true,
            Ast::Literal(literal) => {
                let code = u32::from(literal.c);
                positions.push(vec![(code, code)]);
                true
            }
            Ast::Dot(_) | Ast::ClassUnicode(_) | Ast::ClassPerl(_) | Ast::ClassBracketed(_) => {
                positions.push(self.char_set(node));
                true
            }
            Ast::Group(group) => self.fixed_prefix(&group.ast, positions),
            Ast::Concat(concat) => concat
                .asts
                .iter()
                .all(|child| self.fixed_prefix(child, positions)),
            Ast::Repetition(rep) => {
                let once = matches!(
                    rep.op.kind,
                    RepetitionKind::Range(
                        RepetitionRange::Exactly(1) | RepetitionRange::Bounded(1, 1)
                    )
                );
                if once {
                    return self.fixed_prefix(&rep.ast, positions);
                }
                if min_count(rep) > 0 {
                    self.fixed_prefix(&rep.ast, positions);
                }
                false
            }
            _ => false,
        }
    }

    fn char_set(&self, node: &Ast) -> CharSet {
        let translated = Translator::new().translate(self.pattern, node);
        match translated.as_ref().map(Hir::kind) {
            Ok(HirKind::Class(Class::Unicode(class))) => class
                .ranges()
                .iter()
                .map(|range| (u32::from(range.start()), u32::from(range.end())))
                .collect(),
            Ok(HirKind::Class(Class::Bytes(class))) => class
                .ranges()
                .iter()
                .map(|range| (u32::from(range.start()), u32::from(range.end())))
                .collect(),
            _ => vec![ANY_CHAR],
        }
    }
}

fn build(pattern: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(&anchored(pattern))
        .size_limit(MAX_COMPILED_SIZE)
        .build()
        .map_err(|err| PatternError::Invalid(err.to_string()))
}

/// Patterns must match the whole value, as HTML `pattern` attributes do.
fn anchored(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

/// Guarded pattern ready to match field values.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
}

impl CompiledPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        check_pattern(pattern)?;
        Ok(Self {
            regex: build(pattern)?,
        })
    }

    /// Oversized input never matches.
    pub fn matches(&self, text: &str) -> bool {
        text.len() <= MAX_INPUT_LEN && self.regex.is_match(text)
    }
}
