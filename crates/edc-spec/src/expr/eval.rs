use std::cmp::Ordering;

use crate::expr::ExpressionError;
use crate::expr::parser::{BinaryOp, Function, LogicalOp, Node, UnaryOp};
use crate::expr::value::{Bindings, ExprValue};

fn failure(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Evaluation(message.into())
}

fn finite(value: f64) -> Result<ExprValue, ExpressionError> {
    if value.is_finite() {
        Ok(ExprValue::Number(value))
    } else {
        Err(failure("arithmetic produced a non-finite number"))
    }
}

pub(crate) fn eval(node: &Node, scope: &dyn Bindings) -> Result<ExprValue, ExpressionError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Field(name) => Ok(scope
            .lookup(name)
            .map(ExprValue::from_json)
            .unwrap_or(ExprValue::Null)),
        Node::Unary(UnaryOp::Not, inner) => Ok(ExprValue::Bool(!eval(inner, scope)?.truthy())),
        Node::Unary(UnaryOp::Neg, inner) => match eval(inner, scope)? {
            ExprValue::Null => Ok(ExprValue::Null),
            other => match other.as_number() {
                Some(number) => finite(-number),
                None => Err(failure(format!("cannot negate a {}", other.type_name()))),
            },
        },
        Node::Logical(op, left, right) => {
            let left = eval(left, scope)?.truthy();
            let result = match op {
                LogicalOp::And => left && eval(right, scope)?.truthy(),
                LogicalOp::Or => left || eval(right, scope)?.truthy(),
            };
            Ok(ExprValue::Bool(result))
        }
        Node::Binary(op, left, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            binary(*op, left, right)
        }
        Node::Call(function, args) => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, values)
        }
    }
}

fn binary(op: BinaryOp, left: ExprValue, right: ExprValue) -> Result<ExprValue, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(ExprValue::Bool(loosely_equal(&left, &right))),
        BinaryOp::NotEq => Ok(ExprValue::Bool(!loosely_equal(&left, &right))),
        BinaryOp::Gt => Ok(ExprValue::Bool(order(&left, &right) == Some(Ordering::Greater))),
        BinaryOp::Ge => Ok(ExprValue::Bool(matches!(
            order(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        BinaryOp::Lt => Ok(ExprValue::Bool(order(&left, &right) == Some(Ordering::Less))),
        BinaryOp::Le => Ok(ExprValue::Bool(matches!(
            order(&left, &right),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinaryOp::Add => {
            if matches!(left, ExprValue::Null) || matches!(right, ExprValue::Null) {
                return Ok(ExprValue::Null);
            }
            if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
                return finite(a + b);
            }
            match (&left, &right) {
                (ExprValue::Text(a), other) => Ok(ExprValue::Text(format!("{a}{}", display(other)))),
                (other, ExprValue::Text(b)) => Ok(ExprValue::Text(format!("{}{b}", display(other)))),
                _ => Err(failure(format!(
                    "cannot add {} and {}",
                    left.type_name(),
                    right.type_name()
                ))),
            }
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem | BinaryOp::Pow => {
            if matches!(left, ExprValue::Null) || matches!(right, ExprValue::Null) {
                return Ok(ExprValue::Null);
            }
            let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
                return Err(failure(format!(
                    "arithmetic on {} and {}",
                    left.type_name(),
                    right.type_name()
                )));
            };
            match op {
                BinaryOp::Sub => finite(a - b),
                BinaryOp::Mul => finite(a * b),
                BinaryOp::Div if b == 0.0 => Err(failure("division by zero")),
                BinaryOp::Div => finite(a / b),
                BinaryOp::Rem if b == 0.0 => Err(failure("modulo by zero")),
                BinaryOp::Rem => finite(a % b),
                _ => finite(a.powf(b)),
            }
        }
    }
}

fn display(value: &ExprValue) -> String {
    match value {
        ExprValue::Null => String::new(),
        ExprValue::Bool(flag) => flag.to_string(),
        ExprValue::Number(number) => number.to_string(),
        ExprValue::Text(text) => text.clone(),
        ExprValue::List(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
        ExprValue::Record => "[object]".into(),
    }
}

/// Numbers compare numerically against numeric strings; everything else structurally.
fn loosely_equal(left: &ExprValue, right: &ExprValue) -> bool {
    match (left, right) {
        (ExprValue::Number(_), ExprValue::Text(_)) | (ExprValue::Text(_), ExprValue::Number(_)) => {
            match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (ExprValue::Record, _) | (_, ExprValue::Record) => false,
        (ExprValue::List(a), ExprValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loosely_equal(x, y))
        }
        _ => left == right,
    }
}

fn order(left: &ExprValue, right: &ExprValue) -> Option<Ordering> {
    match (left, right) {
        (ExprValue::Text(a), ExprValue::Text(b)) => match (left.as_number(), right.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.cmp(b)),
        },
        (ExprValue::Null, _) | (_, ExprValue::Null) => None,
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

fn call(function: Function, args: Vec<ExprValue>) -> Result<ExprValue, ExpressionError> {
    if args.iter().any(|arg| matches!(arg, ExprValue::Null)) {
        return Ok(ExprValue::Null);
    }
    let numbers = args
        .iter()
        .map(|arg| {
            arg.as_number().ok_or_else(|| {
                failure(format!("{} expects numbers, got {}", function.name(), arg.type_name()))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let first = numbers
        .first()
        .copied()
        .ok_or_else(|| failure(format!("{} needs an argument", function.name())))?;
    match function {
        Function::Abs => finite(first.abs()),
        Function::Round => {
            let digits = numbers.get(1).copied().unwrap_or(0.0);
            if digits.fract() != 0.0 || !(0.0..=15.0).contains(&digits) {
                return Err(failure("round digits must be a whole number between 0 and 15"));
            }
            let factor = 10f64.powi(digits as i32);
            finite((first * factor).round() / factor)
        }
        Function::Min => finite(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
        Function::Max => finite(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    }
}
