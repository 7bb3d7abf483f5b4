use std::collections::BTreeSet;

use crate::expr::ExpressionError;
use crate::expr::lexer::{Spanned, Token, tokenize};
use crate::expr::value::ExprValue;

/// Maximum nesting of parentheses, unary operators, and calls.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Round,
    Abs,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "round" => Some(Function::Round),
            "abs" => Some(Function::Abs),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Round => "round",
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(ExprValue),
    Field(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Logical(LogicalOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

impl Node {
    pub fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Node::Literal(_) => {}
            Node::Field(name) => {
                out.insert(name.clone());
            }
            Node::Unary(_, inner) => inner.collect_fields(out),
            Node::Binary(_, left, right) | Node::Logical(_, left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Node::Call(_, args) => args.iter().for_each(|arg| arg.collect_fields(out)),
        }
    }
}

pub fn parse(source: &str) -> Result<Node, ExpressionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Syntax {
            position: 0,
            message: "empty expression".into(),
        });
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
        end: source.len(),
    };
    let node = parser.or()?;
    if let Some(extra) = parser.tokens.get(parser.cursor) {
        return Err(ExpressionError::Syntax {
            position: extra.position,
            message: "unexpected trailing input".into(),
        });
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|spanned| &spanned.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|spanned| spanned.position)
            .unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|spanned| spanned.token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(found)) if found == word)
    }

    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.and()?;
        while self.is_word("or") || matches!(self.peek(), Some(Token::OrOr)) {
            self.advance();
            let right = self.and()?;
            left = Node::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.not()?;
        while self.is_word("and") || matches!(self.peek(), Some(Token::AndAnd)) {
            self.advance();
            let right = self.not()?;
            left = Node::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Node, ExpressionError> {
        if self.is_word("not") || matches!(self.peek(), Some(Token::Bang)) {
            self.advance();
            self.descend()?;
            let inner = self.not()?;
            self.ascend();
            return Ok(Node::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        if matches!(
            self.peek(),
            Some(Token::EqEq | Token::NotEq | Token::Gt | Token::Ge | Token::Lt | Token::Le)
        ) {
            return Err(self.error("comparisons cannot be chained"));
        }
        Ok(Node::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            self.descend()?;
            let inner = self.unary()?;
            self.ascend();
            return Ok(Node::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.primary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            self.descend()?;
            let exponent = self.unary()?;
            self.ascend();
            return Ok(Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };
        match token {
            Token::Number(value) => Ok(Node::Literal(ExprValue::Number(value))),
            Token::Text(text) => Ok(Node::Literal(ExprValue::Text(text))),
            Token::Field(name) => Ok(Node::Field(name)),
            Token::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.ascend();
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Token::Word(word) => match word.as_str() {
                "true" => Ok(Node::Literal(ExprValue::Bool(true))),
                "false" => Ok(Node::Literal(ExprValue::Bool(false))),
                "null" => Ok(Node::Literal(ExprValue::Null)),
                name => {
                    let function = Function::lookup(name)
                        .ok_or_else(|| self.error(format!("unknown identifier '{name}'")))?;
                    self.call(function)
                }
            },
            _ => {
                self.cursor -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    fn call(&mut self, function: Function) -> Result<Node, ExpressionError> {
        if !matches!(self.advance(), Some(Token::LParen)) {
            return Err(self.error(format!("expected '(' after {}", function.name())));
        }
        self.descend()?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.or()?);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.advance();
                    }
                    _ => break,
                }
            }
        }
        if !matches!(self.advance(), Some(Token::RParen)) {
            return Err(self.error("expected ')' to close call"));
        }
        self.ascend();

        let arity_ok = match function {
            Function::Round => matches!(args.len(), 1 | 2),
            Function::Abs => args.len() == 1,
            Function::Min | Function::Max => !args.is_empty(),
        };
        if !arity_ok {
            return Err(self.error(format!(
                "{} does not accept {} argument(s)",
                function.name(),
                args.len()
            )));
        }
        Ok(Node::Call(function, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let node = parse("1 + 2 * 3").expect("parse");
        match node {
            Node::Binary(BinaryOp::Add, _, right) => {
                assert!(matches!(*right, Node::Binary(BinaryOp::Mul, _, _)))
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn power_is_right_associative() {
        let node = parse("2 ^ 3 ^ 2").expect("parse");
        match node {
            Node::Binary(BinaryOp::Pow, _, right) => {
                assert!(matches!(*right, Node::Binary(BinaryOp::Pow, _, _)))
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn collects_referenced_fields() {
        let node = parse("{weight} / ({height} / 100) ^ 2 > 30 and not {pregnant}").expect("parse");
        let mut fields = BTreeSet::new();
        node.collect_fields(&mut fields);
        assert_eq!(
            fields.into_iter().collect::<Vec<_>>(),
            vec!["height", "pregnant", "weight"]
        );
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(parse("sqrt(4)").is_err());
        assert!(parse("abs(1, 2)").is_err());
    }

    #[test]
    fn rejects_chained_comparison() {
        assert!(parse("1 < {a} < 3").is_err());
    }

    #[test]
    fn caps_nesting_depth() {
        let source = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(parse(&source).is_err());
        let shallow = format!("{}1{}", "(".repeat(8), ")".repeat(8));
        assert!(parse(&shallow).is_ok());
    }
}
