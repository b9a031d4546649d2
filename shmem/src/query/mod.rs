use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::tuple::{Tuple, Value, ValueKind};

pub mod lexer;

use lexer::{CmpOp, Lexer, Token};

/// A malformed query or tuple literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryError {
    /// Byte offset into the source text.
    pub position: usize,
    pub message: String,
}

impl QueryError {
    pub fn new(position: usize, message: impl Into<String>) -> QueryError {
        QueryError {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for QueryError {}

/// Decides whether a slot payload is the one a retrieval is looking for.
pub trait Matcher {
    fn matches(&self, payload: &[u8]) -> bool;
}

impl<F> Matcher for F
where
    F: Fn(&[u8]) -> bool,
{
    fn matches(&self, payload: &[u8]) -> bool {
        self(payload)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Test {
    Any,
    Compare(CmpOp, Value),
}

/// Constraint on one tuple field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldMatcher {
    pub kind: ValueKind,
    pub test: Test,
}

impl FieldMatcher {
    pub fn matches(&self, value: &Value) -> bool {
        if value.kind() != self.kind {
            return false;
        }
        let (op, operand) = match &self.test {
            Test::Any => return true,
            Test::Compare(op, operand) => (op, operand),
        };
        let ordering = match (value, operand) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
            _ => None,
        };
        match ordering {
            Some(ordering) => match op {
                CmpOp::Eq => ordering == Ordering::Equal,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
            },
            None => false,
        }
    }
}

impl fmt::Display for FieldMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.test {
            Test::Any => write!(f, "{}:*", self.kind),
            Test::Compare(op, value) => write!(f, "{}:{}{}", self.kind, op, value),
        }
    }
}

/// A parsed query: one matcher per tuple field, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    fields: Vec<FieldMatcher>,
}

impl Query {
    pub fn fields(&self) -> &[FieldMatcher] {
        &self.fields
    }

    pub fn matches_tuple(&self, tuple: &Tuple) -> bool {
        tuple.len() == self.fields.len()
            && self
                .fields
                .iter()
                .zip(tuple.values())
                .all(|(field, value)| field.matches(value))
    }
}

impl Matcher for Query {
    fn matches(&self, payload: &[u8]) -> bool {
        match Tuple::decode(payload) {
            Ok(tuple) => self.matches_tuple(&tuple),
            Err(e) => {
                trace!(error = %e, "skipping undecodable payload");
                false
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser {
            tokens: Lexer::new(s).tokenize()?,
            pos: 0,
            end: s.len(),
        }
        .query()
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn unexpected(&self, found: Option<(usize, Token)>, expected: &str) -> QueryError {
        match found {
            Some((pos, token)) => QueryError::new(pos, format!("expected {}, found {}", expected, token)),
            None => QueryError::new(self.end, format!("expected {}, found end of query", expected)),
        }
    }

    fn query(mut self) -> Result<Query, QueryError> {
        let mut fields = vec![self.field()?];
        loop {
            match self.next() {
                None => break,
                Some((_, Token::Comma)) => fields.push(self.field()?),
                other => return Err(self.unexpected(other, "','")),
            }
        }
        Ok(Query { fields })
    }

    fn field(&mut self) -> Result<FieldMatcher, QueryError> {
        let kind = match self.next() {
            Some((_, Token::Ident(name))) => match name.as_str() {
                "integer" => ValueKind::Integer,
                "float" => ValueKind::Float,
                "string" => ValueKind::String,
                _ => {
                    let pos = self.tokens[self.pos - 1].0;
                    return Err(QueryError::new(pos, format!("unknown type '{}'", name)));
                }
            },
            other => return Err(self.unexpected(other, "a type name")),
        };
        match self.next() {
            Some((_, Token::Colon)) => {}
            other => return Err(self.unexpected(other, "':'")),
        }
        let (op, literal) = match self.next() {
            Some((_, Token::Star)) => {
                return Ok(FieldMatcher {
                    kind,
                    test: Test::Any,
                })
            }
            Some((_, Token::Op(op))) => (op, self.next()),
            literal => (CmpOp::Eq, literal),
        };
        let value = match (kind, literal) {
            (ValueKind::Integer, Some((_, Token::Integer(v)))) => Value::Integer(v),
            (ValueKind::Float, Some((_, Token::Float(v)))) => Value::Float(v),
            (ValueKind::Float, Some((_, Token::Integer(v)))) => Value::Float(v as f32),
            (ValueKind::String, Some((_, Token::Str(v)))) => Value::String(v),
            (kind, other) => return Err(self.unexpected(other, &format!("'*' or a {} literal", kind))),
        };
        Ok(FieldMatcher {
            kind,
            test: Test::Compare(op, value),
        })
    }
}
