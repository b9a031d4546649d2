use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::errors::SpaceError;
use crate::query::lexer::{Lexer, Token};
use crate::query::QueryError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i32),
    Float(f32),
    String(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::String(v) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Integer => write!(f, "integer"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::String => write!(f, "string"),
        }
    }
}

/// An ordered record of values, stored in one slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    pub fn new(values: Vec<Value>) -> Tuple {
        Tuple(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes into the front of `buf` and returns the bytes used.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, SpaceError> {
        match postcard::to_slice(self, buf) {
            Ok(used) => Ok(used.len()),
            Err(postcard::Error::SerializeBufferFull) => Err(SpaceError::Encode(format!(
                "tuple {} does not fit into {} bytes",
                self,
                buf.len()
            ))),
            Err(e) => Err(SpaceError::Encode(e.to_string())),
        }
    }

    /// Reads a tuple from the front of a slot payload; trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Tuple, SpaceError> {
        postcard::take_from_bytes::<Tuple>(buf)
            .map(|(tuple, _)| tuple)
            .map_err(|e| SpaceError::Decode(e.to_string()))
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Tuple(values)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Parses the literal syntax shared with queries: `1, "abc", 2.5`, with
/// optional surrounding parentheses.
impl FromStr for Tuple {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Lexer::new(s).tokenize()?.into_iter().peekable();
        let parenthesized = matches!(tokens.peek(), Some((_, Token::LParen)));
        if parenthesized {
            tokens.next();
        }
        let mut values = Vec::new();
        loop {
            match tokens.next() {
                Some((_, Token::Integer(v))) => values.push(Value::Integer(v)),
                Some((_, Token::Float(v))) => values.push(Value::Float(v)),
                Some((_, Token::Str(v))) => values.push(Value::String(v)),
                Some((pos, token)) => {
                    return Err(QueryError::new(pos, format!("expected a value, found {}", token)))
                }
                None => return Err(QueryError::new(s.len(), "expected a value")),
            }
            match tokens.next() {
                Some((_, Token::Comma)) => continue,
                Some((_, Token::RParen)) if parenthesized => match tokens.next() {
                    None => break,
                    Some((pos, token)) => {
                        return Err(QueryError::new(pos, format!("unexpected {} after ')'", token)))
                    }
                },
                None if !parenthesized => break,
                None => return Err(QueryError::new(s.len(), "missing ')'")),
                Some((pos, token)) => {
                    return Err(QueryError::new(pos, format!("expected ',', found {}", token)))
                }
            }
        }
        Ok(Tuple(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TUPLE_SIZE;

    fn sample() -> Tuple {
        Tuple::new(vec![
            Value::Integer(-4),
            Value::String("abc".to_string()),
            Value::Float(2.5),
        ])
    }

    #[test]
    fn decode_ignores_slot_padding() {
        let mut buf = [0u8; TUPLE_SIZE];
        let used = sample().encode_into(&mut buf).unwrap();
        assert!(used < TUPLE_SIZE);
        assert_eq!(Tuple::decode(&buf).unwrap(), sample());
    }

    #[test]
    fn too_large_for_slot() {
        let mut buf = [0u8; TUPLE_SIZE];
        let tuple = Tuple::new(vec![Value::String("y".repeat(TUPLE_SIZE))]);
        assert!(matches!(tuple.encode_into(&mut buf), Err(SpaceError::Encode(_))));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(matches!(Tuple::decode(&[0xff; 4]), Err(SpaceError::Decode(_))));
    }

    #[test]
    fn display() {
        assert_eq!(sample().to_string(), "(-4, \"abc\", 2.5)");
        assert_eq!(Tuple::new(vec![]).to_string(), "()");
    }

    #[test]
    fn parse_literals() {
        assert_eq!("-4, \"abc\", 2.5".parse::<Tuple>().unwrap(), sample());
        assert_eq!("(-4, \"abc\", 2.5)".parse::<Tuple>().unwrap(), sample());
        assert_eq!(sample().to_string().parse::<Tuple>().unwrap(), sample());
    }

    #[test]
    fn parse_errors() {
        assert!("".parse::<Tuple>().is_err());
        assert!("1,".parse::<Tuple>().is_err());
        assert!("(1, 2".parse::<Tuple>().is_err());
        assert!("1 2".parse::<Tuple>().is_err());
        assert!("integer:1".parse::<Tuple>().is_err());
    }
}
