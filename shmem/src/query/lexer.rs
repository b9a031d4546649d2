use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use super::QueryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    Colon,
    Comma,
    Star,
    LParen,
    RParen,
    Op(CmpOp),
    Integer(i32),
    Float(f32),
    Str(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Colon => write!(f, "':'"),
            Token::Comma => write!(f, "','"),
            Token::Star => write!(f, "'*'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Op(op) => write!(f, "'{}'", op),
            Token::Integer(v) => write!(f, "integer {}", v),
            Token::Float(v) => write!(f, "float {:?}", v),
            Token::Str(v) => write!(f, "string {:?}", v),
        }
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Splits the whole input into tokens tagged with their byte offset.
    pub fn tokenize(mut self) -> Result<Vec<(usize, Token)>, QueryError> {
        let mut tokens = Vec::new();
        while let Some(&(pos, c)) = self.chars.peek() {
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                ':' => self.single(Token::Colon),
                ',' => self.single(Token::Comma),
                '*' => self.single(Token::Star),
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '=' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some((_, '=')) => Token::Op(CmpOp::Eq),
                        _ => return Err(QueryError::new(pos, "expected '=='")),
                    }
                }
                '<' | '>' => {
                    self.chars.next();
                    let or_equal = self.eat('=');
                    Token::Op(match (c, or_equal) {
                        ('<', false) => CmpOp::Lt,
                        ('<', true) => CmpOp::Le,
                        ('>', false) => CmpOp::Gt,
                        _ => CmpOp::Ge,
                    })
                }
                '"' => self.string(pos)?,
                '-' | '+' | '.' | '0'..='9' => self.number(pos)?,
                c if c.is_alphabetic() || c == '_' => self.ident(),
                other => return Err(QueryError::new(pos, format!("unexpected character {:?}", other))),
            };
            tokens.push((pos, token));
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(ident)
    }

    fn string(&mut self, start: usize) -> Result<Token, QueryError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(Token::Str(value)),
                Some((pos, '\\')) => match self.chars.next() {
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    _ => return Err(QueryError::new(pos, "unknown escape sequence")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(QueryError::new(start, "unterminated string")),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Token, QueryError> {
        let mut end = start;
        let mut is_float = false;
        while let Some(&(pos, c)) = self.chars.peek() {
            let sign = (c == '-' || c == '+') && pos == start;
            if c.is_ascii_digit() || sign || c == '.' {
                is_float |= c == '.';
                end = pos + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        if is_float {
            text.parse::<f32>()
                .map(Token::Float)
                .map_err(|_| QueryError::new(start, format!("invalid float literal {:?}", text)))
        } else {
            text.parse::<i32>()
                .map(Token::Integer)
                .map_err(|_| QueryError::new(start, format!("invalid integer literal {:?}", text)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|(_, t)| t).collect()
    }

    #[test]
    fn field_with_operator() {
        assert_eq!(
            kinds("integer:>=-3"),
            vec![
                Token::Ident("integer".into()),
                Token::Colon,
                Token::Op(CmpOp::Ge),
                Token::Integer(-3),
            ]
        );
    }

    #[test]
    fn mixed_literals() {
        assert_eq!(
            kinds(r#" "a \"b\"" , 1.5,*,==,<"#),
            vec![
                Token::Str("a \"b\"".into()),
                Token::Comma,
                Token::Float(1.5),
                Token::Comma,
                Token::Star,
                Token::Comma,
                Token::Op(CmpOp::Eq),
                Token::Comma,
                Token::Op(CmpOp::Lt),
            ]
        );
    }

    #[test]
    fn positions_are_byte_offsets() {
        let tokens = Lexer::new("a: 12").tokenize().unwrap();
        assert_eq!(tokens.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn errors() {
        assert_eq!(Lexer::new("\"open").tokenize().unwrap_err().position, 0);
        assert_eq!(Lexer::new("x = 1").tokenize().unwrap_err().position, 2);
        assert!(Lexer::new("1.2.3").tokenize().is_err());
        assert!(Lexer::new("99999999999").tokenize().is_err());
        assert!(Lexer::new("#").tokenize().is_err());
    }
}
