//! Raw query dialect understood by [`InMemoryStore`](super::InMemoryStore).
//!
//! ```text
//! SELECT * FROM <set> [WHERE <column> (= | LIKE) <operand> [AND ...]] [;]
//! operand := $n | 'text' | integer
//! ```
//!
//! Keywords are case-insensitive; `$n` is 1-based. `LIKE` understands `%`
//! (any run of characters) and `_` (exactly one character).

use serde_json::Value as JsonValue;

use tessera_core::{KeyValue, Row, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub set: String,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Like,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub comparison: Comparison,
    pub operand: KeyValue,
}

impl Predicate {
    pub fn matches(&self, row: &Row) -> bool {
        let Some(value) = row.get(&self.column) else {
            return false;
        };
        match (self.comparison, &self.operand) {
            (Comparison::Eq, operand) => operand.matches(value),
            (Comparison::Like, KeyValue::Str(pattern)) => match value {
                JsonValue::String(text) => like(pattern, text),
                _ => false,
            },
            (Comparison::Like, KeyValue::Int(_)) => false,
        }
    }
}

impl SelectStatement {
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Text(String),
    Symbol(char),
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidQuery(message.into())
}

fn tokenize(sql: &str) -> Result<Vec<Token>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some(c) => text.push(c),
                        None => return Err(invalid("unterminated string literal")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '*' | '=' | ';' => {
                chars.next();
                tokens.push(Token::Symbol(c));
            }
            c if c.is_alphanumeric() || matches!(c, '_' | '$' | '-') => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || matches!(c, '_' | '$' | '-') {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }

    // trailing statement terminator
    if tokens.last() == Some(&Token::Symbol(';')) {
        tokens.pop();
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: std::vec::IntoIter<Token>,
    params: &'a [KeyValue],
}

impl Parser<'_> {
    fn next(&mut self) -> Result<Token, StoreError> {
        self.tokens
            .next()
            .ok_or_else(|| invalid("unexpected end of query"))
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), StoreError> {
        match self.next()? {
            Token::Word(w) if w.eq_ignore_ascii_case(keyword) => Ok(()),
            other => Err(invalid(format!("expected {keyword}, found {other:?}"))),
        }
    }

    fn identifier(&mut self) -> Result<String, StoreError> {
        match self.next()? {
            Token::Word(w) if is_identifier(&w) => Ok(w),
            other => Err(invalid(format!("expected identifier, found {other:?}"))),
        }
    }

    fn operand(&mut self) -> Result<KeyValue, StoreError> {
        match self.next()? {
            Token::Text(text) => Ok(KeyValue::Str(text)),
            Token::Word(w) if w.starts_with('$') => {
                let position: usize = w[1..]
                    .parse()
                    .map_err(|_| invalid(format!("bad parameter reference {w}")))?;
                position
                    .checked_sub(1)
                    .and_then(|idx| self.params.get(idx))
                    .cloned()
                    .ok_or_else(|| invalid(format!("parameter {w} was not supplied")))
            }
            Token::Word(w) => w
                .parse::<i64>()
                .map(KeyValue::Int)
                .map_err(|_| invalid(format!("expected literal or parameter, found {w}"))),
            other => Err(invalid(format!("expected operand, found {other:?}"))),
        }
    }

    fn predicate(&mut self) -> Result<Predicate, StoreError> {
        let column = self.identifier()?;
        let comparison = match self.next()? {
            Token::Symbol('=') => Comparison::Eq,
            Token::Word(w) if w.eq_ignore_ascii_case("LIKE") => Comparison::Like,
            other => return Err(invalid(format!("expected = or LIKE, found {other:?}"))),
        };
        let operand = self.operand()?;
        Ok(Predicate {
            column,
            comparison,
            operand,
        })
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Parse a statement, resolving positional parameters.
pub fn parse(sql: &str, params: &[KeyValue]) -> Result<SelectStatement, StoreError> {
    let mut parser = Parser {
        tokens: tokenize(sql)?.into_iter(),
        params,
    };

    parser.keyword("SELECT")?;
    match parser.next()? {
        Token::Symbol('*') => {}
        other => return Err(invalid(format!("only SELECT * is supported, found {other:?}"))),
    }
    parser.keyword("FROM")?;
    let set = parser.identifier()?;

    let mut predicates = Vec::new();
    match parser.tokens.next() {
        None => {}
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("WHERE") => loop {
            predicates.push(parser.predicate()?);
            match parser.tokens.next() {
                None => break,
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("AND") => continue,
                Some(other) => return Err(invalid(format!("expected AND, found {other:?}"))),
            }
        },
        Some(other) => return Err(invalid(format!("expected WHERE, found {other:?}"))),
    }

    Ok(SelectStatement { set, predicates })
}

fn like(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // matched[j]: pattern prefix consumed so far matches text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut any = false;
                for j in 0..=text.len() {
                    any |= matched[j];
                    next[j] = any;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}
