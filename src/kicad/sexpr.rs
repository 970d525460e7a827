//! Minimal S-expression reader for KiCad board files. Every node keeps the
//! byte span it was read from so single values can be edited in place
//! without reformatting the rest of the file.

use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("s-expression error at byte {offset}: {message}")]
pub struct SExprError {
    pub offset: usize,
    pub message: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Symbol(String),
    Str(String),
    List(Vec<SExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SExpr {
    pub value: Value,
    pub span: Range<usize>,
}

impl SExpr {
    pub fn items(&self) -> &[SExpr] {
        match &self.value {
            Value::List(items) => items,
            _ => &[],
        }
    }

    /// Symbol or string contents.
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            Value::Symbol(s) | Value::Str(s) => Some(s.as_str()),
            Value::List(_) => None,
        }
    }

    /// First element of a list when it is a symbol: `(tag ...)`.
    pub fn tag(&self) -> Option<&str> {
        match &self.items().first()?.value {
            Value::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn children<'a, 't>(&'a self, tag: &'t str) -> impl Iterator<Item = &'a SExpr> + use<'a, 't> {
        self.items().iter().filter(move |item| item.tag() == Some(tag))
    }

    pub fn child(&self, tag: &str) -> Option<&SExpr> {
        self.items().iter().find(|item| item.tag() == Some(tag))
    }

    /// Byte offset of the closing parenthesis of a list.
    pub fn close_offset(&self) -> usize {
        self.span.end.saturating_sub(1)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn err(&self, message: &'static str) -> SExprError {
        SExprError {
            offset: self.pos,
            message,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn node(&mut self) -> Result<SExpr, SExprError> {
        self.skip_whitespace();
        let start = self.pos;
        match self.bytes.get(self.pos) {
            None => Err(self.err("unexpected end of input")),
            Some(b'(') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.bytes.get(self.pos) {
                        None => return Err(self.err("unclosed list")),
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => items.push(self.node()?),
                    }
                }
                Ok(SExpr {
                    value: Value::List(items),
                    span: start..self.pos,
                })
            }
            Some(b')') => Err(self.err("unexpected ')'")),
            Some(b'"') => {
                self.pos += 1;
                let mut out = Vec::new();
                loop {
                    match self.bytes.get(self.pos) {
                        None => return Err(self.err("unterminated string")),
                        Some(b'"') => {
                            self.pos += 1;
                            break;
                        }
                        Some(b'\\') => {
                            let escaped = *self
                                .bytes
                                .get(self.pos + 1)
                                .ok_or_else(|| self.err("unterminated string"))?;
                            out.push(match escaped {
                                b'n' => b'\n',
                                b't' => b'\t',
                                other => other,
                            });
                            self.pos += 2;
                        }
                        Some(b) => {
                            out.push(*b);
                            self.pos += 1;
                        }
                    }
                }
                Ok(SExpr {
                    value: Value::Str(String::from_utf8_lossy(&out).into_owned()),
                    span: start..self.pos,
                })
            }
            Some(_) => {
                while let Some(b) = self.bytes.get(self.pos) {
                    if b.is_ascii_whitespace() || *b == b'(' || *b == b')' {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(SExpr {
                    value: Value::Symbol(
                        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned(),
                    ),
                    span: start..self.pos,
                })
            }
        }
    }
}

/// Parses one top-level expression; trailing whitespace is allowed.
pub fn parse(text: &str) -> Result<SExpr, SExprError> {
    let mut reader = Reader {
        bytes: text.as_bytes(),
        pos: 0,
    };
    let root = reader.node()?;
    reader.skip_whitespace();
    if reader.pos != reader.bytes.len() {
        return Err(reader.err("trailing data after expression"));
    }
    Ok(root)
}

/// `text` as a quoted KiCad string.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
