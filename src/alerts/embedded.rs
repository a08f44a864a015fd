//! Parser for alert metadata embedded in a single log field
//!
//! Notice-style logs carry the record that triggered an alert as one field
//! rendered in the sensor's bracketed syntax:
//!
//! ```text
//! [ts=1620000000.1, uid=C1x, id=[orig_h=10.0.0.1, orig_p=52314/tcp, resp_h=203.0.113.5, resp_p=443/tcp]]
//! ```
//!
//! Nested records flatten to dotted names (`id.orig_h`), which is the naming
//! the `#fields` header already uses for the same values. Nesting is capped
//! at [`MAX_DEPTH`] levels.

use thiserror::Error;

/// Values the sensor uses for "no value"
const UNSET_MARKERS: [&str; 2] = ["-", "<uninitialized>"];

/// Deepest record nesting accepted, counting the outer record
pub const MAX_DEPTH: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmbeddedError {
    #[error("expected '{expected}' at offset {offset}")]
    Expected { expected: char, offset: usize },

    #[error("invalid field name at offset {0}")]
    InvalidName(usize),

    #[error("unexpected trailing input at offset {0}")]
    TrailingInput(usize),

    #[error("unterminated record")]
    Unterminated,

    #[error("records nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Parse a bracketed record and flatten it into `(dotted name, value)` pairs
///
/// Pairs come back in the order they appear. Unset markers read as `None`.
pub fn parse_embedded(input: &str) -> Result<Vec<(String, Option<String>)>, EmbeddedError> {
    let mut parser = Parser {
        input: input.trim(),
        pos: 0,
    };
    let mut out = Vec::new();
    parser.record("", 1, &mut out)?;

    if parser.pos != parser.input.len() {
        return Err(EmbeddedError::TrailingInput(parser.pos));
    }
    Ok(out)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn expect(&mut self, expected: char) -> Result<(), EmbeddedError> {
        if self.rest().starts_with(expected) {
            self.pos += expected.len_utf8();
            Ok(())
        } else if self.rest().is_empty() {
            Err(EmbeddedError::Unterminated)
        } else {
            Err(EmbeddedError::Expected {
                expected,
                offset: self.pos,
            })
        }
    }

    fn record(
        &mut self,
        prefix: &str,
        depth: usize,
        out: &mut Vec<(String, Option<String>)>,
    ) -> Result<(), EmbeddedError> {
        if depth > MAX_DEPTH {
            return Err(EmbeddedError::TooDeep(MAX_DEPTH));
        }
        self.expect('[')?;
        if self.rest().starts_with(']') {
            self.pos += 1;
            return Ok(());
        }

        loop {
            let name_start = self.pos;
            let name_len = self.rest().find('=').ok_or(EmbeddedError::Unterminated)?;
            let name = self.rest()[..name_len].trim();
            if name.is_empty() || name.contains(|c: char| matches!(c, ',' | '[' | ']')) {
                return Err(EmbeddedError::InvalidName(name_start));
            }
            self.pos += name_len + 1;

            let full_name = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            };

            if self.rest().starts_with('[') {
                self.record(&full_name, depth + 1, out)?;
            } else {
                let value = self.scalar();
                let value = if UNSET_MARKERS.contains(&value) {
                    None
                } else {
                    Some(value.to_string())
                };
                out.push((full_name, value));
            }

            if self.rest().starts_with(", ") {
                self.pos += 2;
            } else {
                return self.expect(']');
            }
        }
    }

    /// Scalar runs until the next field separator or the closing bracket
    fn scalar(&mut self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|(i, c)| *c == ']' || rest[*i..].starts_with(", "))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }
}
