//! Line cursor over a Massif log and the grammar helpers shared by the
//! recognizers.

use crate::{ParseError, Result};
use std::io::BufRead;

/// Separator line that opens every snapshot block.
pub const DELIMITER: &str = "#-----------";

/// A borrowed view of the line the cursor is sitting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub text: &'a str,
    /// 1-based line number.
    pub number: usize,
}

impl<'a> Line<'a> {
    /// Whether this line is the snapshot delimiter.
    pub fn is_delimiter(&self) -> bool {
        self.text == DELIMITER
    }

    /// Build a format error pointing at this line.
    pub fn format_error(&self, expected: impl Into<String>) -> ParseError {
        ParseError::Format {
            line: self.number,
            expected: expected.into(),
            found: self.text.to_string(),
        }
    }

    /// Value of a `key=value` line. The key must match exactly.
    pub fn value_of(&self, key: &str) -> Result<&'a str> {
        match self.text.split_once('=') {
            Some((found, value)) if found == key => Ok(value),
            _ => Err(self.format_error(format!("`{}=<value>`", key))),
        }
    }

    /// Integer value of a `key=value` line.
    pub fn int_value_of(&self, key: &'static str) -> Result<u64> {
        let raw = self.value_of(key)?;
        parse_int(raw, key, self.number)
    }
}

/// Parse an unsigned integer field, reporting failures as conversion errors.
pub fn parse_int(raw: &str, field: &'static str, line: usize) -> Result<u64> {
    raw.parse::<u64>().map_err(|source| ParseError::Conversion {
        line,
        field,
        value: raw.to_string(),
        source,
    })
}

/// Strip leading space characters, returning the rest and how many were removed.
///
/// Only `' '` counts; tabs are left in place and will fail the line grammar.
pub fn leading_spaces(text: &str) -> (&str, usize) {
    let rest = text.trim_start_matches(' ');
    (rest, text.len() - rest.len())
}

/// Pull-based cursor over the lines of any `BufRead`.
///
/// The cursor owns a single line buffer; [`LineCursor::current`] borrows it
/// until the next call to [`LineCursor::advance`].
#[derive(Debug)]
pub struct LineCursor<R> {
    reader: R,
    buf: String,
    line_num: usize,
    at_eof: bool,
}

impl<R: BufRead> LineCursor<R> {
    /// Create a cursor positioned before the first line.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_num: 0,
            at_eof: false,
        }
    }

    /// Move to the next line. Returns `false` once the input is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        if self.at_eof {
            return Ok(false);
        }

        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            self.at_eof = true;
            return Ok(false);
        }

        if self.buf.ends_with('\n') {
            self.buf.pop();
            if self.buf.ends_with('\r') {
                self.buf.pop();
            }
        }
        self.line_num += 1;
        Ok(true)
    }

    /// Move to a line that has to exist, failing with
    /// [`ParseError::UnexpectedEof`] otherwise.
    pub fn expect_line(&mut self, expected: &str) -> Result<()> {
        if self.advance()? {
            Ok(())
        } else {
            Err(ParseError::UnexpectedEof {
                line: self.line_num,
                expected: expected.to_string(),
            })
        }
    }

    /// The line the cursor is sitting on.
    pub fn current(&self) -> Line<'_> {
        Line {
            text: &self.buf,
            number: self.line_num,
        }
    }

    /// Number of the last line read (0 before the first advance).
    pub fn line_num(&self) -> usize {
        self.line_num
    }

    pub fn at_eof(&self) -> bool {
        self.at_eof
    }

    /// Consume this cursor and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
