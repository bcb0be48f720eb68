// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! A line-addressed cursor over macro-file source. Comment and indentation
//! rules live here and nowhere else.

use std::fmt;

/// `(line, column)`, both zero-based. Error rendering is one-based.
pub type Position = (usize, usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line_text: String,
    pub position: Position,
    pub source_name: String,
}
impl ParseError {
    pub fn expected_got(
        expected: Option<&str>,
        got: Option<&str>,
        buffer: &ParseBuffer,
    ) -> Self {
        let mut message = String::new();
        if let Some(expected) = expected {
            message.push_str(&format!("Expected: {expected}\n"));
        }
        if let Some(got) = got {
            message.push_str(&format!("Got: {got}\n"));
        }
        // trim the trailing newline; render() adds its own structure
        let message = message.trim_end().to_string();
        Self::at(message, buffer, buffer.at())
    }

    pub fn at(message: String, buffer: &ParseBuffer, position: Position) -> Self {
        Self {
            message,
            line_text: buffer.line_text(position.0),
            position,
            source_name: buffer.source_name().to_string(),
        }
    }

}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caret = " ".repeat(self.position.1) + "^";
        write!(
            f,
            "{}\nWhile parsing:\n{}\n{}\nsource: <{}>, position:{},{}",
            self.message,
            self.line_text,
            caret,
            self.source_name,
            self.position.0 + 1,
            self.position.1 + 1
        )
    }
}
impl std::error::Error for ParseError {}

#[derive(Clone)]
pub struct ParseBuffer {
    lines: Vec<Vec<char>>,
    line: usize,
    col: usize,
    source_name: String,
    comment_char: char,
}
impl ParseBuffer {
    pub fn new(text: &str, source_name: &str) -> Self {
        Self::new_with_comment_char(text, source_name, '#')
    }

    pub fn new_with_comment_char(text: &str, source_name: &str, comment_char: char) -> Self {
        Self {
            lines: text.split('\n').map(|line| line.chars().collect()).collect(),
            line: 0,
            col: 0,
            source_name: source_name.to_string(),
            comment_char,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn at(&self) -> Position {
        (self.line, self.col)
    }

    /// Rewind (or fast-forward) to a previously-observed position.
    pub fn jump(&mut self, position: Position) {
        self.line = position.0;
        self.col = position.1;
    }

    pub fn line_text(&self, line: usize) -> String {
        self.lines
            .get(line)
            .map(|chars| chars.iter().collect())
            .unwrap_or_default()
    }

    pub fn at_end_of_file(&self) -> bool {
        self.line >= self.lines.len()
    }

    pub fn at_end_of_line(&self) -> bool {
        self.at_end_of_file() || self.col >= self.lines[self.line].len()
    }

    /// The character under the cursor. Running past the end of the current
    /// line is always a caller bug in grammar terms, so it raises.
    pub fn peek(&self) -> Result<char, ParseError> {
        if self.at_end_of_line() {
            return Err(ParseError::at(
                "unexpectedly reached end of line".to_string(),
                self,
                self.at(),
            ));
        }
        Ok(self.lines[self.line][self.col])
    }

    pub fn advance(&mut self, n: usize) {
        self.col += n;
    }

    /// Moves to column zero of the next line; past the last line raises.
    pub fn newline(&mut self) -> Result<(), ParseError> {
        if self.at_end_of_file() {
            return Err(ParseError::at(
                "unexpectedly reached end of file".to_string(),
                self,
                self.at(),
            ));
        }
        self.line += 1;
        self.col = 0;
        Ok(())
    }

    pub fn skip_whitespace(&mut self) {
        while !self.at_end_of_line() && self.lines[self.line][self.col].is_whitespace() {
            self.col += 1;
        }
    }

    /// `#` to end of line, if the cursor is on the comment character.
    pub fn skip_comment(&mut self) {
        if !self.at_end_of_line() && self.lines[self.line][self.col] == self.comment_char {
            self.col = self.lines[self.line].len();
        }
    }

    /// Advances across whitespace, comments, and line breaks until a data
    /// character or end of file.
    pub fn skip_till_data(&mut self, skip_comments: bool) {
        loop {
            if self.at_end_of_file() {
                return;
            }
            self.skip_whitespace();
            if skip_comments {
                self.skip_comment();
            }
            if self.at_end_of_line() {
                self.line += 1;
                self.col = 0;
                continue;
            }
            return;
        }
    }

    /// The verbatim text between two positions, newlines included. `start`
    /// may equal `end`.
    pub fn slice_between(&self, start: Position, end: Position) -> String {
        let mut out = String::new();
        let mut line = start.0;
        let mut col = start.1;
        while (line, col) < end {
            let Some(chars) = self.lines.get(line) else {
                break;
            };
            if line == end.0 {
                out.extend(chars[col.min(chars.len())..end.1.min(chars.len())].iter());
                break;
            }
            out.extend(chars[col.min(chars.len())..].iter());
            out.push('\n');
            line += 1;
            col = 0;
        }
        out
    }

    pub fn read_to_end_of_line(&mut self) -> String {
        let start = self.at();
        let end = (self.line, self.lines.get(self.line).map_or(0, Vec::len));
        self.col = end.1;
        self.slice_between(start, end)
    }

    /// Reads a run of non-whitespace characters on the current line.
    pub fn read_whitespace_token(&mut self) -> String {
        let start = self.at();
        while !self.at_end_of_line() && !self.lines[self.line][self.col].is_whitespace() {
            self.col += 1;
        }
        self.slice_between(start, self.at())
    }

    /// True when the verbatim text at the cursor equals `expected` (within
    /// the current line).
    pub fn has_at_cursor(&self, expected: &str) -> bool {
        let Some(chars) = self.lines.get(self.line) else {
            return false;
        };
        let mut i = self.col;
        for wanted in expected.chars() {
            if chars.get(i) != Some(&wanted) {
                return false;
            }
            i += 1;
        }
        true
    }
}
impl fmt::Debug for ParseBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseBuffer")
            .field("source_name", &self.source_name)
            .field("position", &self.at())
            .finish()
    }
}
