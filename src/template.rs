// Copyright 2024 Diamond Light Source
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::error::Error;
use std::fmt::{self, Display};

/// One span of a parsed template, either literal text or a `{name}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Field(String),
}

impl Part {
    fn field(&self) -> Option<&str> {
        match self {
            Part::Literal(_) => None,
            Part::Field(name) => Some(name),
        }
    }
}

/// A template string broken into literal and placeholder parts.
///
/// Placeholder names are non-empty runs of word characters. Braces are
/// reserved and cannot be escaped; a `}` with no matching opener is kept as
/// literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.parts {
            match p {
                Part::Literal(lit) => f.write_str(lit)?,
                Part::Field(name) => write!(f, "{{{name}}}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum ParseState {
    /// We haven't started parsing anything yet
    Init,
    /// We are parsing a placeholder name
    PartialKey(String),
    /// We are parsing a literal section of the template
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateError {
    position: usize,
    kind: ErrorKind,
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error parsing template: {} at {}",
            self.kind, self.position
        )
    }
}

impl Error for TemplateError {}

/// The reasons why a template could be invalid
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// Template placeholders cannot contain other placeholders
    Nested,
    /// Placeholders cannot be empty
    Empty,
    /// A placeholder was opened but not closed
    Incomplete,
    /// Placeholder names are limited to word characters
    InvalidName,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Nested => f.write_str("Nested placeholder"),
            ErrorKind::Empty => f.write_str("Empty placeholder"),
            ErrorKind::Incomplete => f.write_str("Unclosed placeholder"),
            ErrorKind::InvalidName => f.write_str("Invalid placeholder name"),
        }
    }
}

impl TemplateError {
    fn new(position: usize, kind: ErrorKind) -> Self {
        Self { position, kind }
    }
    fn nested(position: usize) -> Self {
        Self::new(position, ErrorKind::Nested)
    }
    fn incomplete(position: usize) -> Self {
        Self::new(position, ErrorKind::Incomplete)
    }
    fn empty(position: usize) -> Self {
        Self::new(position, ErrorKind::Empty)
    }
    fn invalid(position: usize) -> Self {
        Self::new(position, ErrorKind::InvalidName)
    }
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
    pub fn position(&self) -> usize {
        self.position
    }
}

fn valid_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Template {
    pub fn parse<S: AsRef<str>>(template: S) -> Result<Self, TemplateError> {
        let mut parts = vec![];
        let mut state = ParseState::Init;
        for (i, c) in template.as_ref().chars().enumerate() {
            match c {
                '{' => match state {
                    ParseState::Init => state = ParseState::PartialKey(String::new()),
                    ParseState::PartialKey(_) => return Err(TemplateError::nested(i)),
                    ParseState::Literal(text) => {
                        parts.push(Part::Literal(text));
                        state = ParseState::PartialKey(String::new());
                    }
                },
                '}' => match state {
                    ParseState::Init => state = ParseState::Literal("}".into()),
                    ParseState::PartialKey(key) if key.trim().is_empty() => {
                        return Err(TemplateError::empty(i))
                    }
                    ParseState::PartialKey(key) => {
                        if !valid_name(&key) {
                            return Err(TemplateError::invalid(i));
                        }
                        parts.push(Part::Field(key));
                        state = ParseState::Init;
                    }
                    ParseState::Literal(text) => state = ParseState::Literal(text + "}"),
                },
                c => match state {
                    ParseState::Init => state = ParseState::Literal(c.into()),
                    ParseState::PartialKey(mut key) => {
                        key.push(c);
                        state = ParseState::PartialKey(key);
                    }
                    ParseState::Literal(mut text) => {
                        text.push(c);
                        state = ParseState::Literal(text);
                    }
                },
            }
        }
        match state {
            ParseState::Init => {}
            ParseState::PartialKey(_) => {
                return Err(TemplateError::incomplete(template.as_ref().len()))
            }
            ParseState::Literal(text) => parts.push(Part::Literal(text)),
        }
        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Iterate through all the placeholder names in this template. Names may be
    /// duplicated if they are referenced multiple times.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| p.field())
    }
}
