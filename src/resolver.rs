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

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FieldValue, ValueKind};

/// A codec for one placeholder type.
///
/// A resolver decides how a field value is rendered into a path segment, how
/// a matched segment is read back into a value, and what regex fragment the
/// placeholder contributes when matching whole paths. Placeholder names
/// without a registered resolver are treated as opaque strings.
#[derive(Debug, Clone, PartialEq, derive_more::From, Serialize, Deserialize)]
#[serde(try_from = "ResolverSpec", into = "ResolverSpec")]
pub enum Resolver {
    Integer(IntegerResolver),
    Text(StringResolver),
}

impl Resolver {
    /// Resolver for zero-padded non-negative integers of at least `width` digits.
    pub fn integer(width: usize) -> Self {
        Self::Integer(IntegerResolver::new(width))
    }

    /// Resolver for strings constrained by `pattern`. The pattern is anchored
    /// when validating values but embedded unanchored in path regexes.
    pub fn text(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self::Text(StringResolver::new(pattern)?))
    }

    /// The value shape this resolver formats and parses.
    pub fn expects(&self) -> ValueKind {
        match self {
            Resolver::Integer(_) => ValueKind::Integer,
            Resolver::Text(_) => ValueKind::Text,
        }
    }

    /// Render `value` into its canonical segment text.
    pub fn format(&self, value: &FieldValue) -> Result<String, FormatError> {
        match (self, value) {
            (Resolver::Integer(int), FieldValue::Int(i)) => int.format(*i),
            (Resolver::Text(txt), FieldValue::Text(s)) => txt.format(s),
            _ => Err(FormatError::WrongKind {
                expected: self.expects(),
                found: value.kind(),
            }),
        }
    }

    /// Read matched segment text back into a value.
    pub fn parse(&self, text: &str) -> Result<FieldValue, ParseError> {
        match self {
            Resolver::Integer(int) => int.parse(text).map(FieldValue::Int),
            Resolver::Text(txt) => txt.parse(text).map(FieldValue::Text),
        }
    }

    /// The unanchored regex fragment this placeholder matches as.
    pub fn fragment(&self) -> String {
        match self {
            Resolver::Integer(int) => int.fragment(),
            Resolver::Text(txt) => txt.fragment(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerResolver {
    width: usize,
}

impl IntegerResolver {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Decimal digits of `value`, left-padded with `0` to at least the
    /// configured width. Negative values have no path representation.
    pub fn format(&self, value: i64) -> Result<String, FormatError> {
        if value < 0 {
            return Err(FormatError::Negative(value));
        }
        Ok(format!("{value:0width$}", width = self.width))
    }

    /// Inverse of [`format`](Self::format): a run of digits at least as long
    /// as the configured width, with no sign or other characters.
    pub fn parse(&self, text: &str) -> Result<i64, ParseError> {
        if text.len() < self.width || !text.chars().all(|c| c.is_ascii_digit()) {
            return Err(ParseError::Digits {
                width: self.width,
                found: text.into(),
            });
        }
        text.parse().map_err(|_| ParseError::OutOfRange {
            found: text.into(),
        })
    }

    pub fn fragment(&self) -> String {
        format!(r"\d{{{},}}", self.width)
    }
}

#[derive(Debug, Clone)]
pub struct StringResolver {
    pattern: String,
    anchored: Regex,
}

impl StringResolver {
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let anchored = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self { pattern, anchored })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The input itself, if it fully matches the pattern.
    pub fn format(&self, value: &str) -> Result<String, FormatError> {
        if self.anchored.is_match(value) {
            Ok(value.into())
        } else {
            Err(FormatError::NoMatch {
                value: value.into(),
                pattern: self.pattern.clone(),
            })
        }
    }

    pub fn parse(&self, text: &str) -> Result<String, ParseError> {
        if self.anchored.is_match(text) {
            Ok(text.into())
        } else {
            Err(ParseError::NoMatch {
                found: text.into(),
                pattern: self.pattern.clone(),
            })
        }
    }

    pub fn fragment(&self) -> String {
        format!("(?:{})", self.pattern)
    }
}

// Regex offers no equality; the source pattern decides it here.
impl PartialEq for StringResolver {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// Serialized form of a [`Resolver`], so hosts can describe resolvers in
/// whatever configuration format they already use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResolverSpec {
    Integer { width: usize },
    String { pattern: String },
}

impl TryFrom<ResolverSpec> for Resolver {
    type Error = regex::Error;

    fn try_from(spec: ResolverSpec) -> Result<Self, Self::Error> {
        match spec {
            ResolverSpec::Integer { width } => Ok(Resolver::integer(width)),
            ResolverSpec::String { pattern } => Resolver::text(pattern),
        }
    }
}

impl From<Resolver> for ResolverSpec {
    fn from(resolver: Resolver) -> Self {
        match resolver {
            Resolver::Integer(int) => ResolverSpec::Integer { width: int.width },
            Resolver::Text(txt) => ResolverSpec::String {
                pattern: txt.pattern,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("expected {expected} value, found {found}")]
    WrongKind {
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("cannot format negative value {0}")]
    Negative(i64),
    #[error("{value:?} does not match {pattern:?}")]
    NoMatch { value: String, pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected a run of at least {width} digits, found {found:?}")]
    Digits { width: usize, found: String },
    #[error("{found:?} is too large for an integer field")]
    OutOfRange { found: String },
    #[error("{found:?} does not match {pattern:?}")]
    NoMatch { found: String, pattern: String },
}


#[cfg(test)]
mod string_tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::{FormatError, ParseError, StringResolver};

    #[rstest]
    #[case(r"\w+", "test")]
    #[case(r"\w+", "under_scored")]
    #[case(r"[a-z]+\d*", "shot01")]
    fn format_accepts_matching(#[case] pattern: &str, #[case] value: &str) {
        let resolver = StringResolver::new(pattern).unwrap();
        assert_eq!(resolver.format(value).unwrap(), value);
    }

    #[rstest]
    #[case(r"\w+", "has space")]
    #[case(r"\w+", "")]
    #[case(r"[a-z]+", "UPPER")]
    // The whole input must match, not just a prefix
    #[case(r"[a-z]+", "abc!")]
    fn format_rejects_non_matching(#[case] pattern: &str, #[case] value: &str) {
        let resolver = StringResolver::new(pattern).unwrap();
        assert_matches!(resolver.format(value), Err(FormatError::NoMatch { .. }));
    }

    #[test]
    fn parse() {
        let resolver = StringResolver::new(r"\w+").unwrap();
        assert_eq!(resolver.parse("test").unwrap(), "test");
        assert_matches!(resolver.parse("no spaces"), Err(ParseError::NoMatch { .. }));
    }

    #[test]
    fn fragment_is_grouped() {
        let resolver = StringResolver::new(r"a|b").unwrap();
        assert_eq!(resolver.fragment(), "(?:a|b)");
    }

    #[test]
    fn invalid_pattern() {
        assert!(StringResolver::new("(unclosed").is_err());
    }
}
