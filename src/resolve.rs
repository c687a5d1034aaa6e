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

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{instrument, trace};

use crate::resolver::{FormatError, ParseError, Resolver};
use crate::schema::Config;
use crate::template::{Part, Template};
use crate::{FieldValue, Fields, ValueKind};

/// Matches whole paths against one node's chain of templates.
///
/// Each placeholder occurrence becomes a uniquely named capture group; the
/// group names are positional (`f0`, `f1`, …) because placeholder names may
/// themselves end in digits and are not valid group names in general.
#[derive(Debug, Clone)]
pub(crate) struct Matcher {
    regex: Regex,
    /// capture group name → placeholder name, in match order
    groups: Vec<(String, String)>,
}

impl Matcher {
    pub(crate) fn compile<'t>(
        templates: impl Iterator<Item = &'t Template>,
        resolvers: &HashMap<String, Resolver>,
    ) -> Result<Self, regex::Error> {
        let mut pattern = String::from("^");
        let mut groups = Vec::new();
        let mut first = true;
        for template in templates {
            if template.is_empty() {
                continue;
            }
            if !first {
                pattern.push('/');
            }
            first = false;
            for part in template.parts() {
                match part {
                    Part::Literal(lit) => pattern.push_str(&regex::escape(lit)),
                    Part::Field(name) => {
                        let group = format!("f{}", groups.len());
                        let fragment = fragment_for(resolvers.get(name));
                        pattern.push_str(&format!("(?P<{group}>{fragment})"));
                        groups.push((group, name.clone()));
                    }
                }
            }
        }
        pattern.push('$');
        Ok(Self {
            regex: Regex::new(&pattern)?,
            groups,
        })
    }

    /// Match `text` and read every placeholder back into a typed value.
    ///
    /// Captures for a repeated placeholder must agree exactly before parsing.
    pub(crate) fn read(
        &self,
        text: &str,
        resolvers: &HashMap<String, Resolver>,
    ) -> Result<Fields, ResolveError> {
        let caps = self.regex.captures(text).ok_or(ResolveError::NoMatch)?;
        let mut raw: HashMap<&str, &str> = HashMap::with_capacity(self.groups.len());
        for (group, name) in &self.groups {
            let Some(capture) = caps.name(group) else {
                continue;
            };
            match raw.entry(name.as_str()) {
                Entry::Vacant(entry) => {
                    entry.insert(capture.as_str());
                }
                Entry::Occupied(entry) if *entry.get() != capture.as_str() => {
                    return Err(ResolveError::AmbiguousMatch(name.clone()));
                }
                Entry::Occupied(_) => {}
            }
        }

        let mut fields = Fields::with_capacity(raw.len());
        for (name, text) in raw {
            let value = match resolvers.get(name) {
                Some(resolver) => {
                    resolver
                        .parse(text)
                        .map_err(|source| ResolveError::Parse {
                            name: name.into(),
                            source,
                        })?
                }
                None => FieldValue::Text(text.into()),
            };
            fields.insert(name.into(), value);
        }
        Ok(fields)
    }
}

/// Placeholders without a registered resolver match any non-empty run of
/// characters, lazily.
fn fragment_for(resolver: Option<&Resolver>) -> String {
    match resolver {
        Some(resolver) => resolver.fragment(),
        None => ".+?".into(),
    }
}

/// One slash-separated component of a rendered chain, as a run of literal
/// text and still-unbound placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    Literal(String),
    Field(String),
}

impl Config {
    /// Render the path of the node named `key` from `fields`.
    ///
    /// Chain templates are joined with `/`; empty templates contribute
    /// nothing. The result is not normalized.
    pub fn path(&self, key: &str, fields: &Fields) -> Result<PathBuf, ResolveError> {
        let idx = self
            .node_index(key)
            .ok_or_else(|| ResolveError::UnknownKey(key.into()))?;
        let mut buf = String::new();
        let mut first = true;
        for n in self.chain(idx) {
            let template = &self.nodes()[n].template;
            if template.is_empty() {
                continue;
            }
            if !first {
                buf.push('/');
            }
            first = false;
            for part in template.parts() {
                match part {
                    Part::Literal(lit) => buf.push_str(lit),
                    Part::Field(name) => buf.push_str(&self.render_field(name, fields)?),
                }
            }
        }
        Ok(PathBuf::from(buf))
    }

    /// Read the placeholder values of the node named `key` back out of `path`.
    pub fn fields(&self, key: &str, path: impl AsRef<Path>) -> Result<Fields, ResolveError> {
        let idx = self
            .node_index(key)
            .ok_or_else(|| ResolveError::UnknownKey(key.into()))?;
        let text = path.as_ref().to_str().ok_or(ResolveError::InvalidPath)?;
        self.nodes()[idx].matcher.read(text, self.resolvers())
    }

    /// The first node, in declaration order, whose template matches `path`
    /// and whose placeholders are consistent with every entry of `fields`.
    ///
    /// Consistency is checked two ways: formatting the supplied fields must
    /// rebuild `path` exactly, or every supplied field must equal its parsed
    /// value. The first check covers templates whose greedy patterns capture
    /// ambiguously; the second covers partially supplied fields.
    pub fn find_key(&self, path: impl AsRef<Path>, fields: &Fields) -> Result<&str, ResolveError> {
        let path = path.as_ref();
        let text = path.to_str().ok_or(ResolveError::InvalidPath)?;
        for node in self.nodes() {
            let Ok(parsed) = node.matcher.read(text, self.resolvers()) else {
                continue;
            };
            let rebuilt = self
                .path(&node.item.key, fields)
                .is_ok_and(|p| p == path);
            if rebuilt
                || fields
                    .iter()
                    .all(|(name, value)| parsed.get(name) == Some(value))
            {
                return Ok(&node.item.key);
            }
        }
        Err(ResolveError::NoMatch)
    }

    /// Find every existing path matching the node named `key` when only some
    /// of its placeholders are bound.
    ///
    /// Bound placeholders are substituted as formatted literals; unbound ones
    /// drive a directory scan at their depth. Missing intermediate
    /// directories prune the search rather than failing it.
    #[instrument(skip(self, partial))]
    pub fn find_paths(&self, key: &str, partial: &Fields) -> Result<Vec<PathBuf>, ResolveError> {
        let idx = self
            .node_index(key)
            .ok_or_else(|| ResolveError::UnknownKey(key.into()))?;
        let chain = self.chain(idx);

        let known: HashSet<&str> = chain
            .iter()
            .flat_map(|&n| self.nodes()[n].template.field_names())
            .collect();
        for name in partial.keys() {
            if !known.contains(name.as_str()) {
                return Err(ResolveError::UnknownField(name.clone()));
            }
        }

        let components = self.components(&chain, partial)?;
        let mut current = vec![PathBuf::new()];
        for (depth, component) in components.iter().enumerate() {
            if component.is_empty() {
                // a leading empty component roots the walk
                if depth == 0 {
                    current = vec![PathBuf::from("/")];
                }
                continue;
            }
            if let Some(literal) = as_literal(component) {
                current = current.into_iter().map(|p| p.join(&literal)).collect();
                continue;
            }
            let pattern = component_pattern(component, self.resolvers())?;
            let mut next = Vec::new();
            for dir in current {
                let read = if dir.as_os_str().is_empty() {
                    Path::new(".").read_dir()
                } else {
                    dir.read_dir()
                };
                let Ok(entries) = read else {
                    trace!("pruning unreadable directory {dir:?}");
                    continue;
                };
                for entry in entries.flatten() {
                    if let Some(name) = entry.file_name().to_str() {
                        if pattern.is_match(name) {
                            next.push(dir.join(name));
                        }
                    }
                }
            }
            current = next;
        }

        // Directory scans only yield entries that exist; the existence check
        // covers trailing components that were joined as literals.
        Ok(current.into_iter().filter(|p| p.exists()).collect())
    }

    /// Format one placeholder from the field map.
    pub(crate) fn render_field(&self, name: &str, fields: &Fields) -> Result<String, ResolveError> {
        let value = fields
            .get(name)
            .ok_or_else(|| ResolveError::MissingField(name.into()))?;
        match self.resolver(name) {
            Some(resolver) => resolver.format(value).map_err(|e| match e {
                FormatError::WrongKind { expected, found } => ResolveError::TypeMismatch {
                    name: name.into(),
                    expected,
                    found,
                },
                source => ResolveError::Format {
                    name: name.into(),
                    source,
                },
            }),
            None => match value {
                FieldValue::Text(text) => Ok(text.clone()),
                FieldValue::Int(_) => Err(ResolveError::TypeMismatch {
                    name: name.into(),
                    expected: ValueKind::Text,
                    found: ValueKind::Integer,
                }),
            },
        }
    }

    /// Split a chain into slash-separated components, substituting any bound
    /// placeholder. A substituted value is a single piece even if it contains
    /// `/` itself; only literal template text introduces component boundaries.
    pub(crate) fn components(
        &self,
        chain: &[usize],
        fields: &Fields,
    ) -> Result<Vec<Vec<Piece>>, ResolveError> {
        let mut components = Vec::new();
        let mut current = Vec::new();
        let mut started = false;
        for &n in chain {
            let template = &self.nodes()[n].template;
            if template.is_empty() {
                continue;
            }
            if started {
                components.push(mem::take(&mut current));
            }
            started = true;
            for part in template.parts() {
                match part {
                    Part::Field(name) => {
                        if fields.contains_key(name) {
                            current.push(Piece::Literal(self.render_field(name, fields)?));
                        } else {
                            current.push(Piece::Field(name.clone()));
                        }
                    }
                    Part::Literal(lit) => {
                        let mut segments = lit.split('/');
                        if let Some(first) = segments.next() {
                            if !first.is_empty() {
                                current.push(Piece::Literal(first.into()));
                            }
                            for segment in segments {
                                components.push(mem::take(&mut current));
                                if !segment.is_empty() {
                                    current.push(Piece::Literal(segment.into()));
                                }
                            }
                        }
                    }
                }
            }
        }
        if started {
            components.push(current);
        }
        Ok(components)
    }
}

/// The component as plain text, if nothing in it is still unbound.
pub(crate) fn as_literal(component: &[Piece]) -> Option<String> {
    component
        .iter()
        .map(|piece| match piece {
            Piece::Literal(lit) => Some(lit.as_str()),
            Piece::Field(_) => None,
        })
        .collect()
}

fn component_pattern(
    component: &[Piece],
    resolvers: &HashMap<String, Resolver>,
) -> Result<Regex, ResolveError> {
    let mut pattern = String::from("^");
    for piece in component {
        match piece {
            Piece::Literal(lit) => pattern.push_str(&regex::escape(lit)),
            Piece::Field(name) => {
                pattern.push_str(&format!("(?:{})", fragment_for(resolvers.get(name))));
            }
        }
    }
    pattern.push('$');
    Ok(Regex::new(&pattern)?)
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no path item named {0:?}")]
    UnknownKey(String),
    #[error("no value supplied for field {0:?}")]
    MissingField(String),
    #[error("field {name:?} expects {expected} value, found {found}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("could not format field {name:?}: {source}")]
    Format {
        name: String,
        source: FormatError,
    },
    #[error("could not parse field {name:?}: {source}")]
    Parse {
        name: String,
        source: ParseError,
    },
    #[error("path does not match any template")]
    NoMatch,
    #[error("conflicting values for field {0:?}")]
    AmbiguousMatch(String),
    #[error("field {0:?} is not a placeholder of the path item")]
    UnknownField(String),
    #[error("path is not valid unicode")]
    InvalidPath,
    #[error("invalid match pattern: {0}")]
    Pattern(#[from] regex::Error),
}
