use std::collections::HashMap;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

pub mod resolve;
pub mod resolver;
pub mod schema;
pub mod template;
pub mod workspace;

pub use resolve::ResolveError;
pub use resolver::{IntegerResolver, Resolver, StringResolver};
pub use schema::{Config, ConfigError, Metadata, Owner, PathItem, PathType, Permission};
pub use workspace::{ResolvedPathItem, WorkspaceError, WorkspaceIo};

/// Field values keyed by placeholder name, as supplied by the host.
pub type Fields = HashMap<String, FieldValue>;

/// A value bound to a template placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Int(_) => ValueKind::Integer,
            FieldValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Int(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.into())
    }
}

/// The shape of a [`FieldValue`], used when reporting mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ValueKind {
    #[display("integer")]
    Integer,
    #[display("string")]
    Text,
}
