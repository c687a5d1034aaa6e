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

use std::collections::HashMap;
use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolve::Matcher;
use crate::resolver::Resolver;
use crate::template::{Template, TemplateError};

/// Access policy of a materialized path. Opaque to this crate; the host's IO
/// callback decides what each value means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadOnly,
    ReadWrite,
    #[default]
    Inherit,
}

/// Ownership of a materialized path. Opaque to this crate, like [`Permission`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    Root,
    Project,
    User,
    #[default]
    Inherit,
}

/// What kind of filesystem entry a node describes. `FileTemplate` marks files
/// the host intends to render through its own templating engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    #[default]
    Directory,
    File,
    FileTemplate,
}

/// Opaque per-node values handed to the IO callback unchanged, such as the
/// source to copy a file from.
pub type Metadata = HashMap<String, serde_json::Value>;

/// One named node of the layout schema.
///
/// The template may reference `{placeholders}`; the node's full path is its
/// ancestors' templates and its own joined with `/`. A node without a parent
/// is a root of the forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    pub key: String,
    pub template: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub path_type: PathType,
    #[serde(default)]
    pub deferred: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PathItem {
    pub fn new(key: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            template: template.into(),
            parent: None,
            permission: Permission::default(),
            owner: Owner::default(),
            path_type: PathType::default(),
            deferred: false,
            metadata: Metadata::default(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_path_type(mut self, path_type: PathType) -> Self {
        self.path_type = path_type;
        self
    }

    pub fn with_deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) item: PathItem,
    pub(crate) template: Template,
    pub(crate) parent: Option<usize>,
    pub(crate) matcher: Matcher,
}

/// An immutable layout schema: placeholder resolvers plus the path item
/// forest. All resolver and workspace operations take the config by
/// reference; concurrent callers may share one freely.
#[derive(Clone)]
pub struct Config {
    resolvers: HashMap<String, Resolver>,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Config {
    /// Validate and compile a schema.
    ///
    /// Templates are parsed, parent references resolved and each node's path
    /// matcher compiled up front, so every per-call operation works from
    /// checked state.
    pub fn new(
        resolvers: HashMap<String, Resolver>,
        items: Vec<PathItem>,
    ) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if index.insert(item.key.clone(), i).is_some() {
                return Err(ConfigError::DuplicateKey(item.key.clone()));
            }
        }

        let mut parents = Vec::with_capacity(items.len());
        for item in &items {
            match &item.parent {
                None => parents.push(None),
                Some(parent) => match index.get(parent) {
                    Some(&p) => parents.push(Some(p)),
                    None => {
                        return Err(ConfigError::UnknownParent {
                            key: item.key.clone(),
                            parent: parent.clone(),
                        })
                    }
                },
            }
        }

        // Walking more ancestors than there are items means a parent loop
        for (i, item) in items.iter().enumerate() {
            let mut steps = 0;
            let mut cur = parents[i];
            while let Some(p) = cur {
                steps += 1;
                if steps > items.len() {
                    return Err(ConfigError::AncestorCycle(item.key.clone()));
                }
                cur = parents[p];
            }
        }

        let mut templates = Vec::with_capacity(items.len());
        for item in &items {
            let template =
                Template::parse(&item.template).map_err(|source| ConfigError::Template {
                    key: item.key.clone(),
                    source,
                })?;
            templates.push(template);
        }

        let mut matchers = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let mut chain = chain_of(&parents, i);
            chain.push(i);
            let matcher = Matcher::compile(chain.iter().map(|&n| &templates[n]), &resolvers)
                .map_err(|source| ConfigError::Pattern {
                    key: item.key.clone(),
                    source,
                })?;
            matchers.push(matcher);
        }

        let mut nodes = Vec::with_capacity(items.len());
        for (i, ((item, template), matcher)) in
            items.into_iter().zip(templates).zip(matchers).enumerate()
        {
            nodes.push(Node {
                item,
                template,
                parent: parents[i],
                matcher,
            });
        }

        Ok(Self {
            resolvers,
            nodes,
            index,
        })
    }

    pub fn item(&self, key: &str) -> Option<&PathItem> {
        self.index.get(key).map(|&i| &self.nodes[i].item)
    }

    /// Items in declaration order.
    pub fn items(&self) -> impl Iterator<Item = &PathItem> {
        self.nodes.iter().map(|n| &n.item)
    }

    pub fn resolver(&self, name: &str) -> Option<&Resolver> {
        self.resolvers.get(name)
    }

    pub(crate) fn resolvers(&self) -> &HashMap<String, Resolver> {
        &self.resolvers
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn node_index(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Indices from the root of the forest down to `idx`, inclusive.
    pub(crate) fn chain(&self, idx: usize) -> Vec<usize> {
        let mut chain = vec![idx];
        let mut cur = self.nodes[idx].parent;
        while let Some(p) = cur {
            chain.push(p);
            cur = self.nodes[p].parent;
        }
        chain.reverse();
        chain
    }
}

fn chain_of(parents: &[Option<usize>], idx: usize) -> Vec<usize> {
    let mut chain = vec![];
    let mut cur = parents[idx];
    while let Some(p) = cur {
        chain.push(p);
        cur = parents[p];
    }
    chain.reverse();
    chain
}

impl Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("resolvers", &self.resolvers.keys())
            .field("items", &self.index.keys())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate path item key {0:?}")]
    DuplicateKey(String),
    #[error("path item {key:?} references unknown parent {parent:?}")]
    UnknownParent { key: String, parent: String },
    #[error("path item {0:?} is part of a parent cycle")]
    AncestorCycle(String),
    #[error("invalid template for {key:?}: {source}")]
    Template {
        key: String,
        source: TemplateError,
    },
    #[error("invalid match pattern for {key:?}: {source}")]
    Pattern {
        key: String,
        source: regex::Error,
    },
}

#[cfg(test)]
mod schema_tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::{Config, ConfigError, Owner, PathItem, PathType, Permission};
    use crate::template::ErrorKind;

    fn config(items: Vec<PathItem>) -> Result<Config, ConfigError> {
        Config::new(Default::default(), items)
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = config(vec![
            PathItem::new("root", "{root}"),
            PathItem::new("root", "elsewhere"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::DuplicateKey(key) if key == "root");
    }

    #[test]
    fn missing_parent_rejected() {
        let err = config(vec![PathItem::new("child", "data").with_parent("root")]).unwrap_err();
        assert_matches!(
            err,
            ConfigError::UnknownParent { key, parent } if key == "child" && parent == "root"
        );
    }

    #[rstest]
    #[case::self_loop(vec![("a", Some("a"))])]
    #[case::two_cycle(vec![("a", Some("b")), ("b", Some("a"))])]
    #[case::deep_cycle(vec![("a", Some("c")), ("b", Some("a")), ("c", Some("b"))])]
    fn parent_cycles_rejected(#[case] items: Vec<(&str, Option<&str>)>) {
        let items = items
            .into_iter()
            .map(|(key, parent)| {
                let item = PathItem::new(key, "static");
                match parent {
                    Some(p) => item.with_parent(p),
                    None => item,
                }
            })
            .collect();
        assert_matches!(config(items), Err(ConfigError::AncestorCycle(_)));
    }

    #[test]
    fn template_errors_name_the_item() {
        let err = config(vec![PathItem::new("bad", "un{closed")]).unwrap_err();
        assert_matches!(
            err,
            ConfigError::Template { key, source } if key == "bad"
                && source.kind() == ErrorKind::Incomplete
        );
    }

    #[test]
    fn forest_accepted() {
        let cfg = config(vec![
            PathItem::new("root", "{root}"),
            PathItem::new("art", "{project}-art").with_parent("root"),
            PathItem::new("game", "{project}-game").with_parent("root"),
            PathItem::new("other_root", "/srv/other"),
        ])
        .unwrap();
        assert_eq!(
            cfg.items().map(|i| i.key.as_str()).collect::<Vec<_>>(),
            vec!["root", "art", "game", "other_root"]
        );
        assert_eq!(cfg.item("art").unwrap().parent.as_deref(), Some("root"));
        assert!(cfg.item("unknown").is_none());
    }

    #[test]
    fn items_deserialize_with_defaults() {
        let item: PathItem = serde_json::from_str(
            r#"{"key": "shot", "template": "shots/{shot}", "parent": "root"}"#,
        )
        .unwrap();
        assert_eq!(item.parent.as_deref(), Some("root"));
        assert_eq!(item.permission, Permission::Inherit);
        assert_eq!(item.owner, Owner::Inherit);
        assert_eq!(item.path_type, PathType::Directory);
        assert!(!item.deferred);
        assert!(item.metadata.is_empty());
    }

    #[test]
    fn metadata_kept_verbatim() {
        let item: PathItem = serde_json::from_str(
            r#"{
                "key": "blend",
                "template": "{asset}.blend",
                "path_type": "file",
                "metadata": {"skip": true, "source": "templates/base.blend"}
            }"#,
        )
        .unwrap();
        assert_eq!(item.path_type, PathType::File);
        assert_eq!(item.metadata["skip"], serde_json::Value::Bool(true));
        assert_eq!(item.metadata["source"], "templates/base.blend");
    }
}
