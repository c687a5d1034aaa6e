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

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::resolve::{as_literal, ResolveError};
use crate::schema::{Config, PathItem};
use crate::Fields;

/// A schema node paired with the concrete path it resolves to under a given
/// field map. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPathItem {
    item: PathItem,
    path: PathBuf,
}

impl ResolvedPathItem {
    pub fn item(&self) -> &PathItem {
        &self.item
    }

    pub fn key(&self) -> &str {
        &self.item.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// The host side of workspace materialization.
///
/// The engine never touches the filesystem itself; it hands each resolved
/// node to this trait in dependency order and awaits the result. The host
/// decides what to do with each node from its `path_type`, `permission`,
/// `owner` and `metadata`.
pub trait WorkspaceIo {
    type Error;

    fn create(
        &self,
        config: &Config,
        fields: &Fields,
        item: &ResolvedPathItem,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, Error)]
pub enum WorkspaceError<E> {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("workspace callback failed: {0}")]
    Io(E),
}

impl Config {
    /// Every node that resolves completely under `fields`, with its path,
    /// plus one implicit directory entry per unique prefix of each resolved
    /// node's component chain.
    ///
    /// A substituted placeholder value is a single component even when it
    /// contains `/`, so a root supplied as an absolute path is one entry, not
    /// one per directory. Ancestors precede descendants; siblings keep
    /// declaration order. Nodes that do not resolve are omitted along with
    /// their prefixes, so a schema where nothing resolves yields nothing.
    pub fn workspace(&self, fields: &Fields) -> Result<Vec<ResolvedPathItem>, ResolveError> {
        let mut resolved = Vec::new();
        for idx in self.ordered() {
            if let Some(rendered) = self.rendered_components(idx, fields)? {
                let rungs = prefixes(&rendered);
                if !rungs.is_empty() {
                    resolved.push((idx, rungs));
                }
            }
        }

        let node_paths: HashSet<&Path> = resolved
            .iter()
            .filter_map(|(_, rungs)| rungs.last().map(PathBuf::as_path))
            .collect();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (idx, rungs) in &resolved {
            let item = &self.nodes()[*idx].item;
            let Some((leaf, ancestors)) = rungs.split_last() else {
                continue;
            };
            for rung in ancestors {
                if !node_paths.contains(rung.as_path()) && seen.insert(rung.clone()) {
                    out.push(ResolvedPathItem {
                        // implicit rungs are plain directories with inherited
                        // permissions, attributed to the node that needs them
                        item: PathItem::new(item.key.clone(), ""),
                        path: rung.clone(),
                    });
                }
            }
            if seen.insert(leaf.clone()) {
                out.push(ResolvedPathItem {
                    item: item.clone(),
                    path: leaf.clone(),
                });
            }
        }
        Ok(out)
    }

    /// Materialize the workspace through the host's [`WorkspaceIo`].
    ///
    /// Nodes resolve against `fields` alone; `extra` is merged over the field
    /// map (winning conflicts) for the callback's benefit. Deferred nodes are
    /// dispatched only when a non-deferred descendant is. Invocations are
    /// strictly serial, parent before child, and the first failure aborts the
    /// traversal; nothing already created is rolled back.
    #[instrument(skip(fields, extra, io))]
    pub async fn create_workspace<Io>(
        &self,
        fields: &Fields,
        extra: &Fields,
        io: Io,
    ) -> Result<(), WorkspaceError<Io::Error>>
    where
        Io: WorkspaceIo,
    {
        let nodes = self.nodes();
        let mut paths: Vec<Option<PathBuf>> = Vec::with_capacity(nodes.len());
        for idx in 0..nodes.len() {
            let path = self
                .rendered_components(idx, fields)?
                .and_then(|rendered| prefixes(&rendered).pop());
            paths.push(path);
        }

        let mut children = vec![Vec::new(); nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                children[parent].push(idx);
            }
        }

        let mut include = Vec::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            include.push(match paths[idx] {
                None => false,
                Some(_) if !node.item.deferred => true,
                Some(_) => has_active_descendant(idx, &children, nodes, &paths),
            });
        }

        let mut effective = fields.clone();
        effective.extend(extra.clone());

        for idx in self.ordered() {
            if !include[idx] {
                continue;
            }
            let Some(path) = paths[idx].take() else {
                continue;
            };
            let item = ResolvedPathItem {
                item: nodes[idx].item.clone(),
                path,
            };
            debug!("dispatching {:?} at {:?}", item.key(), item.path());
            io.create(self, &effective, &item)
                .await
                .map_err(WorkspaceError::Io)?;
        }
        Ok(())
    }

    /// Indices with every parent before its children, declaration order
    /// otherwise.
    pub(crate) fn ordered(&self) -> Vec<usize> {
        let nodes = self.nodes();
        let mut order = Vec::with_capacity(nodes.len());
        let mut seen = vec![false; nodes.len()];
        let mut pending = Vec::new();
        for idx in 0..nodes.len() {
            let mut cur = Some(idx);
            while let Some(n) = cur {
                if seen[n] {
                    break;
                }
                seen[n] = true;
                pending.push(n);
                cur = nodes[n].parent;
            }
            order.extend(pending.drain(..).rev());
        }
        order
    }

    /// The node's chain rendered into slash-separated components, or `None`
    /// if some placeholder has no value.
    fn rendered_components(
        &self,
        idx: usize,
        fields: &Fields,
    ) -> Result<Option<Vec<String>>, ResolveError> {
        let chain = self.chain(idx);
        for &n in &chain {
            for name in self.nodes()[n].template.field_names() {
                if !fields.contains_key(name) {
                    return Ok(None);
                }
            }
        }
        let mut rendered = Vec::new();
        for component in self.components(&chain, fields)? {
            match as_literal(&component) {
                Some(text) => rendered.push(text),
                None => return Ok(None),
            }
        }
        Ok(Some(rendered))
    }
}

/// Does any transitive descendant resolve as a non-deferred node?
fn has_active_descendant(
    idx: usize,
    children: &[Vec<usize>],
    nodes: &[crate::schema::Node],
    paths: &[Option<PathBuf>],
) -> bool {
    let mut stack: Vec<usize> = children[idx].clone();
    while let Some(n) = stack.pop() {
        if paths[n].is_some() && !nodes[n].item.deferred {
            return true;
        }
        stack.extend(children[n].iter().copied());
    }
    false
}

/// Cumulative paths over rendered components. A leading empty component
/// marks an absolute chain.
fn prefixes(rendered: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut cum = String::new();
    let mut absolute = false;
    for (i, comp) in rendered.iter().enumerate() {
        if comp.is_empty() {
            if i == 0 {
                absolute = true;
            }
            continue;
        }
        if cum.is_empty() {
            if absolute {
                cum.push('/');
            }
        } else {
            cum.push('/');
        }
        cum.push_str(comp);
        out.push(PathBuf::from(&cum));
    }
    out
}


#[cfg(test)]
mod create_tests {
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::{ResolvedPathItem, WorkspaceError, WorkspaceIo};
    use crate::resolver::Resolver;
    use crate::schema::{Config, PathItem, PathType};
    use crate::{FieldValue, Fields};

    fn fields(entries: &[(&str, FieldValue)]) -> Fields {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// Records the order keys are dispatched in
    #[derive(Default)]
    struct Recorder {
        keys: Mutex<Vec<String>>,
    }

    impl WorkspaceIo for &Recorder {
        type Error = Infallible;

        async fn create(
            &self,
            _config: &Config,
            _fields: &Fields,
            item: &ResolvedPathItem,
        ) -> Result<(), Infallible> {
            self.keys.lock().expect("poisoned").push(item.key().into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn directories_created_through_callback() {
        struct MakeDirs;
        impl WorkspaceIo for MakeDirs {
            type Error = std::io::Error;

            async fn create(
                &self,
                _config: &Config,
                _fields: &Fields,
                item: &ResolvedPathItem,
            ) -> Result<(), std::io::Error> {
                tokio::fs::create_dir_all(item.path()).await
            }
        }

        let root = tempfile::tempdir().expect("tempdir");
        let cfg = Config::new(
            HashMap::from([
                ("int".into(), Resolver::integer(3)),
                ("str".into(), Resolver::text(r"\w+").expect("pattern")),
            ]),
            vec![PathItem::new("path", "{root}/path/to/{int}/{str}_{other}")],
        )
        .expect("config");

        cfg.create_workspace(
            &fields(&[
                ("root", root.path().to_str().expect("utf-8 root").into()),
                ("int", 3.into()),
                ("str", "test".into()),
                ("other", "other_test".into()),
            ]),
            &Fields::new(),
            MakeDirs,
        )
        .await
        .expect("create_workspace");

        assert!(root.path().join("path/to/003/test_other_test").is_dir());
    }

    fn sibling_schema() -> Config {
        Config::new(
            Default::default(),
            vec![
                PathItem::new("root", "{root_dir}"),
                PathItem::new("child1", "first").with_parent("root"),
                PathItem::new("child2", "second").with_parent("root"),
                PathItem::new("notes", "notes.txt")
                    .with_parent("child2")
                    .with_path_type(PathType::File)
                    .with_deferred(true),
            ],
        )
        .expect("schema")
    }

    #[tokio::test]
    async fn parents_dispatch_before_children() {
        let recorder = Recorder::default();
        sibling_schema()
            .create_workspace(
                &fields(&[("root_dir", "/srv/demo".into())]),
                &Fields::new(),
                &recorder,
            )
            .await
            .expect("create_workspace");
        // the deferred file has no descendants so it is never materialized
        assert_eq!(
            *recorder.keys.lock().expect("poisoned"),
            vec!["root", "child1", "child2"]
        );
    }

    #[tokio::test]
    async fn deferred_nodes_follow_their_descendants() {
        let cfg = Config::new(
            Default::default(),
            vec![
                PathItem::new("root", "{root_dir}"),
                PathItem::new("staging", "staging").with_parent("root").with_deferred(true),
                PathItem::new("incoming", "{batch}").with_parent("staging"),
            ],
        )
        .expect("schema");

        // without the batch field the deferred directory has no active
        // descendant and is skipped
        let recorder = Recorder::default();
        cfg.create_workspace(
            &fields(&[("root_dir", "/srv/demo".into())]),
            &Fields::new(),
            &recorder,
        )
        .await
        .expect("create_workspace");
        assert_eq!(*recorder.keys.lock().expect("poisoned"), vec!["root"]);

        let recorder = Recorder::default();
        cfg.create_workspace(
            &fields(&[("root_dir", "/srv/demo".into()), ("batch", "b01".into())]),
            &Fields::new(),
            &recorder,
        )
        .await
        .expect("create_workspace");
        assert_eq!(
            *recorder.keys.lock().expect("poisoned"),
            vec!["root", "staging", "incoming"]
        );
    }

    #[tokio::test]
    async fn failures_abort_the_traversal() {
        struct FailOn(&'static str, Mutex<Vec<String>>);
        impl WorkspaceIo for &FailOn {
            type Error = String;

            async fn create(
                &self,
                _config: &Config,
                _fields: &Fields,
                item: &ResolvedPathItem,
            ) -> Result<(), String> {
                if item.key() == self.0 {
                    return Err(format!("refusing {}", self.0));
                }
                self.1.lock().expect("poisoned").push(item.key().into());
                Ok(())
            }
        }

        let io = FailOn("child1", Mutex::new(vec![]));
        let err = sibling_schema()
            .create_workspace(
                &fields(&[("root_dir", "/srv/demo".into())]),
                &Fields::new(),
                &io,
            )
            .await
            .expect_err("callback failure should propagate");
        assert_matches!(err, WorkspaceError::Io(reason) if reason == "refusing child1");
        // the failing node aborts before its sibling is reached
        assert_eq!(*io.1.lock().expect("poisoned"), vec!["root"]);
    }

    #[tokio::test]
    async fn extra_metadata_overrides_fields() {
        struct CheckUser;
        impl WorkspaceIo for CheckUser {
            type Error = Infallible;

            async fn create(
                &self,
                _config: &Config,
                fields: &Fields,
                _item: &ResolvedPathItem,
            ) -> Result<(), Infallible> {
                assert_eq!(fields["user"], FieldValue::Text("bob".into()));
                assert_eq!(fields["stage"], FieldValue::Text("layout".into()));
                Ok(())
            }
        }

        Config::new(
            Default::default(),
            vec![PathItem::new("root", "{root_dir}")],
        )
        .expect("schema")
        .create_workspace(
            &fields(&[("root_dir", "/srv/demo".into()), ("user", "alice".into())]),
            &fields(&[("user", "bob".into()), ("stage", "layout".into())]),
            CheckUser,
        )
        .await
        .expect("create_workspace");
    }

    /// Multi-root forest from a production game layout; every node resolves
    /// and dispatches exactly once.
    #[rstest]
    #[tokio::test]
    async fn full_project_layout() {
        let cfg = Config::new(
            Default::default(),
            vec![
                PathItem::new("root", "{root_dir}"),
                PathItem::new("art_root", "{project_name}-art").with_parent("root"),
                PathItem::new("game_root", "{project_name}-game").with_parent("root"),
                PathItem::new("art_asset_workspace", "art_assets/{asset_type}/{asset_name}")
                    .with_parent("art_root"),
                PathItem::new("art_asset_blend", "{asset_name}.blend")
                    .with_parent("art_asset_workspace")
                    .with_path_type(PathType::File)
                    .with_metadata(
                        [("skip".to_string(), serde_json::Value::Bool(true))].into(),
                    ),
                PathItem::new("game_asset_dir", "art_assets/{asset_type}/{asset_name}")
                    .with_parent("game_root"),
            ],
        )
        .expect("schema");

        let recorder = Recorder::default();
        cfg.create_workspace(
            &fields(&[
                ("root_dir", "/srv/projects/demo".into()),
                ("project_name", "demo".into()),
                ("asset_type", "prop".into()),
                ("asset_name", "crate".into()),
            ]),
            &Fields::new(),
            &recorder,
        )
        .await
        .expect("create_workspace");

        assert_eq!(
            *recorder.keys.lock().expect("poisoned"),
            vec![
                "root",
                "art_root",
                "game_root",
                "art_asset_workspace",
                "art_asset_blend",
                "game_asset_dir",
            ]
        );
    }
}
