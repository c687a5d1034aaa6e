//! Materialize a workspace through an IO callback.
//!
//! `create_workspace` can be called at any point in the life of a project;
//! the callback below only creates directories that are missing, so existing
//! paths are left alone.

use std::collections::HashMap;

use pathscheme::{Config, Fields, PathItem, ResolvedPathItem, Resolver, WorkspaceIo};

/// The engine never touches the filesystem itself; this callback decides what
/// each node becomes. Here everything is a directory and permissions are
/// ignored.
struct MakeDirs;

impl WorkspaceIo for MakeDirs {
    type Error = std::io::Error;

    async fn create(
        &self,
        _config: &Config,
        _fields: &Fields,
        item: &ResolvedPathItem,
    ) -> Result<(), std::io::Error> {
        println!("creating {}", item.path().display());
        tokio::fs::create_dir_all(item.path()).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;

    let config = Config::new(
        HashMap::from([
            ("int".into(), Resolver::integer(3)),
            ("str".into(), Resolver::text(r"\w+")?),
        ]),
        vec![PathItem::new("asset", "{root}/path/to/{int}/{str}_{other}")],
    )?;

    config
        .create_workspace(
            &HashMap::from([
                ("root".into(), root.path().to_str().expect("utf-8").into()),
                ("int".into(), 3.into()),
                ("str".into(), "test".into()),
                ("other".into(), "other_test".into()),
            ]),
            &Fields::new(),
            MakeDirs,
        )
        .await?;

    assert!(root.path().join("path/to/003/test_other_test").is_dir());
    Ok(())
}
