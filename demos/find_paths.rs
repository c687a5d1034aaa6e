//! Find every existing path matching a node when some fields are unbound.
//!
//! Leaving a field out of the map asks `find_paths` to scan for all values
//! matching that placeholder's shape; here every version of one asset is
//! found by leaving `int` unbound.

use std::collections::HashMap;
use std::fs;

use pathscheme::{Config, PathItem, Resolver};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    for version in 0..3 {
        fs::create_dir_all(
            root.path()
                .join(format!("path/to/{version:03}/test_other_test")),
        )?;
    }

    let config = Config::new(
        HashMap::from([
            ("int".into(), Resolver::integer(3)),
            ("str".into(), Resolver::text(r"\w+")?),
        ]),
        vec![PathItem::new("asset", "{root}/path/to/{int}/{str}_{other}")],
    )?;

    let mut paths = config.find_paths(
        "asset",
        &HashMap::from([
            ("root".into(), root.path().to_str().expect("utf-8").into()),
            ("str".into(), "test".into()),
            ("other".into(), "other_test".into()),
        ]),
    )?;
    paths.sort();
    for path in &paths {
        println!("{}", path.display());
    }
    assert_eq!(paths.len(), 3);
    Ok(())
}
