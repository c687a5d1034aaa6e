//! Render a concrete path from a schema and a map of field values.

use std::collections::HashMap;

use pathscheme::{Config, PathItem, Resolver};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The schema is built in code; pathscheme deliberately has no config file
    // format of its own, since the host application usually already has one.
    let config = Config::new(
        HashMap::from([
            // accepts "001", "012" or "1234", but not "01" or "1"
            ("int".into(), Resolver::integer(3)),
            ("str".into(), Resolver::text(r"\w+")?),
        ]),
        vec![PathItem::new("asset", "path/to/{int}/{str}_{other}")],
    )?;

    // `other` has no registered resolver, so its value is used verbatim
    let path = config.path(
        "asset",
        &HashMap::from([
            ("int".into(), 3.into()),
            ("str".into(), "test".into()),
            ("other".into(), "other_test".into()),
        ]),
    )?;
    println!("{}", path.display());
    assert_eq!(path, std::path::PathBuf::from("path/to/003/test_other_test"));
    Ok(())
}
