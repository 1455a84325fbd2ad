//! Inspect command implementation.

use realmstore_model::RootElement;
use realmstore_storage::{Persistence, PersistencePort};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Total number of elements.
    pub total: usize,
    /// Element counts per kind.
    pub kinds: Vec<KindStats>,
}

/// Counts for one element kind.
#[derive(Debug, Serialize)]
pub struct KindStats {
    /// Kind tag.
    pub kind: String,
    /// Number of elements of this kind.
    pub count: usize,
    /// Number of elements per type.
    pub types: BTreeMap<String, usize>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Counts the elements stored in `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No data directory found at {}", path.display()).into());
    }

    let persistence = Persistence::open_dir(path)?;
    let kinds = vec![
        kind_stats(persistence.resources.as_ref())?,
        kind_stats(persistence.orders.as_ref())?,
        kind_stats(persistence.activities.as_ref())?,
    ];

    Ok(InspectResult {
        path: path.display().to_string(),
        total: kinds.iter().map(|k| k.count).sum(),
        kinds,
    })
}

fn kind_stats<T: RootElement>(
    port: &dyn PersistencePort<T>,
) -> Result<KindStats, Box<dyn std::error::Error>> {
    let mut types = BTreeMap::new();
    for type_name in port.query_types()? {
        let count = port.query_size(Some(&type_name))?;
        types.insert(type_name, count);
    }
    Ok(KindStats {
        kind: T::KIND.tag().to_string(),
        count: types.values().sum(),
        types,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Data directory: {}", result.path);
    println!("Total elements: {}", result.total);
    for kind in &result.kinds {
        println!();
        println!("{}: {}", kind.kind, kind.count);
        for (type_name, count) in &kind.types {
            println!("  {type_name:<24} {count}");
        }
    }
}
