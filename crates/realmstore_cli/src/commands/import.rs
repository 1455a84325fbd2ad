//! Import command implementation.

use realmstore_core::{
    Agent, AgentConfig, CoreResult, Credential, DataStoreMode, Realm, RealmConfig,
};
use realmstore_model::{Activity, Order, Resource};
use realmstore_storage::Persistence;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of an import file. Every array is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImportFile {
    /// Resources to import.
    pub resources: Vec<Resource>,
    /// Orders to import.
    pub orders: Vec<Order>,
    /// Activities to import.
    pub activities: Vec<Activity>,
}

/// Outcome of an import.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Elements that did not exist before.
    pub added: usize,
    /// Existing elements that were replaced.
    pub updated: usize,
}

/// Runs the import command.
pub fn run(
    data_dir: &Path,
    realm: &str,
    file: &Path,
    user: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)
        .map_err(|e| format!("Cannot read {}: {e}", file.display()))?;
    let elements: ImportFile = serde_json::from_str(&contents)?;

    std::fs::create_dir_all(data_dir)?;
    let config = AgentConfig::new().realm(RealmConfig::new(realm, DataStoreMode::Cached));
    let agent = Agent::builder(config)
        .persistence(realm, Persistence::open_dir(data_dir)?)
        .build()?;
    agent.start()?;

    let summary = import(agent.realm(realm)?, Credential::new(user), elements)?;
    agent.shutdown();

    println!(
        "Imported into {realm}: {} added, {} updated",
        summary.added, summary.updated
    );
    Ok(())
}

/// Adds or replaces every element of `elements` in one transaction.
///
/// Nothing is written if any element is rejected.
pub fn import(realm: &Realm, credential: Credential, elements: ImportFile) -> CoreResult<ImportSummary> {
    realm.transaction(credential, "import", |tx| {
        let mut summary = ImportSummary::default();
        for resource in elements.resources {
            if tx.has_resource(&resource.type_name, &resource.id)? {
                tx.update_resource(resource)?;
                summary.updated += 1;
            } else {
                tx.add_resource(resource)?;
                summary.added += 1;
            }
        }
        for order in elements.orders {
            if tx.has_order(&order.type_name, &order.id)? {
                tx.update_order(order)?;
                summary.updated += 1;
            } else {
                tx.add_order(order)?;
                summary.added += 1;
            }
        }
        for activity in elements.activities {
            if tx.has_activity(&activity.type_name, &activity.id)? {
                tx.update_activity(activity)?;
                summary.updated += 1;
            } else {
                tx.add_activity(activity)?;
                summary.added += 1;
            }
        }
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FILE: &str = r#"{
        "resources": [
            {"id": "m1", "name": "Machine 1", "type": "Machine"},
            {"id": "m2", "name": "Machine 2", "type": "Machine"}
        ],
        "orders": [
            {"id": "o1", "name": "Sale 1", "type": "Sale"}
        ]
    }"#;

    #[test]
    fn import_then_reimport_updates() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("elements.json");
        std::fs::write(&file, FILE).unwrap();
        let data = dir.path().join("data");

        run(&data, "defaultRealm", &file, "tester").unwrap();
        let persistence = Persistence::open_dir(&data).unwrap();
        assert_eq!(persistence.resources.query_size(Some("Machine")).unwrap(), 2);
        assert_eq!(persistence.orders.query_size(None).unwrap(), 1);

        let config = AgentConfig::new().realm(RealmConfig::new("r", DataStoreMode::Cached));
        let agent = Agent::builder(config)
            .persistence("r", Persistence::open_dir(&data).unwrap())
            .build()
            .unwrap();
        agent.start().unwrap();
        let elements: ImportFile = serde_json::from_str(FILE).unwrap();
        let summary = import(agent.realm("r").unwrap(), Credential::new("tester"), elements).unwrap();
        assert_eq!(summary, ImportSummary { added: 0, updated: 3 });
    }

    #[test]
    fn duplicate_in_file_imports_nothing() {
        let agent = Agent::builder(
            AgentConfig::new().realm(RealmConfig::new("r", DataStoreMode::Transient)),
        )
        .build()
        .unwrap();
        agent.start().unwrap();
        let elements = ImportFile {
            resources: vec![Resource::new("A", "A", "Item"), Resource::new("A", "A", "Item")],
            ..ImportFile::default()
        };

        let realm = agent.realm("r").unwrap();
        assert!(import(realm, Credential::new("tester"), elements).is_err());
        assert_eq!(realm.resources().size(None).unwrap(), 0);
    }
}
