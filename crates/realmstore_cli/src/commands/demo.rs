//! Demo command implementation.

use realmstore_core::{
    AddElementCommand, Agent, AgentConfig, CoreResult, Credential, DataStoreMode, Observer,
    ObserverError, PrivilegeTable, Realm, RealmConfig,
};
use realmstore_model::{
    Element, LogMessage, LogSeverity, Parameter, ParameterBag, ParameterValue, Resource,
    RootElement,
};
use realmstore_storage::{InMemoryLogStore, Persistence};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Observer that logs every batch it receives.
#[derive(Debug)]
struct LoggingObserver;

impl Observer for LoggingObserver {
    fn add(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        info!(tag, count = elements.len(), "observed add");
        Ok(())
    }

    fn update(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        info!(tag, count = elements.len(), "observed update");
        Ok(())
    }

    fn remove(&self, tag: &str, elements: &[Element]) -> Result<(), ObserverError> {
        info!(tag, count = elements.len(), "observed remove");
        Ok(())
    }
}

/// What the demo workload did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadSummary {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that failed.
    pub failed: usize,
    /// Resources left in the realm.
    pub resources: usize,
}

/// Runs the demo command.
pub fn run(config: Option<&Path>, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => AgentConfig::new().realm(RealmConfig::new("defaultRealm", DataStoreMode::Cached)),
    };

    let privileges = PrivilegeTable::new();
    privileges.grant_all("demo");
    let mut builder = Agent::builder(config.clone())
        .log_port(Arc::new(InMemoryLogStore::new()))
        .authorization(Arc::new(privileges));
    for realm in config.realms.iter().filter(|r| !r.mode.is_transient()) {
        builder = builder.persistence(realm.name.clone(), Persistence::in_memory());
    }
    let agent = builder.build()?;
    agent.start()?;

    let name = agent
        .realm_names()
        .next()
        .ok_or("The configuration has no realms")?
        .to_string();
    let realm = agent.realm(&name)?;
    realm.observers().register("Resource", Arc::new(LoggingObserver));

    let summary = workload(realm, count)?;
    if let Err(e) = realm.transaction(Credential::new("guest"), "intrude", |tx| {
        tx.add_resource(machine(count))
    }) {
        println!("guest was turned away: {e}");
    }
    realm.observers().drain();
    agent.operations_log().drain();

    println!("Realm {name} ({:?})", realm.mode());
    println!(
        "  committed: {}, failed: {}, resources: {}",
        summary.committed, summary.failed, summary.resources
    );
    println!("Stats:");
    println!("{}", serde_json::to_string_pretty(&realm.stats().snapshot())?);
    println!("Operations log:");
    for message in agent.operations_log().get_messages(&name) {
        println!(
            "  [{:?}] {} {}: {}",
            message.severity, message.locator, message.key, message.message
        );
    }

    agent.shutdown();
    Ok(())
}

fn machine(i: usize) -> Resource {
    Resource::new(format!("m{i}"), format!("Machine {i}"), "Machine").with_bag(
        ParameterBag::new("params", "Parameters", "Parameters").with(Parameter::new(
            "load",
            "Load",
            ParameterValue::Integer(0),
        )),
    )
}

/// Creates `count` machines, updates half of them, attempts one conflicting
/// commit and removes the first machine.
pub fn workload(realm: &Realm, count: usize) -> CoreResult<WorkloadSummary> {
    let user = Credential::new("demo");
    let mut summary = WorkloadSummary::default();

    realm.transaction(user.clone(), "create", |tx| {
        for i in 0..count {
            tx.add_resource(machine(i))?;
        }
        if count > 0 {
            tx.add_log_message(LogMessage::new(
                realm.name(),
                "demo",
                machine(0).locator(),
                LogSeverity::Info,
                "demo.created",
                format!("created {count} machines"),
            ));
        }
        Ok(())
    })?;
    summary.committed += 1;

    realm.transaction(user.clone(), "load", |tx| {
        for i in (0..count).step_by(2) {
            let mut m = tx.get_resource_by_or_fail("Machine", &format!("m{i}"))?;
            if let Some(bag) = m.bags.get_mut("params") {
                bag.put(Parameter::new("load", "Load", ParameterValue::Integer(i as i64)));
            }
            tx.update_resource(m)?;
        }
        Ok(())
    })?;
    summary.committed += 1;

    if count > 0 {
        // bypasses the eager check, so it only fails on commit
        let mut tx = realm.open_tx(user.clone(), "conflict");
        tx.add_command(AddElementCommand::new(machine(0)))?;
        match tx.commit() {
            Ok(_) => summary.committed += 1,
            Err(e) => {
                info!(error = %e, "conflicting commit failed as expected");
                summary.failed += 1;
            }
        }

        realm.transaction(user, "retire", |tx| tx.remove_resource(machine(0)))?;
        summary.committed += 1;
    }

    summary.resources = realm.resources().size(None)?;
    Ok(summary)
}
