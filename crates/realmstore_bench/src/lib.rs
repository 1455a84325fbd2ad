//! Benchmark utilities for realmstore.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use realmstore_core::{Agent, AgentConfig, DataStoreMode, RealmConfig};
use realmstore_model::{Parameter, ParameterBag, ParameterValue, Resource};
use realmstore_storage::Persistence;
use std::path::Path;

/// Name of the realm every bench agent creates.
pub const BENCH_REALM: &str = "bench";

/// Generates a resource with `params` random integer parameters.
pub fn random_resource(id: usize, params: usize) -> Resource {
    let mut rng = rand::thread_rng();
    let mut bag = ParameterBag::new("params", "Parameters", "Parameters");
    for p in 0..params {
        bag.put(Parameter::new(
            format!("p{p}"),
            format!("P{p}"),
            ParameterValue::Integer(rng.gen_range(0..1_000_000)),
        ));
    }
    Resource::new(format!("r{id}"), format!("Resource {id}"), "Bench").with_bag(bag)
}

/// Generates `count` resources with distinct ids.
pub fn generate_resources(count: usize, params: usize) -> Vec<Resource> {
    (0..count).map(|i| random_resource(i, params)).collect()
}

/// Starts an agent with one realm in `mode`.
///
/// Non-transient realms persist in memory, or into `dir` when given.
///
/// # Panics
///
/// Panics if the agent cannot be built or started.
pub fn bench_agent(mode: DataStoreMode, dir: Option<&Path>) -> Agent {
    let config = AgentConfig::new().realm(RealmConfig::new(BENCH_REALM, mode));
    let mut builder = Agent::builder(config);
    if !mode.is_transient() {
        let persistence = match dir {
            Some(dir) => Persistence::open_dir(dir).expect("Failed to open file persistence"),
            None => Persistence::in_memory(),
        };
        builder = builder.persistence(BENCH_REALM, persistence);
    }
    let agent = builder.build().expect("Failed to build agent");
    agent.start().expect("Failed to start agent");
    agent
}
