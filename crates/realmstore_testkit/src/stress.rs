//! Stress tests for realmstore.
//!
//! These helpers drive a realm from many threads at once and report
//! throughput. The integration tests use them to check that locking keeps
//! concurrent writers consistent.

use crate::fixtures::{alice, item};
use realmstore_core::{CoreResult, Realm};
use realmstore_model::RootElement;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Transactions that committed.
    pub successful_ops: usize,
    /// Transactions that failed.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} tx/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
        }
    }
}

fn run_threads<F>(config: &StressConfig, work: F) -> StressTestResult
where
    F: Fn(usize, usize) -> CoreResult<()> + Sync,
{
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let (work, successful, failed) = (&work, &successful, &failed);
            scope.spawn(move || {
                for i in 0..config.operations {
                    match work(t, i) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

/// Each thread adds its own resources. No two transactions touch the same
/// locator.
pub fn stress_disjoint_adds(realm: &Realm, config: &StressConfig) -> StressTestResult {
    run_threads(config, |t, i| {
        realm.transaction(alice(), "stress.add", |tx| {
            tx.add_resource(item(&format!("t{t}-{i}")))
        })
    })
}

/// Every thread increments the version of one shared resource. Updates are
/// serialized by the resource's lock, so the final version equals the
/// number of committed transactions.
pub fn stress_hot_update(realm: &Realm, config: &StressConfig) -> StressTestResult {
    let hot = item("hot");
    if !realm.resources().contains("Item", "hot").unwrap_or(false) {
        realm
            .transaction(alice(), "stress.seed", |tx| tx.add_resource(hot.clone()))
            .expect("Failed to seed hot resource");
    }

    run_threads(config, |_, _| {
        realm.transaction(alice(), "stress.update", |tx| {
            tx.lock(&hot.locator())?;
            let current = tx.get_resource_by_or_fail("Item", "hot")?;
            tx.update_resource(current)
        })
    })
}
