//! Cross-crate integration tests.
//!
//! Exercises the engine end to end: agent, realms, storage adapters,
//! observers and the operations log together.

use realmstore_model::Resource;
use std::collections::BTreeMap;

/// Indexes resources by `(type, id)` for order-independent comparison.
pub fn by_key(resources: &[Resource]) -> BTreeMap<(String, String), Resource> {
    resources
        .iter()
        .map(|r| ((r.type_name.clone(), r.id.clone()), r.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::generators::*;
    use proptest::prelude::*;
    use realmstore_core::{
        AgentConfig, CoreError, Credential, DataStoreMode, RealmConfig, TransactionState,
    };
    use realmstore_model::{Locator, RootElement};
    use realmstore_storage::Persistence;
    use std::sync::Arc;
    use std::time::Duration;

    // ------------------------------------------------------------------
    // Command ordering
    // ------------------------------------------------------------------

    proptest! {
        #[test]
        fn prior_commands_undone_in_reverse(total in 1usize..10, k in 1usize..10, in_validate in any::<bool>()) {
            prop_assume!(k <= total);
            let agent = TestAgent::transient();
            let journal = journal();
            let mut tx = agent.realm().open_tx(alice(), "ordering");
            for i in 1..=total {
                let command = JournalCommand::new(i.to_string(), &journal);
                let command = match (i == k, in_validate) {
                    (true, true) => command.invalid(),
                    (true, false) => command.failing(),
                    _ => command,
                };
                tx.add_command(command).unwrap();
            }
            prop_assert!(tx.commit().is_err());

            let mut expected: Vec<String> = (1..k).map(|i| format!("do:{i}")).collect();
            expected.extend((1..k).rev().map(|i| format!("undo:{i}")));
            prop_assert_eq!(journal.lock().clone(), expected);
            prop_assert!(agent.realm().locks().is_empty());
        }
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    #[test]
    fn a_locator_has_at_most_one_holder() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        let locator = item("A").locator();

        let mut first = realm.open_tx(alice(), "first");
        first.lock(&locator).unwrap();

        let mut second = realm.open_tx(Credential::new("bob"), "second");
        let err = second.lock(&locator).unwrap_err();
        assert!(matches!(err, CoreError::Lock { .. }));
        assert_eq!(realm.stats().lock_timeouts(), 1);

        first.release_lock(&locator).unwrap();
        first.release_lock(&locator).unwrap();
        second.lock(&locator).unwrap();
        assert_eq!(realm.locks().holder(&locator), Some(second.id()));
    }

    #[test]
    fn waiting_writer_proceeds_after_commit() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        realm
            .transaction(alice(), "seed", |tx| tx.add_resource(item("A")))
            .unwrap();

        let mut holder = realm.open_tx(alice(), "holder");
        holder.lock(&item("A").locator()).unwrap();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                realm.transaction(Credential::new("bob"), "waiter", |tx| {
                    tx.lock(&item("A").locator())?;
                    let a = tx.get_resource_by_or_fail("Item", "A")?;
                    tx.update_resource(a)
                })
            });
            std::thread::sleep(Duration::from_millis(50));
            holder.close().unwrap();
            waiter.join().unwrap().unwrap();
        });

        assert_eq!(realm.resources().get("Item", "A").unwrap().unwrap().version, 1);
    }

    #[test]
    fn failure_does_not_leak_locks() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        let journal = journal();

        let mut tx = realm.open_tx(alice(), "leaky");
        tx.add_resource(item("A")).unwrap();
        tx.add_command(JournalCommand::new("boom", &journal).failing())
            .unwrap();
        assert!(tx.commit().is_err());

        assert!(realm.locks().is_empty());
        realm
            .transaction(alice(), "after", |tx| tx.add_resource(item("A")))
            .unwrap();
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn cached_realm_round_trips_through_restart(resources in unique_resources_strategy(12)) {
            let agent = TestAgent::file();
            agent
                .realm()
                .transaction(alice(), "import", |tx| {
                    for r in &resources {
                        tx.add_resource(r.clone())?;
                    }
                    Ok(())
                })
                .unwrap();

            let agent = agent.restart();
            let mut tx = agent.realm().open_tx(alice(), "verify");
            let reloaded = tx.stream_resources(&[]).unwrap();
            prop_assert_eq!(by_key(&reloaded), by_key(&resources));
        }
    }

    #[test]
    fn cached_commit_flushes_to_storage() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::open_dir(dir.path()).unwrap();
        let agent = TestAgent::with_config(
            AgentConfig::new().realm(RealmConfig::new(TEST_REALM, DataStoreMode::Cached)),
            Some(persistence.clone()),
            None,
        );
        agent
            .realm()
            .transaction(alice(), "create", |tx| tx.add_resource(machine("m1", "red", 2)))
            .unwrap();

        assert_eq!(persistence.resources.query_size(Some("Machine")).unwrap(), 1);
        let stored = persistence.resources.query_by("Machine", "m1").unwrap().unwrap();
        assert_eq!(stored, machine("m1", "red", 2));
    }

    #[test]
    fn transactional_realm_reads_through() {
        let persistence = Persistence::in_memory();
        persistence.resources.save(&item("A")).unwrap();
        let agent = TestAgent::with_config(
            AgentConfig::new().realm(RealmConfig::new(TEST_REALM, DataStoreMode::Transactional)),
            Some(persistence.clone()),
            None,
        );

        let mut tx = agent.realm().open_tx(alice(), "read");
        assert_eq!(tx.get_resource_by_or_fail("Item", "A").unwrap(), item("A"));
        tx.close().unwrap();

        agent
            .realm()
            .transaction(alice(), "remove", |tx| tx.remove_resource(item("A")))
            .unwrap();
        assert_eq!(persistence.resources.query_size(None).unwrap(), 0);
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    #[test]
    fn observer_sees_commits_in_order() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        let observer = RecordingObserver::slow(Duration::from_millis(20));
        realm.observers().register("Resource", observer.clone());

        realm
            .transaction(alice(), "c1", |tx| {
                tx.add_resource(item("A"))?;
                tx.add_resource(item("B"))
            })
            .unwrap();
        realm
            .transaction(alice(), "c2", |tx| tx.remove_resource(item("A")))
            .unwrap();
        realm.observers().drain();

        let deliveries = observer.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].operation, "add");
        assert_eq!(deliveries[0].ids, vec!["A", "B"]);
        assert_eq!(deliveries[1].operation, "remove");
    }

    #[test]
    fn failing_observers_do_not_affect_commits() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        let recorder = RecordingObserver::new();
        realm.observers().register("Resource", Arc::new(FailingObserver));
        realm.observers().register("Resource", recorder.clone());

        realm
            .transaction(alice(), "add", |tx| tx.add_resource(item("A")))
            .unwrap();
        realm
            .transaction(alice(), "update", |tx| tx.update_resource(item("A")))
            .unwrap();
        realm.observers().drain();

        assert_eq!(recorder.ids("add"), vec!["A"]);
        assert_eq!(recorder.ids("update"), vec!["A"]);
        assert_eq!(realm.stats().transactions_committed(), 2);
    }

    // ------------------------------------------------------------------
    // Operations log
    // ------------------------------------------------------------------

    #[test]
    fn operations_log_prunes_ten_percent() {
        let agent = TestAgent::cached();
        let log = agent.operations_log();
        assert_eq!(log.max_messages(), 100);
        let locator = Locator::parse("Resource/Item/A").unwrap();

        let messages: Vec<_> = (0..101)
            .map(|i| info_message(TEST_REALM, &locator, &format!("m{i}")))
            .collect();
        for m in &messages {
            log.add_message(m.clone());
        }
        log.drain();

        let kept = log.get_messages(TEST_REALM);
        assert_eq!(kept.len(), 91);
        assert_eq!(kept.first(), Some(&messages[10]));
        assert_eq!(agent.log_port.removed(), messages[..10].to_vec());
        assert_eq!(agent.log_port.stored().len(), 91);
    }

    #[test]
    fn operations_log_survives_restart() {
        let agent = TestAgent::file();
        let locator = Locator::parse("Order/Sale/o1").unwrap();
        agent
            .operations_log()
            .add_message(info_message(TEST_REALM, &locator, "order.created"));

        let agent = agent.restart();
        let messages = agent
            .operations_log()
            .get_messages_for(TEST_REALM, &locator)
            .unwrap();
        assert_eq!(messages[0].key, "order.created");
    }

    #[test]
    fn failed_transaction_is_logged() {
        let agent = TestAgent::transient();
        let journal = journal();
        let mut tx = agent.realm().open_tx(alice(), "import");
        tx.add_command(JournalCommand::new("x", &journal).failing())
            .unwrap();
        assert!(tx.commit().is_err());
        agent.operations_log().drain();

        let failures = agent
            .operations_log()
            .get_messages_for(TEST_REALM, &Locator::for_transaction(TEST_REALM, "import"))
            .unwrap();
        assert_eq!(failures[0].key, "transaction.failed");
        // transient realms are never persisted
        assert!(agent.log_port.stored().is_empty());
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[test]
    fn committed_resource_is_visible_to_new_transactions() {
        let agent = TestAgent::cached();
        let realm = agent.realm();
        let original = machine("m1", "blue", 4);
        realm
            .transaction(alice(), "create", |tx| tx.add_resource(original.clone()))
            .unwrap();

        let mut tx = realm.open_tx(Credential::new("bob"), "read");
        assert_eq!(tx.get_resource_by("Machine", "m1").unwrap(), Some(original));
    }

    #[test]
    fn second_add_of_same_id_is_rejected_but_first_commits() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        let mut tx = realm.open_tx(alice(), "twice");
        tx.add_resource(item("A")).unwrap();
        let err = tx.add_resource(item("A")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(err.kind().is_user_facing());

        let result = tx.commit().unwrap();
        assert_eq!(result.state, TransactionState::Closed);
        assert!(realm.resources().contains("Item", "A").unwrap());
    }

    #[test]
    fn orders_and_activities_share_the_machinery() {
        let agent = TestAgent::transient();
        let realm = agent.realm();
        let observer = RecordingObserver::new();
        realm.observers().register("Order", observer.clone());

        realm
            .transaction(alice(), "mixed", |tx| {
                tx.add_order(sale("o1"))?;
                tx.add_activity(plan("p1"))
            })
            .unwrap();
        realm.observers().drain();

        assert_eq!(observer.deliveries()[0].tag, "Order");
        assert_eq!(realm.audit_trail().len(), 2);
        assert!(realm.activities().contains("Plan", "p1").unwrap());
    }
}
