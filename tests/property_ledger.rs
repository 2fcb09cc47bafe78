// tests/property_ledger.rs

use proptest::prelude::*;

use batchdag::ledger::{Ledger, TaskState};

fn state_strategy() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Pending),
        Just(TaskState::InProgress),
        Just(TaskState::Completed),
        Just(TaskState::Failed),
        Just(TaskState::Retrying),
        Just(TaskState::Skipped),
    ]
}

proptest! {
    // Arbitrary write sequences: illegal writes are rejected, accepted ones
    // follow the lattice, and settled tasks never move again.
    #[test]
    fn random_writes_respect_the_lattice(
        writes in proptest::collection::vec(state_strategy(), 0..40)
    ) {
        let ledger = Ledger::new();
        ledger.register_pending("t", Some(0));

        let mut current = TaskState::Pending;
        let mut dispatches = 0u32;
        for to in writes {
            let allowed = current.can_transition_to(to);
            let result = ledger.transition("t", to, Some("detail".into()), Some(0));
            prop_assert_eq!(result.is_ok(), allowed);

            if allowed {
                if current.is_settled() {
                    prop_assert!(false, "settled state {} accepted a write", current);
                }
                if to == TaskState::InProgress {
                    dispatches += 1;
                }
                current = to;
            }
            prop_assert_eq!(ledger.state_of("t"), Some(current));
        }

        prop_assert_eq!(ledger.dispatch_count("t"), dispatches);

        // The event stream replays to the same final state.
        let replayed = ledger
            .events()
            .into_iter()
            .filter_map(|e| e.task_transition())
            .map(|(_, to)| to)
            .last();
        prop_assert_eq!(replayed, Some(current));
    }

    #[test]
    fn snapshot_restores_the_same_view(
        writes in proptest::collection::vec(state_strategy(), 0..20)
    ) {
        let ledger = Ledger::new();
        ledger.register_pending("t", None);
        for to in writes {
            let _ = ledger.transition("t", to, None, None);
        }

        let restored = Ledger::from_snapshot(ledger.snapshot());
        prop_assert_eq!(restored.snapshot(), ledger.snapshot());
        prop_assert_eq!(restored.counts(), ledger.counts());
    }
}
