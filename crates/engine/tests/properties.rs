mod common;

use common::{harness, resource};
use proptest::prelude::*;
use rewind_engine::{Backend, Operation, TransactionFilter, TransactionLog};
use rewind_storage::ResourceStore;
use serde_json::json;

#[derive(Debug, Clone)]
enum Step {
    Put { id: u8, value: i64 },
    Delete { id: u8 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0u8..4, any::<i64>()).prop_map(|(id, value)| Step::Put { id, value }),
        1 => (0u8..4).prop_map(|id| Step::Delete { id }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever sequence of writes runs, rolling every recorded transaction
    /// back leaves the store exactly as it started.
    #[test]
    fn rolling_back_everything_restores_the_start(
        initial in prop::collection::btree_map(0u8..4, any::<i64>(), 0..4),
        steps in prop::collection::vec(step(), 1..24),
    ) {
        runtime().block_on(async {
            let h = harness();
            for (id, value) in &initial {
                h.production
                    .put("item", &id.to_string(), resource(json!({ "v": value })))
                    .await
                    .unwrap();
            }
            let start = h.production.export().await.unwrap();

            for step in steps {
                let (id, op, next) = match step {
                    Step::Put { id, value } => {
                        let exists = h.production.get("item", &id.to_string()).await.is_ok();
                        let op = if exists { Operation::Update } else { Operation::Create };
                        (id, op, Some(resource(json!({ "v": value }))))
                    }
                    Step::Delete { id } => (id, Operation::Delete, None),
                };
                // Refusals (delete of a missing item, writes with no effect)
                // are fine; they must just not leave anything behind.
                let _ = h
                    .manager
                    .execute_with_rollback(
                        Backend::Production,
                        "item",
                        &id.to_string(),
                        op,
                        |scope| async move {
                            match next {
                                Some(r) => scope.put(r).await.map(|_| ()),
                                None => scope.delete().await,
                            }
                        },
                        "prop",
                    )
                    .await;
            }

            let ids: Vec<_> = h
                .log
                .query(&TransactionFilter::default())
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.transaction_id)
                .collect();
            let report = h.manager.rollback_batch(&ids).await.unwrap();
            assert!(report.is_complete());
            assert_eq!(h.production.export().await.unwrap(), start);
        });
    }

    /// Rolling back only the newest transaction undoes exactly that step.
    #[test]
    fn rolling_back_the_newest_undoes_one_step(
        values in prop::collection::vec(any::<i64>(), 2..10),
    ) {
        runtime().block_on(async {
            let h = harness();
            let mut last = None;
            for (i, value) in values.iter().enumerate() {
                let op = if i == 0 { Operation::Create } else { Operation::Update };
                let next = resource(json!({ "v": value, "i": i }));
                last = Some(
                    h.manager
                        .execute_with_rollback(
                            Backend::Production,
                            "item",
                            "only",
                            op,
                            |scope| async move { scope.put(next).await },
                            "prop",
                        )
                        .await
                        .unwrap()
                        .transaction_id,
                );
            }
            h.manager.rollback(last.unwrap()).await.unwrap();
            let expected = resource(json!({ "v": values[values.len() - 2], "i": values.len() - 2 }));
            assert_eq!(h.production.get("item", "only").await.unwrap(), expected);
        });
    }
}
