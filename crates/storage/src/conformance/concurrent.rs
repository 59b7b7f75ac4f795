use std::future::Future;
use std::sync::Arc;

use super::{doc, TestResult};
use crate::SandboxStore;

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_puts_different_keys_all_land",
            concurrent_puts_different_keys_all_land(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_puts_same_key_last_writer_is_whole",
            concurrent_puts_same_key_last_writer_is_whole(factory).await,
        ),
    ]
}

// ── Parallel writers on distinct keys ───────────────────────────────────────

/// N tasks each write their own key. Every write must be visible afterwards.
async fn concurrent_puts_different_keys_all_land<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("doc-{i}");
            s.put("document", &id, doc(&id)).await
        }));
    }
    for h in handles {
        h.await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("put: {e}"))?;
    }

    let listed = store
        .list("document")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != N {
        return Err(format!("expected {N} documents, found {}", listed.len()));
    }
    Ok(())
}

// ── Parallel writers on one key ─────────────────────────────────────────────

/// N tasks race to replace the same key. The survivor must be exactly one of
/// the written records, never a blend of two.
async fn concurrent_puts_same_key_last_writer_is_whole<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.put("document", "shared", doc(&format!("writer-{i}")))
                .await
        }));
    }
    for h in handles {
        h.await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("put: {e}"))?;
    }

    let survivor = store
        .get("document", "shared")
        .await
        .map_err(|e| format!("get: {e}"))?;
    let matches_a_writer = (0..N).any(|i| survivor == doc(&format!("writer-{i}")));
    if !matches_a_writer {
        return Err(format!("survivor is not any single write: {:?}", survivor));
    }
    Ok(())
}
