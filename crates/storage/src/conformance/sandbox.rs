use std::future::Future;

use super::{doc, TestResult};
use crate::{ResourceSet, SandboxStore};

pub(super) async fn run_sandbox_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "sandbox",
            "seed_loads_every_record",
            seed_loads_every_record(factory).await,
        ),
        TestResult::from_result(
            "sandbox",
            "seed_replaces_previous_contents",
            seed_replaces_previous_contents(factory).await,
        ),
        TestResult::from_result(
            "sandbox",
            "reset_empties_store",
            reset_empties_store(factory).await,
        ),
        TestResult::from_result(
            "sandbox",
            "store_usable_after_reset",
            store_usable_after_reset(factory).await,
        ),
    ]
}

fn seed_set() -> ResourceSet {
    let mut set = ResourceSet::new();
    set.insert("document", "doc-1", doc("A"));
    set.insert("form", "f-1", doc("F"));
    set
}

async fn seed_loads_every_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.seed(seed_set()).await.map_err(|e| format!("seed: {e}"))?;
    let got = s
        .get("document", "doc-1")
        .await
        .map_err(|e| format!("get after seed: {e}"))?;
    if got != doc("A") {
        return Err(format!("seeded record differs: {:?}", got));
    }
    let all = s.export().await.map_err(|e| format!("export: {e}"))?;
    if all != seed_set() {
        return Err(format!("export after seed differs: {:?}", all));
    }
    Ok(())
}

async fn seed_replaces_previous_contents<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "stale", doc("old"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.seed(seed_set()).await.map_err(|e| format!("seed: {e}"))?;
    match s.get("document", "stale").await {
        Err(e) if e.is_not_found() => Ok(()),
        other => Err(format!("record from before the seed survived: {:?}", other)),
    }
}

async fn reset_empties_store<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.seed(seed_set()).await.map_err(|e| format!("seed: {e}"))?;
    s.reset().await.map_err(|e| format!("reset: {e}"))?;
    let all = s.export().await.map_err(|e| format!("export: {e}"))?;
    if !all.is_empty() {
        return Err(format!("{} records left after reset", all.len()));
    }
    match s.get("document", "doc-1").await {
        Err(e) if e.is_not_found() => Ok(()),
        other => Err(format!("expected NotFound after reset, got {:?}", other)),
    }
}

async fn store_usable_after_reset<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.reset().await.map_err(|e| format!("reset: {e}"))?;
    s.put("document", "doc-9", doc("Z"))
        .await
        .map_err(|e| format!("put after reset: {e}"))?;
    s.get("document", "doc-9")
        .await
        .map_err(|e| format!("get after reset: {e}"))?;
    Ok(())
}
