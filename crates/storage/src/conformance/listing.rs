use std::future::Future;

use super::{doc, TestResult};
use crate::{ResourceSet, SandboxStore};

pub(super) async fn run_listing_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "listing",
            "list_empty_for_unknown_type",
            list_empty_for_unknown_type(factory).await,
        ),
        TestResult::from_result(
            "listing",
            "list_sorted_by_id",
            list_sorted_by_id(factory).await,
        ),
        TestResult::from_result(
            "listing",
            "list_only_returns_requested_type",
            list_only_returns_requested_type(factory).await,
        ),
        TestResult::from_result(
            "listing",
            "export_empty_store",
            export_empty_store(factory).await,
        ),
        TestResult::from_result(
            "listing",
            "export_contains_every_record",
            export_contains_every_record(factory).await,
        ),
    ]
}

async fn list_empty_for_unknown_type<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let listed = s.list("nothing").await.map_err(|e| format!("list: {e}"))?;
    if !listed.is_empty() {
        return Err(format!("expected empty listing, got {} entries", listed.len()));
    }
    Ok(())
}

async fn list_sorted_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for id in ["doc-3", "doc-1", "doc-2"] {
        s.put("document", id, doc(id))
            .await
            .map_err(|e| format!("put {id}: {e}"))?;
    }
    let ids: Vec<String> = s
        .list("document")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    if ids != ["doc-1", "doc-2", "doc-3"] {
        return Err(format!("listing out of order: {:?}", ids));
    }
    Ok(())
}

async fn list_only_returns_requested_type<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "doc-1", doc("A"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.put("form", "f-1", doc("F"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    let listed = s.list("form").await.map_err(|e| format!("list: {e}"))?;
    match listed.as_slice() {
        [(id, resource)] if id == "f-1" && *resource == doc("F") => Ok(()),
        other => Err(format!("unexpected form listing: {:?}", other)),
    }
}

async fn export_empty_store<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let all = s.export().await.map_err(|e| format!("export: {e}"))?;
    if !all.is_empty() {
        return Err(format!("fresh store exported {} records", all.len()));
    }
    Ok(())
}

async fn export_contains_every_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut expected = ResourceSet::new();
    for (t, id) in [("document", "doc-1"), ("document", "doc-2"), ("form", "f-1")] {
        s.put(t, id, doc(id))
            .await
            .map_err(|e| format!("put {t}/{id}: {e}"))?;
        expected.insert(t, id, doc(id));
    }
    let all = s.export().await.map_err(|e| format!("export: {e}"))?;
    if all != expected {
        return Err(format!("export mismatch: {:?}", all));
    }
    Ok(())
}
