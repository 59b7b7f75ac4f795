use std::future::Future;

use super::{doc, make_resource, TestResult};
use crate::SandboxStore;

pub(super) async fn run_crud_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "crud",
            "put_then_get_returns_same_record",
            put_then_get_returns_same_record(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "put_returns_stored_record",
            put_returns_stored_record(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "put_replaces_whole_record",
            put_replaces_whole_record(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "delete_removes_record",
            delete_removes_record(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "keys_are_scoped_by_type",
            keys_are_scoped_by_type(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "nested_values_survive_round_trip",
            nested_values_survive_round_trip(factory).await,
        ),
    ]
}

async fn put_then_get_returns_same_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "doc-1", doc("A"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    let got = s
        .get("document", "doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if got != doc("A") {
        return Err(format!("expected {:?}, got {:?}", doc("A"), got));
    }
    Ok(())
}

async fn put_returns_stored_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let stored = s
        .put("document", "doc-1", doc("A"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    if stored != doc("A") {
        return Err(format!("put returned {:?}", stored));
    }
    Ok(())
}

async fn put_replaces_whole_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "doc-1", doc("A"))
        .await
        .map_err(|e| format!("put 1: {e}"))?;
    let replacement = make_resource(serde_json::json!({ "title": "B" }));
    s.put("document", "doc-1", replacement.clone())
        .await
        .map_err(|e| format!("put 2: {e}"))?;
    let got = s
        .get("document", "doc-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if got.get("status").is_some() {
        return Err("field from the first write survived a replace".to_string());
    }
    if got != replacement {
        return Err(format!("expected {:?}, got {:?}", replacement, got));
    }
    Ok(())
}

async fn delete_removes_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "doc-1", doc("A"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    s.delete("document", "doc-1")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    match s.get("document", "doc-1").await {
        Err(e) if e.is_not_found() => Ok(()),
        other => Err(format!("expected NotFound after delete, got {:?}", other)),
    }
}

async fn keys_are_scoped_by_type<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "x-1", doc("doc"))
        .await
        .map_err(|e| format!("put document: {e}"))?;
    s.put("form", "x-1", doc("form"))
        .await
        .map_err(|e| format!("put form: {e}"))?;
    s.delete("form", "x-1")
        .await
        .map_err(|e| format!("delete form: {e}"))?;
    let survivor = s
        .get("document", "x-1")
        .await
        .map_err(|e| format!("document deleted along with form: {e}"))?;
    if survivor != doc("doc") {
        return Err(format!("document changed: {:?}", survivor));
    }
    Ok(())
}

async fn nested_values_survive_round_trip<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let form = make_resource(serde_json::json!({
        "title": "Annual filing",
        "answers": { "q1": "yes", "q2": null, "q3": [1, 2.5, -3] },
        "flags": [true, false],
        "unicode": "zürich ✓",
    }));
    s.put("form", "f-1", form.clone())
        .await
        .map_err(|e| format!("put: {e}"))?;
    let got = s.get("form", "f-1").await.map_err(|e| format!("get: {e}"))?;
    if got != form {
        return Err(format!("expected {:?}, got {:?}", form, got));
    }
    Ok(())
}
