use std::future::Future;

use super::{doc, TestResult};
use crate::{SandboxStore, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "error",
            "get_nonexistent",
            get_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "get_not_found_has_correct_fields",
            get_not_found_has_correct_fields(factory).await,
        ),
        TestResult::from_result(
            "error",
            "delete_nonexistent",
            delete_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "delete_twice_second_is_not_found",
            delete_twice_second_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "error",
            "failed_delete_changes_nothing",
            failed_delete_changes_nothing(factory).await,
        ),
    ]
}

// ── 1. get on empty store returns NotFound ───────────────────────────────────

async fn get_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get("document", "doc-999").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}

// ── 2. NotFound carries the requested coordinates ────────────────────────────

async fn get_not_found_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get("form", "f-42").await {
        Err(StorageError::NotFound {
            resource_type,
            resource_id,
        }) => {
            if resource_type != "form" || resource_id != "f-42" {
                return Err(format!(
                    "NotFound fields wrong: {}/{}",
                    resource_type, resource_id
                ));
            }
            Ok(())
        }
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}

async fn delete_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.delete("document", "doc-999").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}

async fn delete_twice_second_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("first delete: {e}"))?;
    match s.delete("document", "doc-1").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound on second delete, got {:?}", other)),
    }
}

async fn failed_delete_changes_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.put("document", "doc-1", doc("A"))
        .await
        .map_err(|e| format!("put: {e}"))?;
    let before = s.export().await.map_err(|e| format!("export: {e}"))?;
    let _ = s.delete("document", "doc-2").await;
    let after = s.export().await.map_err(|e| format!("export: {e}"))?;
    if before != after {
        return Err("store contents changed after a failed delete".to_string());
    }
    Ok(())
}
