//! Conformance test suite for `ResourceStore` implementations.
//!
//! The production store and the sandbox twin must behave identically, so
//! every backend runs the same backend-agnostic checks. The suite covers:
//!
//! - **CRUD**: put/get/delete round trips, full-replace writes
//! - **Error handling**: `NotFound` on absent keys, with the right fields
//! - **Listing**: per-type listing order and full export
//! - **Sandbox**: atomic seed and reset
//! - **Concurrency**: parallel writers on distinct and shared keys
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use rewind_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn http_conformance() {
//!     let report = run_conformance_suite(|| async { start_mock_api().await }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod crud;
mod error;
mod listing;
mod sandbox;

use std::fmt;
use std::future::Future;

use crate::record::Resource;
use crate::SandboxStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "crud", "sandbox").
    pub category: String,
    /// Test name (e.g. "put_replaces_whole_record").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a store backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: SandboxStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(crud::run_crud_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(listing::run_listing_tests(&factory).await);
    results.extend(sandbox::run_sandbox_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn make_resource(value: serde_json::Value) -> Resource {
    Resource::from_value(value).unwrap_or_default()
}

fn doc(title: &str) -> Resource {
    make_resource(serde_json::json!({ "title": title, "status": "draft" }))
}
