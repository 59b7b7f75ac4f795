//! `rewind log inspect` -- replay a transaction journal and list what it holds.

use std::fmt::Write as _;
use std::path::Path;

use rewind_engine::{FileTransactionLog, Transaction, TransactionLog};

use crate::query::TransactionQuery;

/// Replay the journal at `path` and return the matching transactions.
///
/// The journal is only read. An incomplete final line is skipped and left in
/// place for the process that owns the journal.
pub async fn inspect(path: &Path, query: TransactionQuery) -> Result<Vec<Transaction>, String> {
    if !path.is_file() {
        return Err(format!("no transaction journal at '{}'", path.display()));
    }
    let filter = query.into_filter()?;
    let log = FileTransactionLog::load(path)
        .map_err(|e| format!("error reading '{}': {}", path.display(), e))?;
    log.query(&filter).await.map_err(|e| e.to_string())
}

/// One row per transaction, with a header.
pub fn render_text(transactions: &[Transaction]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6}  {:<25}  {:<15}  {:<10}  {:<6}  {:<30}  {:<12}  TRANSACTION",
        "SEQ", "CREATED", "STATUS", "BACKEND", "OP", "RESOURCE", "ACTOR"
    );
    for txn in transactions {
        let _ = writeln!(
            out,
            "{:>6}  {:<25}  {:<15}  {:<10}  {:<6}  {:<30}  {:<12}  {}",
            txn.sequence,
            txn.created_at,
            txn.status.to_string(),
            txn.backend.to_string(),
            txn.operation.to_string(),
            format!("{}/{}", txn.resource_type, txn.resource_id),
            txn.actor,
            txn.transaction_id
        );
        if let Some(error) = &txn.last_error {
            let _ = writeln!(out, "        last error: {}", error);
        }
    }
    let _ = writeln!(out, "{} transaction(s)", transactions.len());
    out
}
