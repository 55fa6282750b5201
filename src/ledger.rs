//! The ledger: applied changesets recorded inside the target database.
//!
//! Every applied changeset owns exactly one row in `databasechangelog`.
//! Rows are inserted after a successful apply, deleted after a successful
//! rollback and never updated. `orderexecuted` is the only notion of
//! "what ran last" the rollback loop relies on.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::database::Database;
use crate::error::MigrateResult;

/// Bootstrap script for the ledger and its lock table.
///
/// Idempotent: safe to run on every invocation.
pub const SCHEMA: &str = include_str!("../templates/tables.sql");

/// Ledger table name.
pub const LEDGER_TABLE: &str = "databasechangelog";

/// Lock table name.
pub const LOCK_TABLE: &str = "databasechangeloglock";

/// Status marker stored in `exectype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecType {
    Executed,
}

impl ExecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecType::Executed => "EXECUTED",
        }
    }
}

impl std::fmt::Display for ExecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied changeset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub id: String,
    pub author: String,
    pub filename: String,
    pub date_executed: NaiveDateTime,
    pub order_executed: i32,
    pub exec_type: String,
}

impl LedgerRow {
    /// Row for a changeset executed now at the given position.
    pub fn executed(id: &str, author: &str, filename: &str, order_executed: i32) -> Self {
        Self {
            id: id.to_string(),
            author: author.to_string(),
            filename: filename.to_string(),
            date_executed: chrono::Utc::now().naive_utc(),
            order_executed,
            exec_type: ExecType::Executed.to_string(),
        }
    }
}

/// Make sure the ledger tables exist.
///
/// Fails fast when the database is unreachable.
pub async fn ensure_tables<D: Database>(db: &mut D) -> MigrateResult<()> {
    db.ping().await?;
    db.execute_batch(SCHEMA).await?;
    debug!("ledger tables ready");
    Ok(())
}
