//! Changesets: the unit of change.
//!
//! A changeset pairs forward SQL with the statement that reverses it and an
//! id that is never reused. It is applied at most once per database; the
//! ledger row written after a successful apply is what makes re-runs safe.

use serde::Deserialize;
use tracing::{debug, info};

use crate::database::Database;
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::LedgerRow;

/// A changeset as declared in a migration document.
///
/// ```xml
/// <changeSet id="20210203002030-create_org_units" author="ox">
///     <sql>CREATE TABLE organizational_units (id uuid PRIMARY KEY);</sql>
///     <rollback>DROP TABLE IF EXISTS organizational_units;</rollback>
/// </changeSet>
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChangeSet {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@author", default)]
    pub author: String,

    /// Forward statements, in document order.
    #[serde(rename = "sql", default)]
    pub sql: Vec<String>,

    /// Reverse statement. Empty means nothing was declared.
    #[serde(rename = "rollback", default)]
    pub rollback_sql: String,
}

/// What [`ChangeSet::execute`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Forward SQL ran and a ledger row was written at this order.
    Executed(i32),
    /// A ledger row already existed; nothing ran.
    AlreadyApplied,
}

impl ChangeSet {
    /// Create a changeset from its parts.
    pub fn new(id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            ..Default::default()
        }
    }

    /// Add a forward statement.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql.push(sql.into());
        self
    }

    /// Set the reverse statement.
    pub fn with_rollback(mut self, sql: impl Into<String>) -> Self {
        self.rollback_sql = sql.into();
        self
    }

    /// The forward statements joined into one executable batch.
    pub fn batch(&self) -> String {
        self.sql.join("\n")
    }

    /// Whether a reverse statement was declared.
    pub fn is_reversible(&self) -> bool {
        !self.rollback_sql.trim().is_empty()
    }

    /// Apply the changeset unless the ledger already has it.
    ///
    /// `file` is recorded in the ledger so a later rollback can find the
    /// document again. The ledger row is only written after the forward
    /// batch succeeds.
    pub async fn execute<D: Database>(&self, db: &mut D, file: &str) -> MigrateResult<ApplyOutcome> {
        let order = db
            .max_order()
            .await
            .map_err(|e| MigrateError::execution(&self.id, e))?;

        let applied = db.is_applied(&self.id).await.map_err(|e| {
            MigrateError::execution(
                &self.id,
                format!("error checking if changeset has already been executed: {}", e),
            )
        })?;
        if applied {
            debug!(id = %self.id, "already executed");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        db.execute_batch(&self.batch())
            .await
            .map_err(|e| MigrateError::execution(&self.id, e))?;

        let row = LedgerRow::executed(&self.id, &self.author, file, order + 1);
        db.record(&row)
            .await
            .map_err(|e| MigrateError::execution(&self.id, e))?;

        info!(id = %self.id, order = row.order_executed, "executed `{}`", self.id);
        Ok(ApplyOutcome::Executed(row.order_executed))
    }

    /// Run the reverse statement and drop the ledger row.
    ///
    /// An empty reverse statement is still sent to the database. When the
    /// reverse statement fails the ledger row is left alone.
    pub async fn rollback<D: Database>(&self, db: &mut D) -> MigrateResult<()> {
        info!(id = %self.id, "rolling back `{}`", self.id);

        db.execute_batch(&self.rollback_sql)
            .await
            .map_err(|e| MigrateError::execution(&self.id, e))?;

        db.remove(&self.id)
            .await
            .map_err(|e| MigrateError::execution(&self.id, e))?;

        Ok(())
    }
}
