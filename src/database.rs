//! Database boundary for the migration engine.
//!
//! The engine talks to the target database through the [`Database`] trait:
//! run an arbitrary SQL batch, and read or write ledger rows. [`PgDatabase`]
//! is the PostgreSQL implementation on top of a single sqlx connection.
//! There is no pool: one run holds one connection from start to finish.

use sqlx::postgres::PgRow;
use sqlx::{Connection, Executor, PgConnection, Row};

use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{LEDGER_TABLE, LOCK_TABLE, LedgerRow};

/// Operations the engine needs from a connected database.
///
/// All ledger queries assume [`crate::ledger::SCHEMA`] has been applied.
#[allow(async_fn_in_trait)]
pub trait Database {
    /// Check the database is reachable.
    async fn ping(&mut self) -> MigrateResult<()>;

    /// Execute one or more statements as a single batch.
    async fn execute_batch(&mut self, sql: &str) -> MigrateResult<()>;

    /// Highest `orderexecuted` in the ledger, 0 when it is empty.
    async fn max_order(&mut self) -> MigrateResult<i32>;

    /// Whether a ledger row exists for the changeset id.
    async fn is_applied(&mut self, id: &str) -> MigrateResult<bool>;

    /// Insert a ledger row.
    async fn record(&mut self, row: &LedgerRow) -> MigrateResult<()>;

    /// Delete the ledger row for the changeset id.
    async fn remove(&mut self, id: &str) -> MigrateResult<()>;

    /// The row with the greatest `orderexecuted`, if any.
    async fn last_applied(&mut self) -> MigrateResult<Option<LedgerRow>>;

    /// All ledger rows, oldest first.
    async fn applied(&mut self) -> MigrateResult<Vec<LedgerRow>>;

    /// Take the ledger lock or fail with [`MigrateError::Locked`].
    async fn acquire_lock(&mut self, owner: &str) -> MigrateResult<()>;

    /// Give the ledger lock back.
    async fn release_lock(&mut self) -> MigrateResult<()>;
}

/// Opens [`Database`] handles from connection URLs.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Db: Database;

    async fn connect(&self, url: &str) -> MigrateResult<Self::Db>;
}

/// PostgreSQL connector backed by sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl Connector for PgConnector {
    type Db = PgDatabase;

    async fn connect(&self, url: &str) -> MigrateResult<PgDatabase> {
        PgDatabase::connect(url).await
    }
}

/// A live PostgreSQL connection.
pub struct PgDatabase {
    conn: PgConnection,
}

impl PgDatabase {
    /// Connect to a database using a connection URL.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let db = PgDatabase::connect("postgres://localhost/app_development").await?;
    /// ```
    pub async fn connect(url: &str) -> MigrateResult<Self> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(|e| MigrateError::Connection(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> MigrateResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| MigrateError::Connection(e.to_string()))
    }
}

fn db_err(e: sqlx::Error) -> MigrateError {
    MigrateError::Database(e.to_string())
}

impl Database for PgDatabase {
    async fn ping(&mut self) -> MigrateResult<()> {
        self.conn
            .ping()
            .await
            .map_err(|e| MigrateError::Connection(e.to_string()))
    }

    async fn execute_batch(&mut self, sql: &str) -> MigrateResult<()> {
        // No bind parameters, so sqlx uses the simple query protocol and
        // multiple statements are allowed.
        self.conn.execute(sql).await.map_err(db_err)?;
        Ok(())
    }

    async fn max_order(&mut self) -> MigrateResult<i32> {
        let sql = format!("SELECT COALESCE(MAX(orderexecuted), 0) FROM {}", LEDGER_TABLE);
        sqlx::query_scalar::<_, i32>(&sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(db_err)
    }

    async fn is_applied(&mut self, id: &str) -> MigrateResult<bool> {
        let sql = format!("SELECT count(*) FROM {} WHERE id = $1", LEDGER_TABLE);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_one(&mut self.conn)
            .await
            .map_err(db_err)?;

        Ok(count > 0)
    }

    async fn record(&mut self, row: &LedgerRow) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} \
             (id, author, filename, dateexecuted, orderexecuted, exectype) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            LEDGER_TABLE
        );
        sqlx::query(&sql)
            .bind(&row.id)
            .bind(&row.author)
            .bind(&row.filename)
            .bind(row.date_executed)
            .bind(row.order_executed)
            .bind(&row.exec_type)
            .execute(&mut self.conn)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn remove(&mut self, id: &str) -> MigrateResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", LEDGER_TABLE);
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut self.conn)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn last_applied(&mut self) -> MigrateResult<Option<LedgerRow>> {
        let sql = format!("{} ORDER BY orderexecuted DESC LIMIT 1", select_rows());
        let row = sqlx::query(&sql)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_ledger).transpose()
    }

    async fn applied(&mut self) -> MigrateResult<Vec<LedgerRow>> {
        let sql = format!("{} ORDER BY orderexecuted ASC", select_rows());
        let rows = sqlx::query(&sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(db_err)?;

        rows.iter().map(row_to_ledger).collect()
    }

    async fn acquire_lock(&mut self, owner: &str) -> MigrateResult<()> {
        let sql = format!(
            "UPDATE {} \
             SET locked = TRUE, lockgranted = $1, lockedby = $2 \
             WHERE id = 1 AND locked = FALSE",
            LOCK_TABLE
        );
        let result = sqlx::query(&sql)
            .bind(chrono::Utc::now().naive_utc())
            .bind(owner)
            .execute(&mut self.conn)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let sql = format!("SELECT lockedby FROM {} WHERE id = 1", LOCK_TABLE);
        let holder = sqlx::query_scalar::<_, Option<String>>(&sql)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(db_err)?
            .flatten()
            .unwrap_or_else(|| "unknown".to_string());

        Err(MigrateError::Locked(holder))
    }

    async fn release_lock(&mut self) -> MigrateResult<()> {
        let sql = format!(
            "UPDATE {} SET locked = FALSE, lockgranted = NULL, lockedby = NULL WHERE id = 1",
            LOCK_TABLE
        );
        sqlx::query(&sql)
            .execute(&mut self.conn)
            .await
            .map_err(db_err)?;

        Ok(())
    }
}

fn select_rows() -> String {
    format!(
        "SELECT id, author, filename, dateexecuted, orderexecuted, exectype FROM {}",
        LEDGER_TABLE
    )
}

/// Convert a `databasechangelog` row.
fn row_to_ledger(row: &PgRow) -> MigrateResult<LedgerRow> {
    Ok(LedgerRow {
        id: row.try_get("id").map_err(db_err)?,
        author: row.try_get("author").map_err(db_err)?,
        filename: row.try_get("filename").map_err(db_err)?,
        date_executed: row.try_get("dateexecuted").map_err(db_err)?,
        order_executed: row.try_get("orderexecuted").map_err(db_err)?,
        exec_type: row.try_get("exectype").map_err(db_err)?,
    })
}
