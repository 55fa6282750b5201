//! Migration engine: brings a database up to the changelog, or back down.
//!
//! ```text
//! changelog.xml ──► include files ──► changesets ──► Database
//!                                         │              │
//!                                         └── ledger ◄───┘
//! ```
//!
//! Everything runs sequentially on one connection. The ledger decides what
//! is skipped on the way up and what is reverted on the way down.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::changeset::ApplyOutcome;
use crate::config::{DEFAULT_CONNECTION, MigrateConfig, TEST_CONNECTION};
use crate::database::{Connector, Database, PgConnector};
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{self, LedgerRow};
use crate::parser::{read_changelog, read_migration};

/// Which way to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Up,
    Down,
}

impl FromStr for Direction {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(MigrateError::InvalidDirection(other.to_string())),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Result of [`Migrator::up`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    /// Changesets executed by this run, in order.
    pub applied: Vec<String>,
    /// Changesets skipped because the ledger already had them.
    pub already_applied: usize,
    /// Referenced files that are not migrations.
    pub skipped_files: Vec<String>,
}

/// Result of [`Migrator::rollback`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Changesets reverted by this run, most recent first.
    pub rolled_back: Vec<String>,
    /// Files hit by a step that could not be processed, one entry per step.
    pub skipped_files: Vec<String>,
}

/// Either report, from [`Migrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    Up(UpReport),
    Down(RollbackReport),
}

/// A changeset present in the changelog but not in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingChangeSet {
    pub id: String,
    pub author: String,
    pub file: String,
}

/// Applied and pending changesets for one database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub applied: Vec<LedgerRow>,
    pub pending: Vec<PendingChangeSet>,
}

/// Runs the changelog against a named connection.
///
/// # Example
///
/// ```rust,ignore
/// let config = MigrateConfig::discover()?;
/// let report = Migrator::new(config).connection("development").up().await?;
/// println!("{} applied", report.applied.len());
/// ```
pub struct Migrator<C: Connector = PgConnector> {
    config: MigrateConfig,
    connector: C,
    root: PathBuf,
    connection: String,
    steps: usize,
}

impl Migrator<PgConnector> {
    /// Migrator for PostgreSQL.
    pub fn new(config: MigrateConfig) -> Self {
        Self::with_connector(config, PgConnector)
    }
}

impl<C: Connector> Migrator<C> {
    /// Migrator with a custom connector.
    pub fn with_connector(config: MigrateConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            root: PathBuf::from("."),
            connection: DEFAULT_CONNECTION.to_string(),
            steps: 1,
        }
    }

    /// Select the connection profile.
    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = name.into();
        self
    }

    /// Number of changesets a rollback reverts. Zero means one.
    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    /// Directory the changelog and include paths are relative to.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    /// Dispatch on a direction argument; no argument means up.
    pub async fn run(&self, direction: Option<&str>) -> MigrateResult<RunReport> {
        let direction = match direction {
            Some(arg) => arg.parse()?,
            None => Direction::default(),
        };

        match direction {
            Direction::Up => self.up().await.map(RunReport::Up),
            Direction::Down => self.rollback().await.map(RunReport::Down),
        }
    }

    /// Pre-test hook: migrate the `test` profile up.
    pub async fn before_test(&mut self) -> MigrateResult<UpReport> {
        self.connection = TEST_CONNECTION.to_string();
        self.up().await
    }

    /// Apply every changeset in the changelog that the ledger does not have.
    ///
    /// Stops at the first failing changeset.
    pub async fn up(&self) -> MigrateResult<UpReport> {
        let mut db = self.open().await?;

        self.lock(&mut db).await?;
        let result = self.apply_changelog(&mut db).await;
        let released = self.unlock(&mut db).await;
        let report = result?;
        released?;

        info!(applied = report.applied.len(), "Database up to date.");
        Ok(report)
    }

    /// Revert the most recently applied changesets, newest first.
    pub async fn rollback(&self) -> MigrateResult<RollbackReport> {
        let mut db = self.open().await?;

        self.lock(&mut db).await?;
        let result = self.rollback_steps(&mut db).await;
        let released = self.unlock(&mut db).await;
        let report = result?;
        released?;

        Ok(report)
    }

    /// Clear the ledger lock whoever holds it.
    ///
    /// For a run that died while holding the lock. Works whether or not
    /// locking is enabled in the config.
    pub async fn force_unlock(&self) -> MigrateResult<()> {
        let mut db = self.open().await?;
        db.release_lock().await?;
        warn!(connection = %self.connection, "ledger lock released by force");
        Ok(())
    }

    /// Applied ledger rows and pending changesets.
    pub async fn status(&self) -> MigrateResult<Status> {
        let mut db = self.open().await?;
        let applied = db.applied().await?;
        let known: HashSet<&str> = applied.iter().map(|row| row.id.as_str()).collect();

        let changelog = read_changelog(self.path(&self.config.changelog))?;
        let mut pending = Vec::new();
        for file in changelog.files() {
            let Some(migration) = read_migration(self.path(file))? else {
                continue;
            };
            for cs in &migration.change_sets {
                if !known.contains(cs.id.as_str()) {
                    pending.push(PendingChangeSet {
                        id: cs.id.clone(),
                        author: cs.author.clone(),
                        file: file.to_string(),
                    });
                }
            }
        }

        Ok(Status { applied, pending })
    }

    fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Connect to the selected profile and bootstrap the ledger.
    async fn open(&self) -> MigrateResult<C::Db> {
        let profile = self.config.connection(&self.connection)?;
        let url = profile.resolve_url()?;
        debug!(connection = %self.connection, "connecting");

        let mut db = self.connector.connect(&url).await?;
        ledger::ensure_tables(&mut db).await?;
        Ok(db)
    }

    async fn lock(&self, db: &mut C::Db) -> MigrateResult<()> {
        if self.config.lock {
            db.acquire_lock(&lock_owner()).await?;
            debug!("ledger lock acquired");
        }
        Ok(())
    }

    async fn unlock(&self, db: &mut C::Db) -> MigrateResult<()> {
        if self.config.lock {
            db.release_lock().await?;
            debug!("ledger lock released");
        }
        Ok(())
    }

    async fn apply_changelog(&self, db: &mut C::Db) -> MigrateResult<UpReport> {
        let changelog = read_changelog(self.path(&self.config.changelog))?;
        let mut report = UpReport::default();

        for file in changelog.files() {
            let Some(migration) = read_migration(self.path(file))? else {
                warn!(file, "skipping migration `{}` because it is not processable", file);
                report.skipped_files.push(file.to_string());
                continue;
            };

            for cs in &migration.change_sets {
                match cs.execute(db, file).await {
                    Ok(ApplyOutcome::Executed(_)) => report.applied.push(cs.id.clone()),
                    Ok(ApplyOutcome::AlreadyApplied) => report.already_applied += 1,
                    Err(e) => {
                        return Err(MigrateError::ChangeSet {
                            id: cs.id.clone(),
                            file: file.to_string(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    async fn rollback_steps(&self, db: &mut C::Db) -> MigrateResult<RollbackReport> {
        let mut report = RollbackReport::default();

        // Each step re-reads the newest ledger row. A step that cannot
        // revert anything still counts, and leaves the row in place.
        for _ in 0..self.steps.max(1) {
            let Some(row) = db.last_applied().await? else {
                info!("no migrations to run down.");
                break;
            };

            let Some(migration) = read_migration(self.path(&row.filename))? else {
                warn!(file = %row.filename, id = %row.id, "skipping rollback, file is not processable");
                report.skipped_files.push(row.filename.clone());
                continue;
            };

            let Some(cs) = migration.find(&row.id) else {
                warn!(file = %row.filename, id = %row.id, "changeset not found in its file");
                continue;
            };

            if !cs.is_reversible() {
                warn!(id = %cs.id, "no rollback statement declared, only the ledger row is removed");
            }

            if let Err(e) = cs.rollback(db).await {
                error!(id = %cs.id, "error rolling back `{}`", cs.id);
                return Err(e);
            }
            report.rolled_back.push(cs.id.clone());
        }

        Ok(report)
    }
}

fn lock_owner() -> String {
    format!("qail-migrate (pid {})", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Down);
        assert_eq!(Direction::default(), Direction::Up);
    }

    #[test]
    fn test_invalid_direction() {
        let err = "sideways".parse::<Direction>().unwrap_err();
        assert!(matches!(err, MigrateError::InvalidDirection(ref d) if d == "sideways"));
        assert_eq!(
            err.to_string(),
            "Invalid instruction 'sideways', please specify up or down"
        );
    }

    #[test]
    fn test_defaults() {
        let m = Migrator::new(MigrateConfig::default());
        assert_eq!(m.connection_name(), "development");
        assert_eq!(m.steps, 1);

        let m = m.connection("test").steps(0);
        assert_eq!(m.connection_name(), "test");
        assert_eq!(m.steps.max(1), 1);
    }
}
