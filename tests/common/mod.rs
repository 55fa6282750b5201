//! In-memory database and project fixtures for engine tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use qail_migrate::config::MigrateConfig;
use qail_migrate::database::{Connector, Database};
use qail_migrate::engine::Migrator;
use qail_migrate::error::{MigrateError, MigrateResult};
use qail_migrate::ledger::{self, LedgerRow};
use tempfile::TempDir;

/// Everything the fake database has seen.
#[derive(Debug)]
pub struct State {
    pub reachable: bool,
    pub bootstrapped: bool,
    /// Batches executed, excluding the ledger bootstrap.
    pub executed: Vec<String>,
    pub tables: BTreeSet<String>,
    pub rows: Vec<LedgerRow>,
    /// Statements containing this marker fail.
    pub fail_on: Option<String>,
    pub locked_by: Option<String>,
    pub lock_events: Vec<&'static str>,
    pub urls: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            reachable: true,
            bootstrapped: false,
            executed: Vec::new(),
            tables: BTreeSet::new(),
            rows: Vec::new(),
            fail_on: None,
            locked_by: None,
            lock_events: Vec::new(),
            urls: Vec::new(),
        }
    }
}

impl State {
    pub fn ids(&self) -> Vec<String> {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|r| r.order_executed);
        rows.into_iter().map(|r| r.id).collect()
    }

    pub fn orders(&self) -> Vec<i32> {
        let mut orders: Vec<i32> = self.rows.iter().map(|r| r.order_executed).collect();
        orders.sort();
        orders
    }
}

/// Connector handing out handles onto one shared [`State`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
}

impl MemoryConnector {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl Connector for MemoryConnector {
    type Db = MemoryDb;

    async fn connect(&self, url: &str) -> MigrateResult<MemoryDb> {
        self.state().urls.push(url.to_string());
        Ok(MemoryDb {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MemoryDb {
    state: Arc<Mutex<State>>,
}

impl MemoryDb {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn ledger(&self) -> MigrateResult<MutexGuard<'_, State>> {
        let state = self.state();
        if !state.bootstrapped {
            return Err(MigrateError::Database(
                "relation \"databasechangelog\" does not exist".to_string(),
            ));
        }
        Ok(state)
    }
}

impl Database for MemoryDb {
    async fn ping(&mut self) -> MigrateResult<()> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(MigrateError::Connection("connection refused".to_string()))
        }
    }

    async fn execute_batch(&mut self, sql: &str) -> MigrateResult<()> {
        let mut state = self.state();
        if sql == ledger::SCHEMA {
            state.bootstrapped = true;
            return Ok(());
        }

        if let Some(marker) = &state.fail_on {
            if sql.contains(marker.as_str()) {
                return Err(MigrateError::Database(format!(
                    "syntax error at or near \"{}\"",
                    marker
                )));
            }
        }

        for statement in sql.split(';') {
            apply_ddl(&mut state.tables, statement)?;
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    async fn max_order(&mut self) -> MigrateResult<i32> {
        Ok(self
            .ledger()?
            .rows
            .iter()
            .map(|r| r.order_executed)
            .max()
            .unwrap_or(0))
    }

    async fn is_applied(&mut self, id: &str) -> MigrateResult<bool> {
        Ok(self.ledger()?.rows.iter().any(|r| r.id == id))
    }

    async fn record(&mut self, row: &LedgerRow) -> MigrateResult<()> {
        let mut state = self.ledger()?;
        if state.rows.iter().any(|r| r.id == row.id) {
            return Err(MigrateError::Database(format!(
                "duplicate key value violates unique constraint (id)=({})",
                row.id
            )));
        }
        state.rows.push(row.clone());
        Ok(())
    }

    async fn remove(&mut self, id: &str) -> MigrateResult<()> {
        self.ledger()?.rows.retain(|r| r.id != id);
        Ok(())
    }

    async fn last_applied(&mut self) -> MigrateResult<Option<LedgerRow>> {
        Ok(self
            .ledger()?
            .rows
            .iter()
            .max_by_key(|r| r.order_executed)
            .cloned())
    }

    async fn applied(&mut self) -> MigrateResult<Vec<LedgerRow>> {
        let mut rows = self.ledger()?.rows.clone();
        rows.sort_by_key(|r| r.order_executed);
        Ok(rows)
    }

    async fn acquire_lock(&mut self, owner: &str) -> MigrateResult<()> {
        let mut state = self.ledger()?;
        if let Some(holder) = &state.locked_by {
            return Err(MigrateError::Locked(holder.clone()));
        }
        state.locked_by = Some(owner.to_string());
        state.lock_events.push("acquire");
        Ok(())
    }

    async fn release_lock(&mut self) -> MigrateResult<()> {
        let mut state = self.ledger()?;
        state.locked_by = None;
        state.lock_events.push("release");
        Ok(())
    }
}

/// Track `CREATE TABLE` / `DROP TABLE` so round trips can be observed.
fn apply_ddl(tables: &mut BTreeSet<String>, statement: &str) -> MigrateResult<()> {
    let lowered = statement.trim().to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    match words.as_slice() {
        ["create", "table", "if", "not", "exists", name, ..] => {
            tables.insert(table_name(name));
        }
        ["create", "table", name, ..] => {
            let name = table_name(name);
            if !tables.insert(name.clone()) {
                return Err(MigrateError::Database(format!(
                    "relation \"{}\" already exists",
                    name
                )));
            }
        }
        ["drop", "table", "if", "exists", name, ..] => {
            tables.remove(&table_name(name));
        }
        ["drop", "table", name, ..] => {
            let name = table_name(name);
            if !tables.remove(&name) {
                return Err(MigrateError::Database(format!(
                    "table \"{}\" does not exist",
                    name
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

fn table_name(word: &str) -> String {
    word.split('(').next().unwrap_or(word).to_string()
}

/// One changeset for [`migration`]: (id, forward sql, rollback sql).
pub type Cs<'a> = (&'a str, &'a str, &'a str);

/// Migration document XML.
pub fn migration(change_sets: &[Cs<'_>]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
         <databaseChangeLog xmlns=\"http://www.liquibase.org/xml/ns/dbchangelog\">\n",
    );
    for (id, sql, rollback) in change_sets {
        xml.push_str(&format!("  <changeSet id=\"{}\" author=\"ox\">\n", id));
        xml.push_str(&format!("    <sql>{}</sql>\n", sql));
        if !rollback.is_empty() {
            xml.push_str(&format!("    <rollback>{}</rollback>\n", rollback));
        }
        xml.push_str("  </changeSet>\n");
    }
    xml.push_str("</databaseChangeLog>\n");
    xml
}

/// Changelog XML including `files` in order.
pub fn changelog(files: &[&str]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
         <databaseChangeLog xmlns=\"http://www.liquibase.org/xml/ns/dbchangelog\">\n",
    );
    for file in files {
        xml.push_str(&format!("  <include file=\"{}\" />\n", file));
    }
    xml.push_str("</databaseChangeLog>\n");
    xml
}

/// Write `files` (relative path, content) into a fresh project directory.
pub fn project(files: &[(&str, String)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

pub fn write(root: &Path, path: &str, content: &str) {
    let target = root.join(path);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(target, content).unwrap();
}

pub fn config() -> MigrateConfig {
    MigrateConfig::builder()
        .connection("development", "mem://development")
        .connection("test", "mem://test")
        .build()
}

/// Migrator over `root` with a fresh in-memory database.
pub fn migrator(root: &Path, config: MigrateConfig) -> (Migrator<MemoryConnector>, MemoryConnector) {
    let connector = MemoryConnector::default();
    let migrator = Migrator::with_connector(config, connector.clone()).root(root);
    (migrator, connector)
}
