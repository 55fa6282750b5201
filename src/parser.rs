//! Changelog and migration documents.
//!
//! Both use the Liquibase XML layout:
//!
//! ```text
//! migrations/changelog.xml          migrations/20210203-users.xml
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │ <databaseChangeLog>      │      │ <databaseChangeLog>          │
//! │   <include file="…"/> ───┼────► │   <changeSet id=… author=…>  │
//! │   <include file="…"/>    │      │     <sql>…</sql>             │
//! │ </databaseChangeLog>     │      │     <rollback>…</rollback>   │
//! └──────────────────────────┘      │   </changeSet>               │
//!                                   │ </databaseChangeLog>         │
//!                                   └──────────────────────────────┘
//! ```
//!
//! Include order is the global apply order; changeset order inside a file
//! is the apply order for that file. Files without the `.xml` extension are
//! not migrations and are reported as such rather than rejected.

use std::path::Path;

use serde::Deserialize;

use crate::changeset::ChangeSet;
use crate::error::{MigrateError, MigrateResult};

/// Default changelog location, relative to the working directory.
pub const DEFAULT_CHANGELOG: &str = "migrations/changelog.xml";

/// Extension of processable migration files.
pub const MIGRATION_EXTENSION: &str = "xml";

/// A migration document: changesets from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Migration {
    #[serde(rename = "changeSet", default)]
    pub change_sets: Vec<ChangeSet>,
}

impl Migration {
    /// Find a changeset by id.
    pub fn find(&self, id: &str) -> Option<&ChangeSet> {
        self.change_sets.iter().find(|cs| cs.id == id)
    }
}

/// A changelog document: ordered references to migration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Changelog {
    #[serde(rename = "include", default)]
    pub migrations: Vec<Include>,
}

/// One `<include file="…"/>` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Include {
    #[serde(rename = "@file")]
    pub file: String,
}

impl Changelog {
    /// Referenced files in application order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(|i| i.file.as_str())
    }
}

/// Whether a path names a processable migration file.
pub fn is_processable(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext == MIGRATION_EXTENSION)
}

/// Parse changelog XML. `path` is only used in errors.
pub fn parse_changelog(content: &str, path: impl AsRef<Path>) -> MigrateResult<Changelog> {
    quick_xml::de::from_str(content).map_err(|e| MigrateError::parse(path.as_ref(), e))
}

/// Parse migration XML. `path` is only used in errors.
pub fn parse_migration(content: &str, path: impl AsRef<Path>) -> MigrateResult<Migration> {
    quick_xml::de::from_str(content).map_err(|e| MigrateError::parse(path.as_ref(), e))
}

/// Read and parse the changelog at `path`.
pub fn read_changelog(path: impl AsRef<Path>) -> MigrateResult<Changelog> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
    parse_changelog(&content, path)
}

/// Read and parse a migration file.
///
/// The file must exist. `Ok(None)` means it is not a migration (wrong
/// extension) and should be skipped.
pub fn read_migration(path: impl AsRef<Path>) -> MigrateResult<Option<Migration>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;

    if !is_processable(path) {
        return Ok(None);
    }

    parse_migration(&content, path).map(Some)
}
