//! # qail-migrate — changelog-driven schema migrations
//!
//! > **Apply once. Roll back in order. Run it again safely.**
//!
//! Changesets live in Liquibase-style XML files listed by a changelog.
//! Applied changesets are recorded in a ledger table inside the target
//! database, so `up` only runs what is missing and `down` reverts exactly
//! what ran last.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use qail_migrate::prelude::*;
//!
//! let config = MigrateConfig::discover()?;
//!
//! // Apply everything not yet in the ledger
//! let report = Migrator::new(config.clone()).up().await?;
//!
//! // Revert the two most recent changesets
//! Migrator::new(config).steps(2).rollback().await?;
//! ```
//!
//! ## Ledger
//!
//! | Column          | Meaning                                  |
//! |-----------------|------------------------------------------|
//! | `id`            | Changeset id, primary key                |
//! | `author`        | Changeset author                         |
//! | `filename`      | Migration file the changeset came from   |
//! | `dateexecuted`  | When it was applied                      |
//! | `orderexecuted` | Strictly increasing application position |
//! | `exectype`      | `EXECUTED`                               |

pub mod changeset;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod parser;

pub mod prelude {
    pub use crate::changeset::{ApplyOutcome, ChangeSet};
    pub use crate::config::{ConnectionProfile, MigrateConfig};
    pub use crate::database::{Connector, Database, PgConnector, PgDatabase};
    pub use crate::engine::{Direction, Migrator, RollbackReport, RunReport, Status, UpReport};
    pub use crate::error::*;
    pub use crate::generator::Generator;
    pub use crate::ledger::LedgerRow;
    pub use crate::parser::{Changelog, Migration, read_changelog, read_migration};
}

/// Parse a migration document from XML text.
///
/// # Example
///
/// ```
/// let m = qail_migrate::parse(
///     r#"<databaseChangeLog>
///          <changeSet id="1-users" author="ox">
///            <sql>CREATE TABLE users (id int);</sql>
///            <rollback>DROP TABLE users;</rollback>
///          </changeSet>
///        </databaseChangeLog>"#,
/// )
/// .unwrap();
/// assert_eq!(m.change_sets[0].id, "1-users");
/// ```
pub fn parse(input: &str) -> Result<parser::Migration, error::MigrateError> {
    parser::parse_migration(input, "<input>")
}
