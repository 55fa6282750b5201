//! Migration file generator.
//!
//! `qail-migrate generate add_devices` writes
//! `migrations/<timestamp>-add_devices.xml` from a template and appends an
//! include for it to the changelog:
//!
//! ```text
//! name                      file
//! ─────────────────────     ──────────────────────────────────────────
//! addDevices                migrations/20210203002030-add_devices.xml
//! billing/addInvoices       migrations/billing/20210203002030-add_invoices.xml
//! changelog                 migrations/changelog.xml   (skeleton)
//! ```

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{MigrateError, MigrateResult};
use crate::parser::{DEFAULT_CHANGELOG, MIGRATION_EXTENSION};

const MIGRATION_TEMPLATE: &str = include_str!("../templates/migration.xml");
const CHANGELOG_TEMPLATE: &str = include_str!("../templates/changelog.xml");

const CLOSING_TAG: &str = "</databaseChangeLog>";

/// Name that produces a changelog skeleton instead of a migration.
pub const CHANGELOG_NAME: &str = "changelog";

/// Where generated files went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    /// Path relative to the project root, as written to the changelog.
    pub path: PathBuf,
    /// Whether an include was appended to the changelog.
    pub added_to_changelog: bool,
}

/// Generates migration files under a base folder.
#[derive(Debug, Clone)]
pub struct Generator {
    base_folder: PathBuf,
    changelog: PathBuf,
    timestamp: Option<String>,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            base_folder: PathBuf::from("migrations"),
            changelog: PathBuf::from(DEFAULT_CHANGELOG),
            timestamp: None,
        }
    }
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder new migrations go into, relative to the root.
    pub fn base_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.base_folder = folder.into();
        self
    }

    /// Changelog to append includes to, relative to the root.
    pub fn changelog(mut self, path: impl Into<PathBuf>) -> Self {
        self.changelog = path.into();
        self
    }

    /// Fixed timestamp prefix instead of the current time.
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Generate a migration for `name` under `root`.
    ///
    /// A missing changelog is not an error: the migration is still written,
    /// it just is not included anywhere yet.
    pub fn generate(&self, root: &Path, name: &str) -> MigrateResult<Generated> {
        if name.trim().is_empty() {
            return Err(MigrateError::NameArgMissing);
        }

        if name == CHANGELOG_NAME {
            return self.generate_changelog(root);
        }

        let timestamp = self
            .timestamp
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
        let filename = compose_filename(name, &timestamp)?;

        let mut relative = self.base_folder.clone();
        if let Some(dir) = Path::new(name).parent().filter(|d| !d.as_os_str().is_empty()) {
            relative.push(dir);
        }
        relative.push(&filename);

        let target = root.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MigrateError::io(parent, e))?;
        }

        let stem = filename.trim_end_matches(".xml");
        let content = MIGRATION_TEMPLATE.replace("{{name}}", stem);
        std::fs::write(&target, content).map_err(|e| MigrateError::io(&target, e))?;
        info!(path = %relative.display(), "migration generated");

        let added_to_changelog = match self.add_to_changelog(root, &relative) {
            Ok(()) => {
                info!(changelog = %self.changelog.display(), "migration added to the changelog");
                true
            }
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        Ok(Generated {
            path: relative,
            added_to_changelog,
        })
    }

    /// Append `<include file="…"/>` for `entry` to the changelog.
    ///
    /// The changelog is left untouched when it is malformed.
    pub fn add_to_changelog(&self, root: &Path, entry: &Path) -> MigrateResult<()> {
        let path = root.join(&self.changelog);
        let current = std::fs::read_to_string(&path).map_err(|e| MigrateError::io(&path, e))?;

        let Some(close) = closing_tag_position(&current) else {
            return Err(MigrateError::InvalidChangelogFormat(path));
        };

        let file = entry.to_string_lossy().replace('\\', "/");
        let mut result = String::with_capacity(current.len() + file.len() + 32);
        result.push_str(current[..close].trim_end());
        result.push('\n');
        result.push_str(&format!("    <include file=\"{}\" />\n", file));
        result.push_str(&current[close..]);

        std::fs::write(&path, result).map_err(|e| MigrateError::io(&path, e))
    }

    fn generate_changelog(&self, root: &Path) -> MigrateResult<Generated> {
        let relative = self.base_folder.join(format!("{}.{}", CHANGELOG_NAME, MIGRATION_EXTENSION));
        let target = root.join(&relative);
        if target.exists() {
            return Err(MigrateError::AlreadyExists(target));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MigrateError::io(parent, e))?;
        }
        std::fs::write(&target, CHANGELOG_TEMPLATE).map_err(|e| MigrateError::io(&target, e))?;
        info!(path = %relative.display(), "changelog generated");

        Ok(Generated {
            path: relative,
            added_to_changelog: false,
        })
    }
}

/// Byte offset of the closing `</databaseChangeLog>`, if the changelog has
/// an XML prolog and both wrapping tags.
fn closing_tag_position(content: &str) -> Option<usize> {
    if !content.trim_start().starts_with("<?xml") {
        return None;
    }
    let open = content.find("<databaseChangeLog")?;
    let close = content.rfind(CLOSING_TAG)?;
    (close > open).then_some(close)
}

/// `<timestamp>-<snake_case name>.xml` from the last path segment of `name`.
pub fn compose_filename(name: &str, timestamp: &str) -> MigrateResult<String> {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| MigrateError::InvalidName(name.to_string()))?;

    let underscored = to_snake_case(&base);
    if underscored.is_empty() {
        return Err(MigrateError::InvalidName(name.to_string()));
    }

    Ok(format!("{}-{}.{}", timestamp, underscored, MIGRATION_EXTENSION))
}

/// `addDevices` → `add_devices`, `HTTPServer` → `http_server`.
fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                    out.push('_');
                }
            }
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }

    out.trim_end_matches('_').to_string()
}
