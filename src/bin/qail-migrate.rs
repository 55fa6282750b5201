//! qail-migrate — The migration CLI
//!
//! # Usage
//!
//! ```bash
//! # Apply pending changesets (direction defaults to up)
//! qail-migrate migrate
//!
//! # Roll back the last three changesets on the test database
//! qail-migrate migrate down --conn test --steps 3
//!
//! # New migration file, included in migrations/changelog.xml
//! qail-migrate generate add_devices
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use qail_migrate::engine::PendingChangeSet;
use qail_migrate::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qail-migrate")]
#[command(author = "QAIL Contributors")]
#[command(version)]
#[command(about = "🪝 Changelog-driven schema migrations", long_about = None)]
#[command(after_help = "EXAMPLES:
    qail-migrate migrate
    qail-migrate migrate down --steps 2
    qail-migrate status --conn test --format json
    qail-migrate unlock
    qail-migrate generate billing/addInvoices")]
struct Cli {
    /// Config file (default: ./qail-migrate.toml)
    #[arg(short, long, global = true, env = "QAIL_MIGRATE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply (up) or roll back (down) changesets
    Migrate {
        /// up or down; defaults to up
        direction: Option<String>,

        /// Connection profile to use
        #[arg(long = "conn", default_value = "development")]
        conn: String,

        /// Number of changesets to roll back
        #[arg(short, long, default_value_t = 1)]
        steps: usize,
    },
    /// Migrate the test profile up (pre-test hook)
    BeforeTest,
    /// Show applied and pending changesets
    Status {
        /// Connection profile to use
        #[arg(long = "conn", default_value = "development")]
        conn: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Release a ledger lock left behind by an interrupted run
    Unlock {
        /// Connection profile to use
        #[arg(long = "conn", default_value = "development")]
        conn: String,
    },
    /// Generate a new migration file
    Generate {
        /// Migration name, optionally prefixed with a folder
        name: String,

        /// Destination folder of the generated migration
        #[arg(short, long, default_value = "migrations")]
        base: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<MigrateConfig> {
    let config = match &cli.config {
        Some(path) => MigrateConfig::from_file(path)?,
        None => MigrateConfig::discover()?,
    };
    Ok(config)
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Migrate {
            direction,
            conn,
            steps,
        } => {
            let migrator = Migrator::new(load_config(cli)?)
                .connection(conn.as_str())
                .steps(*steps);
            let report = migrator.run(direction.as_deref()).await?;
            print_run_report(&report);
        }
        Commands::BeforeTest => {
            let mut migrator = Migrator::new(load_config(cli)?);
            let report = migrator.before_test().await?;
            print_run_report(&RunReport::Up(report));
        }
        Commands::Status { conn, format } => {
            let migrator = Migrator::new(load_config(cli)?).connection(conn.as_str());
            let status = migrator.status().await?;
            print_status(&status, format)?;
        }
        Commands::Unlock { conn } => {
            let migrator = Migrator::new(load_config(cli)?).connection(conn.as_str());
            migrator.force_unlock().await?;
            println!("{}", "✓ Ledger lock released".green());
        }
        Commands::Generate { name, base } => {
            // No config file at all is fine here; a broken one is not.
            let mut generator = Generator::new().base_folder(base);
            if let Some(config) = MigrateConfig::locate(cli.config.as_deref(), Path::new("."))? {
                generator = generator.changelog(config.changelog);
            }

            let generated = generator.generate(Path::new("."), name)?;
            println!(
                "{} {}",
                "✓ Created:".green(),
                generated.path.display().to_string().cyan()
            );
            if generated.added_to_changelog {
                println!("  {}", "Added to the changelog".dimmed());
            }
        }
    }

    Ok(())
}

fn print_run_report(report: &RunReport) {
    match report {
        RunReport::Up(up) => {
            for file in &up.skipped_files {
                println!("  {} {} (not processable)", "○".dimmed(), file.yellow());
            }
            if up.applied.is_empty() {
                println!("{}", "✓ Database up to date.".green());
            } else {
                for id in &up.applied {
                    println!("  {} {}", "↑".green(), id);
                }
                println!(
                    "{}",
                    format!("✓ {} changeset(s) applied", up.applied.len())
                        .green()
                        .bold()
                );
            }
        }
        RunReport::Down(down) => {
            for file in &down.skipped_files {
                println!("  {} {} (not processable)", "○".dimmed(), file.yellow());
            }
            if down.rolled_back.is_empty() {
                println!("{}", "No migrations to run down.".dimmed());
            } else {
                for id in &down.rolled_back {
                    println!("  {} {}", "↓".yellow(), id);
                }
                println!(
                    "{}",
                    format!("✓ {} changeset(s) rolled back", down.rolled_back.len())
                        .green()
                        .bold()
                );
            }
        }
    }
}

fn print_status(status: &Status, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        OutputFormat::Table => {
            println!("{}", "📋 Migration Status".cyan().bold());
            println!();

            let width = status
                .applied
                .iter()
                .map(|r| r.id.len())
                .chain(status.pending.iter().map(|p| p.id.len()))
                .max()
                .unwrap_or(2)
                .max(2);

            println!(
                "{:>5} │ {:width$} │ {:19} │ {}",
                "order".white().bold(),
                "id".white().bold(),
                "executed".white().bold(),
                "file".white().bold(),
                width = width
            );
            println!("{}", "─".repeat(width + 40).dimmed());

            for row in &status.applied {
                println!(
                    "{:>5} │ {:width$} │ {:19} │ {}",
                    row.order_executed,
                    row.id.green(),
                    row.date_executed.format("%Y-%m-%d %H:%M:%S"),
                    row.filename.dimmed(),
                    width = width
                );
            }
            for PendingChangeSet { id, file, .. } in &status.pending {
                println!(
                    "{:>5} │ {:width$} │ {:19} │ {}",
                    "⏳",
                    id.yellow(),
                    "pending",
                    file.dimmed(),
                    width = width
                );
            }

            println!();
            println!(
                "{} applied, {} pending",
                status.applied.len().to_string().green(),
                status.pending.len().to_string().yellow()
            );
        }
    }
    Ok(())
}
