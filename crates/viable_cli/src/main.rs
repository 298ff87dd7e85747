//! Operator CLI over the viable state store.
//!
//! # Responsibility
//! - Resolve store and logging configuration from flags and environment.
//! - Expose read-only diagnosis plus the few maintenance writes an operator
//!   needs (migrate in place, clear a stale lock).

use clap::{Parser, Subcommand};
use log::warn;
use std::process::ExitCode;
use viable_core::config::{ENV_HOME, ENV_MODE};
use viable_core::{
    init_logging, Inspection, LoadOutcome, LoggingConfig, Store, StoreConfig, StoreError,
};

#[derive(Parser)]
#[command(author, version, about = "Inspect and maintain the viable state file")]
struct Cli {
    /// Base directory holding the state file (overrides VIABLE_HOME).
    #[arg(long, global = true)]
    home: Option<String>,
    /// Use the development state file.
    #[arg(long, global = true, default_value_t = false)]
    dev: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the document and print collection counts.
    Show,
    /// Diagnose the state file without changing anything.
    Check,
    /// Rewrite an older state file at the current schema version.
    Migrate,
    /// List quarantined copies of unreadable state files.
    Quarantine,
    /// Remove the lock file left behind by a crashed writer.
    Unlock,
    /// Print the resolved state, lock and log paths.
    Path,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let lookup = |key: &str| match key {
        ENV_HOME if cli.home.is_some() => cli.home.clone(),
        ENV_MODE if cli.dev => Some("development".to_string()),
        _ => std::env::var(key).ok(),
    };
    let config = match StoreConfig::from_lookup(lookup) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };
    let logging = match LoggingConfig::from_lookup(lookup, &config) {
        Ok(logging) => logging,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };
    // Logging is diagnostic only; the command still runs without it.
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: logging disabled: {err}");
    }

    let store = Store::new(&config);
    let result = match cli.command {
        Command::Show => show(&store),
        Command::Check => check(&store),
        Command::Migrate => migrate(&store),
        Command::Quarantine => list_quarantine(&store),
        Command::Unlock => unlock(&store),
        Command::Path => {
            println!("state: {}", store.path().display());
            println!("lock:  {}", store.lock_path().display());
            println!("logs:  {}", logging.log_dir.display());
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            warn!(
                "event=cli_command module=cli status=error error_code={}",
                err.code()
            );
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn show(store: &Store) -> Result<ExitCode, StoreError> {
    let report = store.load_with_report();
    let document = &report.document;
    println!("path: {}", store.path().display());
    println!("outcome: {}", report.outcome);
    println!("revision: {}", report.revision);
    println!("schemaVersion: {}", document.schema_version);
    for (name, count) in [
        ("nodes", document.nodes.len()),
        ("variables", document.variables.len()),
        ("episodes", document.episodes.len()),
        ("actions", document.actions.len()),
        ("notes", document.notes.len()),
        ("models", document.models.len()),
        ("links", document.links.len()),
        ("exceptions", document.exceptions.len()),
        ("proxies", document.proxies.len()),
        ("proxyReadings", document.proxy_readings.len()),
    ] {
        println!("  {name:<14}{count}");
    }
    Ok(ExitCode::SUCCESS)
}

fn check(store: &Store) -> Result<ExitCode, StoreError> {
    match store.inspect()? {
        Inspection::Absent => println!("absent: {} (load would seed)", store.path().display()),
        Inspection::Valid {
            from_level,
            entity_count,
            revision,
        } => println!(
            "valid: level {from_level}, {entity_count} entities, revision {revision}"
        ),
        Inspection::Unparsable(err) => {
            println!("invalid: not JSON: {err}");
            return Ok(ExitCode::FAILURE);
        }
        Inspection::Invalid(err) => {
            println!("invalid: {err}");
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn migrate(store: &Store) -> Result<ExitCode, StoreError> {
    let report = store.load_with_report();
    match &report.outcome {
        LoadOutcome::Migrated { from_level } => {
            let revision = store.save_if_unchanged(&report.document, &report.revision)?;
            println!("migrated from level {from_level}; revision {revision}");
            Ok(ExitCode::SUCCESS)
        }
        LoadOutcome::Loaded { .. } => {
            println!("already current");
            Ok(ExitCode::SUCCESS)
        }
        LoadOutcome::Seeded => {
            println!("no state file; nothing to migrate");
            Ok(ExitCode::SUCCESS)
        }
        LoadOutcome::Recovered { .. } => {
            println!("{}", report.outcome);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn list_quarantine(store: &Store) -> Result<ExitCode, StoreError> {
    let files = store.quarantined();
    if files.is_empty() {
        println!("no quarantined files");
    }
    for path in files {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn unlock(store: &Store) -> Result<ExitCode, StoreError> {
    if store.break_lock()? {
        println!("removed {}", store.lock_path().display());
    } else {
        println!("no lock at {}", store.lock_path().display());
    }
    Ok(ExitCode::SUCCESS)
}
