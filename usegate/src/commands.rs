//! Command execution.
//!
//! Output goes to the given writer so tests can capture it; the confirmation
//! for `reset` is read from the given reader.

use std::io::{BufRead, Write};

use tracing::debug;
use usegate_core::allowlist::{AllowlistStore, BackupStatus, StoreOptions};
use usegate_core::config::{StoreDefaults, resolve_config_path};

use crate::cli::{AddArgs, Cli, Command};
use crate::error::{CliError, CliResult};

/// Open the store named by `--config` (or its fallbacks) and run the command.
pub fn run<W: Write, R: BufRead>(cli: Cli, out: &mut W, input: &mut R) -> CliResult<()> {
    let path = resolve_config_path(cli.config.as_deref());
    debug!(path = %path.display(), command = ?cli.command, "Running command");

    let defaults = StoreDefaults::from_env();
    let store = AllowlistStore::open(
        &path,
        StoreOptions {
            lock_timeout: defaults.lock_timeout,
            backup_policy: defaults.backup_policy,
            ..StoreOptions::default()
        },
    )?;

    execute(&store, cli.command, out, input)
}

/// Run one command against an open store.
pub fn execute<W: Write, R: BufRead>(
    store: &AllowlistStore,
    command: Command,
    out: &mut W,
    input: &mut R,
) -> CliResult<()> {
    match command {
        Command::List => list(store, out),
        Command::Add(AddArgs {
            use_case_id,
            description,
        }) => {
            let outcome = store.add(&use_case_id, description.as_deref())?;
            writeln!(out, "Added use case '{}'", use_case_id.trim())?;
            report_backup(out, &outcome.backup)?;
            saved(store, out)
        }
        Command::Remove { use_case_id } => {
            let outcome = store.remove(&use_case_id)?;
            writeln!(out, "Removed use case '{}'", use_case_id.trim())?;
            report_backup(out, &outcome.backup)?;
            saved(store, out)
        }
        Command::Validate { use_case_id } => validate(store, &use_case_id, out),
        Command::Show => {
            write!(out, "{}", store.show()?)?;
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes && !confirm(out, input)? {
                writeln!(out, "Reset cancelled")?;
                return Ok(());
            }
            let outcome = store.reset()?;
            report_backup(out, &outcome.backup)?;
            writeln!(out, "Configuration reset to defaults")?;
            saved(store, out)
        }
        Command::BulkAdd { file_path } => {
            let report = store.bulk_add_file(&file_path)?;
            for id in &report.skipped {
                writeln!(out, "Skipped '{id}' (already exists)")?;
            }
            report_backup(out, &report.backup)?;
            writeln!(
                out,
                "Bulk import complete: {} added, {} skipped",
                report.added.len(),
                report.skipped.len()
            )?;
            if report.added.is_empty() {
                return Ok(());
            }
            saved(store, out)
        }
        Command::Export { file_path } => {
            let count = store.export(&file_path)?;
            writeln!(out, "Exported {count} use cases to {}", file_path.display())?;
            Ok(())
        }
        Command::Backups => backups(store, out),
    }
}

fn list<W: Write>(store: &AllowlistStore, out: &mut W) -> CliResult<()> {
    let records = store.list();
    if records.is_empty() {
        writeln!(out, "No use cases configured")?;
        return Ok(());
    }

    writeln!(out, "Allowed use cases ({}):", records.len())?;
    for record in &records {
        writeln!(out, "  {}: {}", record.id, record.display_description())?;
    }
    Ok(())
}

fn validate<W: Write>(store: &AllowlistStore, id: &str, out: &mut W) -> CliResult<()> {
    let snapshot = store.snapshot();
    match snapshot.lookup(id.trim()) {
        Some(record) => {
            writeln!(out, "Use case '{}' is ALLOWED", id.trim())?;
            writeln!(out, "  Description: {}", record.display_description())?;
            Ok(())
        }
        None => {
            writeln!(out, "Use case '{}' is DENIED", id.trim())?;
            writeln!(out, "  Allowed use cases: {}", snapshot.ids().join(", "))?;
            Err(CliError::Denied {
                id: id.trim().to_string(),
            })
        }
    }
}

fn backups<W: Write>(store: &AllowlistStore, out: &mut W) -> CliResult<()> {
    let backups = store.backups().list(store.path())?;
    if backups.is_empty() {
        writeln!(out, "No backups in {}", store.backups().dir().display())?;
        return Ok(());
    }
    for path in backups {
        writeln!(out, "{}", path.display())?;
    }
    Ok(())
}

fn confirm<W: Write, R: BufRead>(out: &mut W, input: &mut R) -> CliResult<bool> {
    write!(
        out,
        "This will reset the allowlist and security settings to defaults. Continue? (y/N): "
    )?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn report_backup<W: Write>(out: &mut W, status: &BackupStatus) -> CliResult<()> {
    match status {
        BackupStatus::Created(path) => writeln!(out, "Backup created: {}", path.display())?,
        BackupStatus::Failed(reason) => writeln!(out, "Warning: backup failed: {reason}")?,
        BackupStatus::NotNeeded => {}
    }
    Ok(())
}

fn saved<W: Write>(store: &AllowlistStore, out: &mut W) -> CliResult<()> {
    writeln!(out, "Configuration saved to {}", store.path().display())?;
    Ok(())
}
