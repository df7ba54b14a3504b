//! Command runs against a real allowlist file.

use std::path::Path;

use tempfile::TempDir;

use usegate::cli::{AddArgs, Cli, Command};
use usegate::commands::run;
use usegate::error::CliError;
use usegate_core::allowlist::StoreError;
use usegate_core::config::load_document;

fn run_in(config: &Path, command: Command) -> (Result<(), CliError>, String) {
    run_with_input(config, command, "")
}

fn run_with_input(config: &Path, command: Command, input: &str) -> (Result<(), CliError>, String) {
    let cli = Cli {
        config: Some(config.to_path_buf()),
        verbose: false,
        command,
    };
    let mut out = Vec::new();
    let result = run(cli, &mut out, &mut input.as_bytes());
    (result, String::from_utf8(out).unwrap())
}

fn add(id: &str, description: Option<&str>) -> Command {
    Command::Add(AddArgs {
        use_case_id: id.to_string(),
        description: description.map(str::to_string),
    })
}

#[test]
fn test_missing_file_created_with_defaults() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");

    let (result, out) = run_in(&config, Command::List);
    result.unwrap();
    assert!(out.contains("Allowed use cases (5):"));
    assert!(config.exists());
}

#[test]
fn test_add_then_validate() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");

    let (result, _) = run_in(&config, add("200001", Some("Billing service")));
    result.unwrap();

    let document = load_document(&config).unwrap();
    assert!(
        document
            .access_control
            .allowed_use_cases
            .contains(&"200001".to_string())
    );
    assert_eq!(
        document.access_control.use_case_descriptions["200001"],
        "Billing service"
    );

    let (result, out) = run_in(
        &config,
        Command::Validate {
            use_case_id: "200001".to_string(),
        },
    );
    result.unwrap();
    assert!(out.contains("Use case '200001' is ALLOWED"));
    assert!(out.contains("Description: Billing service"));
}

#[test]
fn test_duplicate_add_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");

    let (result, _) = run_in(&config, add("100000", None));
    assert!(matches!(
        result,
        Err(CliError::Store(StoreError::DuplicateId { .. }))
    ));
}

#[test]
fn test_remove_unknown_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");

    let (result, _) = run_in(
        &config,
        Command::Remove {
            use_case_id: "424242".to_string(),
        },
    );
    assert!(matches!(
        result,
        Err(CliError::Store(StoreError::NotFound { .. }))
    ));
}

#[test]
fn test_remove_then_backups_lists_one() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");

    let (result, out) = run_in(
        &config,
        Command::Remove {
            use_case_id: "100050".to_string(),
        },
    );
    result.unwrap();
    assert!(out.contains("Removed use case '100050'"));
    assert!(out.contains("Backup created: "));

    let (result, out) = run_in(&config, Command::Backups);
    result.unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.contains("config.yaml."));
}

#[test]
fn test_bulk_add_reports_skips() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    let ids = dir.path().join("ids.txt");
    std::fs::write(&ids, "# import\n100000\n200001:Billing\n\n200002\n").unwrap();

    let (result, out) = run_in(&config, Command::BulkAdd { file_path: ids });
    result.unwrap();
    assert!(out.contains("Skipped '100000' (already exists)"));
    assert!(out.contains("Bulk import complete: 2 added, 1 skipped"));
}

#[test]
fn test_bulk_add_malformed_line_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    let ids = dir.path().join("ids.txt");
    std::fs::write(&ids, "200001\n:no id\n").unwrap();

    run_in(&config, Command::List).0.unwrap();
    let before = std::fs::read_to_string(&config).unwrap();

    let (result, _) = run_in(&config, Command::BulkAdd { file_path: ids });
    assert!(matches!(
        result,
        Err(CliError::Store(StoreError::MalformedBulkLine { line: 2, .. }))
    ));
    assert_eq!(std::fs::read_to_string(&config).unwrap(), before);
}

#[test]
fn test_export_then_import_into_reset_store() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    let export = dir.path().join("export.txt");

    run_in(&config, add("200001", Some("Billing service"))).0.unwrap();
    run_in(&config, add("200002", None)).0.unwrap();

    let (result, out) = run_in(
        &config,
        Command::Export {
            file_path: export.clone(),
        },
    );
    result.unwrap();
    assert!(out.contains("Exported 7 use cases"));

    run_in(&config, Command::Reset { yes: true }).0.unwrap();
    let (_, listed) = run_in(&config, Command::List);
    assert!(!listed.contains("200001"));

    run_in(&config, Command::BulkAdd { file_path: export }).0.unwrap();
    let (_, listed) = run_in(&config, Command::List);
    assert!(listed.contains("  200001: Billing service"));
    assert!(listed.contains("  200002: Use case 200002"));
    assert!(listed.starts_with("Allowed use cases (7):"));
}

#[test]
fn test_reset_cancelled_keeps_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    run_in(&config, add("200001", None)).0.unwrap();

    let (result, out) = run_with_input(&config, Command::Reset { yes: false }, "\n");
    result.unwrap();
    assert!(out.contains("Reset cancelled"));

    let (result, _) = run_in(
        &config,
        Command::Validate {
            use_case_id: "200001".to_string(),
        },
    );
    result.unwrap();
}

#[test]
fn test_show_prints_yaml() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");

    let (result, out) = run_in(&config, Command::Show);
    result.unwrap();
    assert!(out.contains("access_control:"));
    assert!(out.contains("require_use_case_header: true"));
}

#[test]
#[serial_test::serial]
fn test_fail_closed_backup_policy_from_env() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.yaml");
    run_in(&config, Command::List).0.unwrap();
    std::fs::write(dir.path().join("backups"), "").unwrap();
    let before = std::fs::read(&config).unwrap();

    unsafe {
        std::env::set_var("USEGATE_BACKUP_POLICY", "fail-closed");
    }
    let (result, _) = run_in(&config, add("200001", None));
    unsafe {
        std::env::remove_var("USEGATE_BACKUP_POLICY");
    }

    assert!(matches!(
        result,
        Err(CliError::Store(StoreError::BackupFailed { .. }))
    ));
    assert_eq!(std::fs::read(&config).unwrap(), before);

    let (result, out) = run_in(&config, add("200001", None));
    result.unwrap();
    assert!(out.contains("Warning: backup failed: "));
}

#[test]
fn test_config_path_is_directory() {
    let dir = TempDir::new().unwrap();

    let (result, _) = run_in(dir.path(), Command::List);
    assert!(matches!(
        result,
        Err(CliError::Store(StoreError::PathIsDirectory { .. }))
    ));
}
