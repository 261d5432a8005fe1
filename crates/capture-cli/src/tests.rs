use capture_core::models::{Payload, RecordId, SyncConflict, TableName};
use capture_core::sync::{ConflictedRecord, SyncGap, SyncReport};
use capture_core::{MutationContext, SyncEngine};
use clap::Parser;

use crate::cli::{Cli, Commands, CompletionShell, ConfigCommands};
use crate::commands::common::{
    default_editor, format_relative_time, format_sync_conflict_lines, format_sync_timestamp,
    normalize_content, normalize_record_identifier, parse_optional_table, parse_table,
    payload_preview, resolve_payload, resolve_record,
};
use crate::commands::completions::render_completions;
use crate::commands::config::apply_profile_updates;
use crate::commands::show::leaf_items;
use crate::commands::sync::format_report_lines;
use crate::config_profiles::CliProfile;
use crate::error::CliError;

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  {}  "), Some("{}".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn normalize_record_identifier_rejects_empty() {
    assert!(matches!(
        normalize_record_identifier("   "),
        Err(CliError::EmptyRecordId)
    ));
    assert_eq!(normalize_record_identifier(" 0189 ").unwrap(), "0189");
}

#[test]
fn parse_table_validates_names() {
    assert_eq!(parse_table(" rows ").unwrap(), TableName::rows());
    assert!(matches!(
        parse_table("Rows"),
        Err(CliError::InvalidTable(_))
    ));
    assert_eq!(parse_optional_table(None).unwrap(), None);
}

#[test]
fn explicit_payload_is_parsed_and_assignments_applied() {
    let payload = resolve_payload(
        Some(r#"{"label":"oak","height":3}"#),
        &["height=4".to_string(), "note=old tree".to_string()],
        None,
    )
    .unwrap();

    assert_eq!(payload.get_str("label"), Some("oak"));
    assert_eq!(payload.get("height"), Some(&serde_json::json!(4)));
    assert_eq!(payload.get_str("note"), Some("old tree"));
}

#[test]
fn assignments_patch_the_base_payload() {
    let base = Payload::new().with("label", "oak").with("height", 3);
    let payload = resolve_payload(None, &["height=5".to_string()], Some(&base)).unwrap();

    assert_eq!(payload.get_str("label"), Some("oak"));
    assert_eq!(payload.get("height"), Some(&serde_json::json!(5)));
}

#[test]
fn non_object_payload_is_rejected() {
    assert!(matches!(
        resolve_payload(Some("[1, 2]"), &[], None),
        Err(CliError::InvalidPayload(_))
    ));
    assert!(matches!(
        resolve_payload(Some("{}"), &["missing-equals".to_string()], None),
        Err(CliError::InvalidPayload(_))
    ));
}

#[test]
fn payload_preview_truncates_long_values() {
    let payload = Payload::new().with("label", "a very long label that keeps going");
    assert_eq!(payload_preview(&payload, 12), "label=a v...");
    assert_eq!(
        payload_preview(&Payload::new().with("n", 1), 40),
        "n=1".to_string()
    );
}

#[test]
fn relative_time_buckets() {
    let now = 10 * 24 * 60 * 60 * 1000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 60 * 60_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 24 * 60 * 60_000, now), "2d ago");
}

#[test]
fn sync_timestamp_is_formatted_in_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn conflict_history_lines_name_source_and_revisions() {
    let record_id: RecordId = "01890a5d-ac96-774b-bcce-b302099a8057".parse().unwrap();
    let conflict = SyncConflict {
        id: 1,
        table: TableName::rows(),
        record_id,
        winner_rev: "2-aa".parse().unwrap(),
        losing_rev: "2-bb".parse().unwrap(),
        detected_at: 0,
        source: capture_core::models::ConflictSource::Pull,
    };

    let lines = format_sync_conflict_lines(&[conflict]);
    assert_eq!(
        lines,
        vec![
            "1970-01-01 00:00:00 UTC  pull   record=01890a5d-ac96  winner=2-aa losing=2-bb"
                .to_string()
        ]
    );
}

#[test]
fn report_lines_list_conflicts_and_gaps() {
    let record_id: RecordId = "01890a5d-ac96-774b-bcce-b302099a8057".parse().unwrap();
    let report = SyncReport {
        pulled: 2,
        pushed: 1,
        conflicted: vec![ConflictedRecord {
            table: TableName::rows(),
            record_id,
            winner: "2-aa".parse().unwrap(),
            conflicts: vec!["2-bb".parse().unwrap()],
        }],
        gaps: vec![SyncGap {
            table: TableName::files(),
            record_id,
            missing: "1-cc".parse().unwrap(),
        }],
        ..SyncReport::default()
    };

    let lines = format_report_lines(&report);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Sync completed: pulled 2, pushed 1"));
    assert!(lines[1].contains("rows/01890a5d-ac96"));
    assert!(lines[1].contains("losing=2-bb"));
    assert!(lines[2].contains("missing=1-cc"));
}

#[test]
fn profile_updates_keep_omitted_values() {
    let existing = CliProfile {
        remote_url: Some("https://sync.example.com".to_string()),
        actor: Some("alice".to_string()),
        tables: vec!["rows".to_string()],
        interval_secs: Some(30),
    };

    let updated =
        apply_profile_updates(&existing, None, Some("bob".to_string()), &[], None).unwrap();
    assert_eq!(updated.remote_url, existing.remote_url);
    assert_eq!(updated.actor.as_deref(), Some("bob"));
    assert_eq!(updated.tables, existing.tables);
    assert_eq!(updated.interval_secs, Some(30));
}

#[test]
fn profile_updates_validate_inputs() {
    let existing = CliProfile::default();
    assert!(apply_profile_updates(
        &existing,
        Some("sync.example.com".to_string()),
        None,
        &[],
        None
    )
    .is_err());
    assert!(apply_profile_updates(&existing, None, None, &["Bad Name".to_string()], None).is_err());
    assert!(apply_profile_updates(&existing, None, None, &[], Some(0)).is_err());
}

#[test]
fn cli_parses_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "capture",
        "create",
        "--table",
        "files",
        "--set",
        "filename=a.jpg",
        "--actor",
        "alice",
    ])
    .unwrap();

    assert_eq!(cli.actor.as_deref(), Some("alice"));
    let Commands::Create {
        table, assignments, ..
    } = cli.command
    else {
        panic!("expected create");
    };
    assert_eq!(table, "files");
    assert_eq!(assignments, vec!["filename=a.jpg".to_string()]);
}

#[test]
fn cli_parses_sync_and_config_commands() {
    let cli = Cli::try_parse_from(["capture", "sync", "--watch"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Sync {
            watch: true,
            json: false
        }
    ));

    let cli = Cli::try_parse_from([
        "capture",
        "--profile",
        "field",
        "config",
        "init",
        "--remote-url",
        "https://sync.example.com",
        "--table",
        "rows",
    ])
    .unwrap();
    assert_eq!(cli.profile.as_deref(), Some("field"));
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommands::Init { .. }
        }
    ));
}

#[test]
fn completions_are_generated_for_every_shell() {
    for shell in [
        CompletionShell::Bash,
        CompletionShell::Zsh,
        CompletionShell::Fish,
        CompletionShell::PowerShell,
    ] {
        let script = String::from_utf8(render_completions(shell)).unwrap();
        assert!(script.contains("capture"), "{shell:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_record_accepts_unique_prefix() {
    let engine = SyncEngine::open_in_memory().await.unwrap();
    let ctx = MutationContext::new("alice").unwrap();
    let record = engine
        .create(&ctx, &TableName::rows(), Payload::new().with("label", "oak"))
        .await
        .unwrap();

    let full = resolve_record(&engine, &record.id.to_string()).await.unwrap();
    assert_eq!(full.id, record.id);

    let prefix = record.id.to_string().chars().take(20).collect::<String>();
    let by_prefix = resolve_record(&engine, &prefix).await.unwrap();
    assert_eq!(by_prefix.id, record.id);

    assert!(matches!(
        resolve_record(&engine, "ffffffff").await,
        Err(CliError::RecordNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn leaf_items_mark_the_winner() {
    let engine = SyncEngine::open_in_memory().await.unwrap();
    let ctx = MutationContext::new("alice").unwrap();
    let record = engine
        .create(&ctx, &TableName::rows(), Payload::new().with("label", "oak"))
        .await
        .unwrap();
    engine.delete(&ctx, &record.id).await.unwrap();

    let tree = engine.tree(&record.id).await.unwrap().unwrap();
    let leaves = leaf_items(&tree);
    assert_eq!(leaves.len(), 1);
    assert!(leaves[0].winner);
    assert!(leaves[0].deleted);
    assert!(!leaves[0].superseded);
    assert_eq!(leaves[0].client_rev_by, "alice");
    assert_eq!(leaves[0].server_rev_at, None);
}
