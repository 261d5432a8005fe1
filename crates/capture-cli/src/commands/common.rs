use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use capture_core::models::{Payload, RecordId, SyncConflict, SyncableRecord, TableName};
use capture_core::{MutationContext, SyncEngine};
use chrono::Utc;
use serde::Serialize;

use crate::config_profiles::{CliProfilesConfig, ResolvedSettings};
use crate::error::CliError;

/// Global flags shared by every command
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub db_path: PathBuf,
    pub profile: Option<String>,
    pub actor: Option<String>,
}

impl GlobalArgs {
    pub fn settings(&self) -> Result<ResolvedSettings, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        config
            .resolve(self.profile.as_deref(), self.actor.as_deref())
            .map_err(CliError::Config)
    }

    pub fn mutation_context(&self) -> Result<MutationContext, CliError> {
        let settings = self.settings()?;
        Ok(MutationContext::new(settings.actor)?)
    }

    pub async fn open_engine(&self) -> Result<SyncEngine, CliError> {
        Ok(SyncEngine::open_path(self.db_path.clone()).await?)
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub table: String,
    pub rev: String,
    pub preview: String,
    pub payload: Payload,
    pub deleted: bool,
    pub client_rev_at: i64,
    pub client_rev_by: String,
    pub relative_time: String,
    pub synced: bool,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub table: String,
    pub record_id: String,
    pub winner_rev: String,
    pub losing_rev: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub source: String,
}

pub fn parse_table(name: &str) -> Result<TableName, CliError> {
    TableName::new(name.trim()).map_err(|error| CliError::InvalidTable(error.to_string()))
}

pub fn parse_optional_table(name: Option<&str>) -> Result<Option<TableName>, CliError> {
    name.map(parse_table).transpose()
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a record by full id or unique id prefix.
pub async fn resolve_record(engine: &SyncEngine, query: &str) -> Result<SyncableRecord, CliError> {
    let query = normalize_record_identifier(query)?;
    if let Ok(record_id) = query.parse::<RecordId>() {
        if let Some(record) = engine.get(&record_id).await? {
            return Ok(record);
        }
    }

    let needle = query.to_ascii_lowercase();
    let matching_ids = engine
        .record_ids(None)
        .await?
        .into_iter()
        .filter(|id| id.to_string().starts_with(&needle))
        .take(3)
        .collect::<Vec<_>>();

    match matching_ids.as_slice() {
        [] => Err(CliError::RecordNotFound(query)),
        [record_id] => engine
            .get(record_id)
            .await?
            .ok_or(CliError::RecordNotFound(query)),
        _ => {
            let options = matching_ids
                .iter()
                .map(short_id)
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(13).collect()
}

/// Build a payload from an explicit JSON argument and `field=value` assignments.
///
/// With neither, the payload is read from piped stdin or an editor seeded
/// with `base`.
pub fn resolve_payload(
    raw: Option<&str>,
    assignments: &[String],
    base: Option<&Payload>,
) -> Result<Payload, CliError> {
    let explicit = raw.and_then(|raw| normalize_content(raw));
    if explicit.is_none() && assignments.is_empty() {
        if let Some(content) = read_piped_stdin()? {
            return parse_payload(&content);
        }
        let initial = match base {
            Some(payload) => serde_json::to_string_pretty(payload)?,
            None => "{}".to_string(),
        };
        return match capture_editor_input_with_initial(&initial)? {
            Some(content) => parse_payload(&content),
            None => Err(CliError::EmptyPayload),
        };
    }

    let mut payload = match explicit {
        Some(raw) => parse_payload(&raw)?,
        None => base.cloned().unwrap_or_default(),
    };
    payload
        .apply_assignments(assignments.iter().map(String::as_str))
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    Ok(payload)
}

pub fn parse_payload(raw: &str) -> Result<Payload, CliError> {
    Payload::from_json_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn format_record_lines(records: &[SyncableRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short = short_id(&record.id);
            let preview = payload_preview(&record.payload, 40);
            let relative_time = format_relative_time(record.client_rev_at, now_ms);
            let mut flags = Vec::new();
            if record.deleted {
                flags.push("deleted".to_string());
            }
            if !record.is_synced() {
                flags.push("unsynced".to_string());
            }
            if record.has_conflicts() {
                flags.push(format!("{} conflict(s)", record.conflicts.len()));
            }

            let line = format!(
                "{short:<13}  {:<8}  {preview:<40}  {relative_time:<10}",
                record.table
            );
            if flags.is_empty() {
                line.trim_end().to_string()
            } else {
                format!("{line}  [{}]", flags.join(", "))
            }
        })
        .collect()
}

pub fn record_to_list_item(record: &SyncableRecord) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        table: record.table.to_string(),
        rev: record.rev.to_string(),
        preview: payload_preview(&record.payload, 80),
        payload: record.payload.clone(),
        deleted: record.deleted,
        client_rev_at: record.client_rev_at,
        client_rev_by: record.client_rev_by.clone(),
        relative_time: format_relative_time(record.client_rev_at, now_ms),
        synced: record.is_synced(),
        conflicts: record.conflicts.iter().map(ToString::to_string).collect(),
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        table: conflict.table.to_string(),
        record_id: conflict.record_id.to_string(),
        winner_rev: conflict.winner_rev.to_string(),
        losing_rev: conflict.losing_rev.to_string(),
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        source: conflict.source.to_string(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<5}  record={}  winner={} losing={}",
                format_sync_timestamp(conflict.detected_at),
                conflict.source,
                short_id(&conflict.record_id),
                conflict.winner_rev,
                conflict.losing_rev
            )
        })
        .collect()
}

/// First fields of a payload rendered as `key=value`, truncated to `max_chars`.
pub fn payload_preview(payload: &Payload, max_chars: usize) -> String {
    let collapsed = payload
        .iter()
        .map(|(field, value)| match value {
            serde_json::Value::String(text) => format!("{field}={text}"),
            other => format!("{field}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_payload_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_payload_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("capture-payload-{}-{now}.json", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CAPTURE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("capture")
        .join("capture.db")
}
