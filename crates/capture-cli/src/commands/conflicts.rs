use crate::commands::common::{
    format_record_lines, format_sync_conflict_lines, parse_optional_table, record_to_list_item,
    sync_conflict_to_item, GlobalArgs, RecordListItem, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_conflicts(
    table: Option<&str>,
    limit: usize,
    as_json: bool,
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let table = parse_optional_table(table)?;
    let engine = global.open_engine().await?;
    let records = engine.list_conflicted(table.as_ref()).await?;

    if as_json {
        let json_items = records
            .iter()
            .take(limit)
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No conflicted records.");
        return Ok(());
    }

    let shown = &records[..records.len().min(limit)];
    for (line, record) in format_record_lines(shown).into_iter().zip(shown) {
        println!("{line}");
        for losing in &record.conflicts {
            println!("    losing {losing}");
        }
    }
    Ok(())
}

pub async fn run_conflict_history(
    limit: usize,
    as_json: bool,
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let engine = global.open_engine().await?;
    let conflicts = engine.conflict_history(None, limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
