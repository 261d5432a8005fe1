use crate::commands::common::{
    format_record_lines, parse_optional_table, record_to_list_item, GlobalArgs, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(
    table: Option<&str>,
    limit: usize,
    include_deleted: bool,
    as_json: bool,
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let table = parse_optional_table(table)?;
    let engine = global.open_engine().await?;
    let records = engine.list(table.as_ref(), include_deleted, limit).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
