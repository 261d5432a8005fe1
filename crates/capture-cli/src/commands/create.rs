use crate::commands::common::{parse_table, record_to_list_item, resolve_payload, GlobalArgs};
use crate::error::CliError;

pub async fn run_create(
    table: &str,
    payload: Option<&str>,
    assignments: &[String],
    as_json: bool,
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let table = parse_table(table)?;
    let payload = resolve_payload(payload, assignments, None)?;
    let ctx = global.mutation_context()?;
    let engine = global.open_engine().await?;

    let record = engine.create(&ctx, &table, payload).await?;
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&record_to_list_item(&record))?
        );
    } else {
        println!("{}", record.id);
    }
    Ok(())
}
