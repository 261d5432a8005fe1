use crate::commands::common::{parse_optional_table, short_id, GlobalArgs};
use crate::error::CliError;

pub async fn run_purge(
    table: Option<&str>,
    dry_run: bool,
    as_json: bool,
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let table = parse_optional_table(table)?;
    let engine = global.open_engine().await?;
    let plans = engine.purge(table.as_ref(), dry_run).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    let total = plans.iter().map(|plan| plan.revisions.len()).sum::<usize>();
    for plan in &plans {
        println!(
            "{}/{}  {} revision(s)",
            plan.table,
            short_id(&plan.record_id),
            plan.revisions.len()
        );
    }
    if dry_run {
        println!("{total} revision(s) eligible for purge");
    } else {
        println!("Purged {total} revision(s)");
    }
    Ok(())
}
