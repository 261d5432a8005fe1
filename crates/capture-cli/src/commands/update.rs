use crate::commands::common::{resolve_payload, resolve_record, GlobalArgs};
use crate::error::CliError;

pub async fn run_update(
    id: &str,
    payload: Option<&str>,
    assignments: &[String],
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let ctx = global.mutation_context()?;
    let engine = global.open_engine().await?;
    let record = resolve_record(&engine, id).await?;

    let payload = resolve_payload(payload, assignments, Some(&record.payload))?;
    let updated = engine.update(&ctx, &record.id, payload).await?;
    println!("{} {}", updated.id, updated.rev);
    Ok(())
}
