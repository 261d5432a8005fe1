use crate::commands::common::{resolve_record, GlobalArgs};
use crate::error::CliError;

pub async fn run_delete(id: &str, global: &GlobalArgs) -> Result<(), CliError> {
    let ctx = global.mutation_context()?;
    let engine = global.open_engine().await?;
    let record = resolve_record(&engine, id).await?;

    let tombstone = engine.delete(&ctx, &record.id).await?;
    println!("{} {}", record.id, tombstone.rev);
    Ok(())
}
