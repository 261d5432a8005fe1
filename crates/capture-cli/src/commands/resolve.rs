use capture_core::models::RevisionId;

use crate::commands::common::{parse_payload, resolve_record, GlobalArgs};
use crate::error::CliError;

pub async fn run_resolve(
    id: &str,
    rev: &str,
    payload: Option<&str>,
    global: &GlobalArgs,
) -> Result<(), CliError> {
    let chosen = rev
        .trim()
        .parse::<RevisionId>()
        .map_err(|error| CliError::InvalidRevision(error.to_string()))?;
    let payload = payload.map(parse_payload).transpose()?;

    let ctx = global.mutation_context()?;
    let engine = global.open_engine().await?;
    let record = resolve_record(&engine, id).await?;

    let resolved = engine.resolve(&ctx, &record.id, &chosen, payload).await?;
    println!("{} {}", resolved.id, resolved.rev);
    Ok(())
}
