//! Capture CLI - edit project records offline and sync them
//!
//! Every command works against the local replica; only `sync` talks to the
//! remote authority.

mod cli;
mod commands;
mod config_profiles;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::filter::{Directive, LevelFilter};

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_db_path, GlobalArgs};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflict_history, run_conflicts};
use crate::commands::create::run_create;
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::purge::run_purge;
use crate::commands::resolve::run_resolve;
use crate::commands::show::run_show;
use crate::commands::sync::run_sync;
use crate::commands::update::run_update;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn default_log_directive() -> Directive {
    "capture=info"
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into())
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_log_directive()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = GlobalArgs {
        db_path: resolve_db_path(cli.db_path),
        profile: cli.profile,
        actor: cli.actor,
    };

    match cli.command {
        Commands::Create {
            table,
            payload,
            assignments,
            json,
        } => run_create(&table, payload.as_deref(), &assignments, json, &global).await?,
        Commands::Update {
            id,
            payload,
            assignments,
        } => run_update(&id, payload.as_deref(), &assignments, &global).await?,
        Commands::Delete { id } => run_delete(&id, &global).await?,
        Commands::Show { id, json } => run_show(&id, json, &global).await?,
        Commands::List {
            table,
            limit,
            include_deleted,
            json,
        } => run_list(table.as_deref(), limit, include_deleted, json, &global).await?,
        Commands::Conflicts {
            table,
            history,
            limit,
            json,
        } => {
            if history {
                run_conflict_history(limit, json, &global).await?;
            } else {
                run_conflicts(table.as_deref(), limit, json, &global).await?;
            }
        }
        Commands::Resolve { id, rev, payload } => {
            run_resolve(&id, &rev, payload.as_deref(), &global).await?;
        }
        Commands::Sync { watch, json } => run_sync(watch, json, &global).await?,
        Commands::Purge {
            table,
            dry_run,
            json,
        } => run_purge(table.as_deref(), dry_run, json, &global).await?,
        Commands::Config { command } => run_config(command, &global)?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}
