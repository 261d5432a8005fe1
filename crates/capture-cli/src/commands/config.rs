use capture_core::config::SyncConfig;
use serde::Serialize;

use crate::cli::ConfigCommands;
use crate::commands::common::{parse_table, GlobalArgs};
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct SettingsView<'a> {
    profile: &'a str,
    actor: &'a str,
    db_path: String,
    access_token: Option<&'static str>,
    #[serde(flatten)]
    sync: &'a SyncConfig,
}

pub fn run_config(command: ConfigCommands, global: &GlobalArgs) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            remote_url,
            tables,
            interval_secs,
            no_activate,
        } => run_config_init(global, remote_url, &tables, interval_secs, no_activate),
        ConfigCommands::Show => run_config_show(global),
    }
}

/// Merge explicit values into a stored profile; omitted values are kept.
pub fn apply_profile_updates(
    existing: &CliProfile,
    remote_url: Option<String>,
    actor: Option<String>,
    tables: &[String],
    interval_secs: Option<u64>,
) -> Result<CliProfile, CliError> {
    for table in tables {
        parse_table(table)?;
    }
    if interval_secs == Some(0) {
        return Err(CliError::Config(
            "interval must be greater than zero".to_string(),
        ));
    }

    let profile = CliProfile {
        remote_url: normalize_text_option(remote_url).or_else(|| existing.remote_url.clone()),
        actor: normalize_text_option(actor).or_else(|| existing.actor.clone()),
        tables: if tables.is_empty() {
            existing.tables.clone()
        } else {
            tables.to_vec()
        },
        interval_secs: interval_secs.or(existing.interval_secs),
    };

    if let Some(url) = &profile.remote_url {
        SyncConfig::new(url.clone())
            .validated()
            .map_err(CliError::Config)?;
    }
    Ok(profile)
}

fn run_config_init(
    global: &GlobalArgs,
    remote_url: Option<String>,
    tables: &[String],
    interval_secs: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(global.profile.as_deref());
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let updated = apply_profile_updates(
        &existing,
        remote_url,
        global.actor.clone(),
        tables,
        interval_secs,
    )?;
    *config.profile_mut_or_default(&profile_name) = updated;
    if !no_activate || config.active_profile.is_none() {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Saved profile '{profile_name}' to {}", path.display());
    Ok(())
}

fn run_config_show(global: &GlobalArgs) -> Result<(), CliError> {
    let settings = global.settings()?;
    let view = SettingsView {
        profile: &settings.profile,
        actor: &settings.actor,
        db_path: global.db_path.display().to_string(),
        access_token: settings.access_token.as_ref().map(|_| "[REDACTED]"),
        sync: &settings.sync,
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
