//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use capture_core::config::SyncConfig;
use capture_core::models::TableName;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";
const DEFAULT_ACTOR: &str = "capture-cli";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// Everything a command needs once profile, env and flags are merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub profile: String,
    pub actor: String,
    pub sync: SyncConfig,
    pub access_token: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("capture")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    capture_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn env_text(name: &str) -> Option<String> {
    normalize_text_option(std::env::var(name).ok())
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(env_text("CAPTURE_PROFILE").as_deref()) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    /// Merge a profile with `CAPTURE_*` env overrides and an explicit actor.
    pub fn resolve(
        &self,
        explicit_profile: Option<&str>,
        explicit_actor: Option<&str>,
    ) -> Result<ResolvedSettings, String> {
        let profile_name = self.resolve_profile_name(explicit_profile);
        let profile = self.profile(&profile_name).cloned().unwrap_or_default();
        profile.resolve(
            profile_name,
            explicit_actor.map(str::to_string),
            EnvOverrides::from_env(),
        )
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

/// `CAPTURE_*` environment overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub remote_url: Option<String>,
    pub access_token: Option<String>,
    pub actor: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            remote_url: env_text("CAPTURE_REMOTE_URL"),
            access_token: env_text("CAPTURE_ACCESS_TOKEN"),
            actor: env_text("CAPTURE_ACTOR"),
        }
    }
}

impl CliProfile {
    pub fn resolve(
        &self,
        profile: String,
        explicit_actor: Option<String>,
        env: EnvOverrides,
    ) -> Result<ResolvedSettings, String> {
        let actor = normalize_text_option(explicit_actor)
            .or(env.actor)
            .or_else(|| self.actor.clone())
            .unwrap_or_else(|| DEFAULT_ACTOR.to_string());

        let mut sync = SyncConfig {
            remote_url: env.remote_url.or_else(|| self.remote_url.clone()),
            ..SyncConfig::default()
        };
        if !self.tables.is_empty() {
            sync.tables = self
                .tables
                .iter()
                .map(|table| TableName::new(table.as_str()).map_err(|error| error.to_string()))
                .collect::<Result<_, _>>()?;
        }
        if let Some(interval_secs) = self.interval_secs {
            sync.interval_secs = interval_secs;
        }

        Ok(ResolvedSettings {
            profile,
            actor,
            sync: sync.validated()?,
            access_token: env.access_token,
        })
    }

    fn normalize(&mut self) {
        self.remote_url = normalize_text_option(self.remote_url.clone());
        self.actor = normalize_text_option(self.actor.clone());
        self.tables = self
            .tables
            .iter()
            .filter_map(|table| normalize_text_option(Some(table.clone())))
            .collect();
    }
}
