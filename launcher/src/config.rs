// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::services::poller::Schedule;
use crate::app::usecases::PipelinePolicy;

const APP_DIR_NAME: &str = "datastream-launcher";
const CONFIG_FILE_NAME: &str = "launcher.toml";
const CONFIG_ENV_VAR: &str = "LAUNCHER_CONFIG_PATH";
const OBJECTS_DIR_NAME: &str = "objects";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_INSTANCE_POLL_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;
const DEFAULT_ROLE_CHECK_MAX_ATTEMPTS: u32 = 120;
const DEFAULT_ACK_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_START_RETRY_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_SEND_RETRY_MAX_ATTEMPTS: u32 = 30;
const FIXED_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    region: Option<String>,
    object_store_root: Option<String>,
    instance_poll_max_attempts: Option<u32>,
    max_backoff_secs: Option<u64>,
    role_check_max_attempts: Option<u32>,
    ack_max_attempts: Option<u32>,
    start_retry_max_attempts: Option<u32>,
    send_retry_max_attempts: Option<u32>,
    local_attached_role: Option<String>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub region: String,
    pub object_store_root: PathBuf,
    pub instance_poll_max_attempts: u32,
    pub max_backoff_secs: u64,
    pub role_check_max_attempts: u32,
    pub ack_max_attempts: u32,
    pub start_retry_max_attempts: u32,
    pub send_retry_max_attempts: u32,
    pub local_attached_role: Option<String>,
    pub verbose: bool,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    pub fn policy(&self) -> PipelinePolicy {
        PipelinePolicy {
            instance_poll: Schedule::exponential(
                self.instance_poll_max_attempts,
                Duration::from_secs(self.max_backoff_secs),
            ),
            start_retry: Schedule::fixed(FIXED_RETRY_DELAY, self.start_retry_max_attempts),
            role_check: Schedule::fixed(FIXED_RETRY_DELAY, self.role_check_max_attempts),
            send_retry: Schedule::fixed(FIXED_RETRY_DELAY, self.send_retry_max_attempts),
            ack_poll: Schedule::fixed(FIXED_RETRY_DELAY, self.ack_max_attempts),
            ..PipelinePolicy::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T: fmt::Debug> ConfigValue<T> {
    fn describe(&self) -> String {
        format!("{:?} (source={})", self.value, self.source.as_str())
    }
}

fn pick<T>(override_value: Option<T>, file_value: Option<T>, default: T) -> ConfigValue<T> {
    match (override_value, file_value) {
        (Some(value), _) => ConfigValue {
            value,
            source: ConfigSource::Override,
        },
        (None, Some(value)) => ConfigValue {
            value,
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default,
            source: ConfigSource::Default,
        },
    }
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub region: ConfigValue<String>,
    pub object_store_root: ConfigValue<PathBuf>,
    pub instance_poll_max_attempts: ConfigValue<u32>,
    pub max_backoff_secs: ConfigValue<u64>,
    pub role_check_max_attempts: ConfigValue<u32>,
    pub ack_max_attempts: ConfigValue<u32>,
    pub start_retry_max_attempts: ConfigValue<u32>,
    pub send_retry_max_attempts: ConfigValue<u32>,
    pub verbose: ConfigValue<bool>,
}

impl ConfigReport {
    /// `(key, "value (source=...)")` pairs, in file order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("region", self.region.describe()),
            ("object_store_root", self.object_store_root.describe()),
            (
                "instance_poll_max_attempts",
                self.instance_poll_max_attempts.describe(),
            ),
            ("max_backoff_secs", self.max_backoff_secs.describe()),
            (
                "role_check_max_attempts",
                self.role_check_max_attempts.describe(),
            ),
            ("ack_max_attempts", self.ack_max_attempts.describe()),
            (
                "start_retry_max_attempts",
                self.start_retry_max_attempts.describe(),
            ),
            (
                "send_retry_max_attempts",
                self.send_retry_max_attempts.describe(),
            ),
            ("verbose", self.verbose.describe()),
        ]
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub region: Option<String>,
    pub object_store_root: Option<PathBuf>,
    pub verbose: Option<bool>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let config_dir = config_path.as_deref().and_then(|path| path.parent());

    let region = pick(
        overrides.region,
        file_config.region,
        DEFAULT_REGION.to_string(),
    );
    if region.value.trim().is_empty() {
        anyhow::bail!("region must not be empty");
    }

    let object_store_root = match (overrides.object_store_root, file_config.object_store_root) {
        (Some(path), _) => ConfigValue {
            value: expand_path(path),
            source: ConfigSource::Override,
        },
        (None, Some(raw)) => ConfigValue {
            value: resolve_path(&raw, config_dir),
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default_object_store_root().with_context(|| {
                "failed to resolve default object store root; specify --object-store-root or set object_store_root in the config file"
            })?,
            source: ConfigSource::Default,
        },
    };

    let instance_poll_max_attempts = pick(
        None,
        file_config.instance_poll_max_attempts,
        DEFAULT_INSTANCE_POLL_MAX_ATTEMPTS,
    );
    let max_backoff_secs = pick(None, file_config.max_backoff_secs, DEFAULT_MAX_BACKOFF_SECS);
    let role_check_max_attempts = pick(
        None,
        file_config.role_check_max_attempts,
        DEFAULT_ROLE_CHECK_MAX_ATTEMPTS,
    );
    let ack_max_attempts = pick(None, file_config.ack_max_attempts, DEFAULT_ACK_MAX_ATTEMPTS);
    let start_retry_max_attempts = pick(
        None,
        file_config.start_retry_max_attempts,
        DEFAULT_START_RETRY_MAX_ATTEMPTS,
    );
    let send_retry_max_attempts = pick(
        None,
        file_config.send_retry_max_attempts,
        DEFAULT_SEND_RETRY_MAX_ATTEMPTS,
    );
    for (name, value) in [
        ("instance_poll_max_attempts", instance_poll_max_attempts.value),
        ("role_check_max_attempts", role_check_max_attempts.value),
        ("ack_max_attempts", ack_max_attempts.value),
        ("start_retry_max_attempts", start_retry_max_attempts.value),
        ("send_retry_max_attempts", send_retry_max_attempts.value),
    ] {
        if value == 0 {
            anyhow::bail!("{name} must be at least 1");
        }
    }
    if max_backoff_secs.value == 0 {
        anyhow::bail!("max_backoff_secs must be at least 1");
    }

    let verbose = pick(overrides.verbose, file_config.verbose, false);
    let local_attached_role = file_config
        .local_attached_role
        .filter(|role| !role.trim().is_empty());

    let config = Config {
        region: region.value.clone(),
        object_store_root: object_store_root.value.clone(),
        instance_poll_max_attempts: instance_poll_max_attempts.value,
        max_backoff_secs: max_backoff_secs.value,
        role_check_max_attempts: role_check_max_attempts.value,
        ack_max_attempts: ack_max_attempts.value,
        start_retry_max_attempts: start_retry_max_attempts.value,
        send_retry_max_attempts: send_retry_max_attempts.value,
        local_attached_role,
        verbose: verbose.value,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        region,
        object_store_root,
        instance_poll_max_attempts,
        max_backoff_secs,
        role_check_max_attempts,
        ack_max_attempts,
        start_retry_max_attempts,
        send_retry_max_attempts,
        verbose,
    };

    Ok(LoadResult { config, report })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_object_store_root() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME).join(OBJECTS_DIR_NAME))
}
