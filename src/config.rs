use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::TimeDelta;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::{
    domain::Host,
    gerrit::Credentials,
    notify::NotificationSettings,
    storage::{StorageError, storage_dir},
};

const CONFIG_FILE: &str = "config.toml";

/// Resolved user configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Review hosts to monitor, in display order.
    #[serde(default = "default_instances")]
    pub instances: Vec<Instance>,

    #[serde(default = "enabled")]
    pub show_notifications: bool,

    #[serde(default = "enabled")]
    pub notify_for_errors: bool,

    /// Only surface incoming CLs where the user is in the attention set.
    #[serde(default)]
    pub only_attention_set: bool,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u64,

    #[serde(default = "default_cache_freshness")]
    pub cache_freshness_minutes: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub enabled: bool,
    /// HTTP credentials generated in the host's settings page.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instances: default_instances(),
            show_notifications: true,
            notify_for_errors: true,
            only_attention_set: false,
            refresh_interval_minutes: default_refresh_interval(),
            cache_freshness_minutes: default_cache_freshness(),
        }
    }
}

fn default_instances() -> Vec<Instance> {
    [
        ("Chromium", "https://chromium-review.googlesource.com"),
        ("Fuchsia", "https://fuchsia-review.googlesource.com"),
    ]
    .into_iter()
    .map(|(name, host)| Instance {
        name: name.to_owned(),
        host: host.to_owned(),
        enabled: false,
        username: None,
        password: None,
    })
    .collect()
}

fn enabled() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    5
}

fn default_cache_freshness() -> u64 {
    1
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(storage_dir()?.join(CONFIG_FILE))
    }

    /// Loads the configuration; a missing file yields the defaults.
    ///
    /// Hosts are normalized to their origin and a host listed more than once
    /// keeps only its first entry.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<Config>(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(err) => return Err(err.into()),
        };
        for instance in &mut config.instances {
            instance.host = normalize_origin(&instance.host)?;
        }

        let mut seen = HashSet::new();
        config.instances.retain(|instance| {
            let first = seen.insert(instance.host.clone());
            if !first {
                warn!(host = %instance.host, name = %instance.name, "ignoring duplicate host entry");
            }
            first
        });

        if interval_from_minutes(config.refresh_interval_minutes).is_none() {
            return Err(ConfigError::OutOfRange {
                field: "refresh_interval_minutes",
                value: config.refresh_interval_minutes,
            });
        }
        if freshness_from_minutes(config.cache_freshness_minutes).is_none() {
            return Err(ConfigError::OutOfRange {
                field: "cache_freshness_minutes",
                value: config.cache_freshness_minutes,
            });
        }
        Ok(config)
    }

    pub fn enabled_hosts(&self) -> Vec<Host> {
        self.instances
            .iter()
            .filter(|instance| instance.enabled)
            .map(|instance| Host {
                name: instance.name.clone(),
                url: instance.host.clone(),
            })
            .collect()
    }

    pub fn credentials(&self) -> HashMap<String, Credentials> {
        self.instances
            .iter()
            .filter_map(|instance| {
                let username = instance.username.clone()?;
                let password = instance.password.clone()?;
                Some((instance.host.clone(), Credentials { username, password }))
            })
            .collect()
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            enabled: self.show_notifications,
            errors: self.notify_for_errors,
        }
    }

    /// Never shorter than one minute.
    pub fn refresh_interval(&self) -> Duration {
        interval_from_minutes(self.refresh_interval_minutes).unwrap_or(Duration::MAX)
    }

    pub fn cache_freshness(&self) -> TimeDelta {
        freshness_from_minutes(self.cache_freshness_minutes).unwrap_or(TimeDelta::MAX)
    }
}

fn interval_from_minutes(minutes: u64) -> Option<Duration> {
    minutes.max(1).checked_mul(60).map(Duration::from_secs)
}

fn freshness_from_minutes(minutes: u64) -> Option<TimeDelta> {
    i64::try_from(minutes).ok().and_then(TimeDelta::try_minutes)
}

/// Accepts `http(s)://authority[/path...]` and drops any trailing slash.
fn normalize_origin(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|_| ConfigError::InvalidHost(raw.to_owned()))?;
    let valid = matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some_and(|host| !host.is_empty())
        && url.query().is_none()
        && url.fragment().is_none();
    if !valid {
        return Err(ConfigError::InvalidHost(raw.to_owned()));
    }
    Ok(trimmed.to_owned())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading configuration: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid host {0:?}; expected an http(s) origin such as https://example-review.googlesource.com")]
    InvalidHost(String),
    #[error("{field} = {value} is out of range")]
    OutOfRange { field: &'static str, value: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}
