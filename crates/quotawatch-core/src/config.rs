use crate::fetch::FetchOptions;
use crate::models::Thresholds;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub refresh_seconds: u64,
    pub cache_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub executable_path: Option<PathBuf>,
    pub executable_name: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub stale_after_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub source: SourceConfig,
    pub alerts: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                refresh_seconds: 300,
                cache_file: home_dir().join(".local/state/quotawatch/cache.json"),
            },
            source: SourceConfig {
                executable_path: None,
                executable_name: "codexbar".to_string(),
                args: vec!["usage".to_string(), "--format".to_string(), "json".to_string()],
                timeout_seconds: 10,
            },
            alerts: AlertConfig {
                warning_percent: 20.0,
                critical_percent: 5.0,
                stale_after_seconds: 600,
            },
        }
    }
}

/// A single setting that differs between two configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    ExecutablePath,
    ExecutableName,
    Arguments,
    Timeout,
    RefreshInterval,
    WarningThreshold,
    CriticalThreshold,
    StaleAfter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Cancel the periodic timer and start a new one now.
    RescheduleTimer,
    /// Recompute state and stats from the cached snapshot without fetching.
    ReevaluateView,
    /// Picked up by the next scheduled or manual fetch.
    NextFetch,
}

impl SettingChange {
    pub fn reaction(self) -> Reaction {
        match self {
            SettingChange::RefreshInterval => Reaction::RescheduleTimer,
            SettingChange::WarningThreshold
            | SettingChange::CriticalThreshold
            | SettingChange::StaleAfter => Reaction::ReevaluateView,
            SettingChange::ExecutablePath
            | SettingChange::ExecutableName
            | SettingChange::Arguments
            | SettingChange::Timeout => Reaction::NextFetch,
        }
    }
}

impl Config {
    pub fn from_default_path() -> Result<Self> {
        let path = default_config_path();
        if !path.exists() {
            let cfg = Self::default();
            cfg.write_default(&path)?;
            return Ok(cfg);
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading config at {}", path.display()))?;
        let cfg = toml::from_str::<Config>(&raw)
            .with_context(|| format!("failed parsing TOML config at {}", path.display()))?;
        Ok(cfg)
    }

    pub fn write_default(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            warning: self.alerts.warning_percent,
            critical: self.alerts.critical_percent,
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.alerts.stale_after_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.general.refresh_seconds.max(1))
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            executable_path: self.source.executable_path.clone(),
            executable_name: self.source.executable_name.clone(),
            args: self.source.args.clone(),
            timeout: Duration::from_secs(self.source.timeout_seconds),
        }
    }

    pub fn changes(&self, new: &Config) -> Vec<SettingChange> {
        let checks = [
            (
                self.source.executable_path != new.source.executable_path,
                SettingChange::ExecutablePath,
            ),
            (
                self.source.executable_name != new.source.executable_name,
                SettingChange::ExecutableName,
            ),
            (self.source.args != new.source.args, SettingChange::Arguments),
            (
                self.source.timeout_seconds != new.source.timeout_seconds,
                SettingChange::Timeout,
            ),
            (
                self.general.refresh_seconds != new.general.refresh_seconds,
                SettingChange::RefreshInterval,
            ),
            (
                self.alerts.warning_percent != new.alerts.warning_percent,
                SettingChange::WarningThreshold,
            ),
            (
                self.alerts.critical_percent != new.alerts.critical_percent,
                SettingChange::CriticalThreshold,
            ),
            (
                self.alerts.stale_after_seconds != new.alerts.stale_after_seconds,
                SettingChange::StaleAfter,
            ),
        ];
        checks
            .into_iter()
            .filter_map(|(changed, change)| changed.then_some(change))
            .collect()
    }

    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "general.refresh_seconds" => {
                self.general.refresh_seconds = value
                    .parse::<u64>()
                    .context("general.refresh_seconds must be an integer")?;
            }
            "general.cache_file" => {
                self.general.cache_file = PathBuf::from(value);
            }
            "source.executable_path" => {
                self.source.executable_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "source.executable_name" => {
                self.source.executable_name = value.to_string();
            }
            "source.args" => {
                self.source.args = value.split_whitespace().map(str::to_string).collect();
            }
            "source.timeout_seconds" => {
                self.source.timeout_seconds = value
                    .parse::<u64>()
                    .context("source.timeout_seconds must be an integer")?;
            }
            "alerts.warning_percent" => {
                self.alerts.warning_percent = value
                    .parse::<f64>()
                    .context("alerts.warning_percent must be a number")?;
            }
            "alerts.critical_percent" => {
                self.alerts.critical_percent = value
                    .parse::<f64>()
                    .context("alerts.critical_percent must be a number")?;
            }
            "alerts.stale_after_seconds" => {
                self.alerts.stale_after_seconds = value
                    .parse::<u64>()
                    .context("alerts.stale_after_seconds must be an integer")?;
            }
            _ => bail!("unsupported key: {key}"),
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    home_dir().join(".config/quotawatch/config.toml")
}

pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
