use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::RegionCatalog;

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Region codes editors may attach to articles.
    #[serde(default = "default_region_codes")]
    pub region_codes: Vec<String>,

    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    // Tables serialize after plain values
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Operator-controlled switch and poll interval for scheduled publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
}

impl SchedulerSettings {
    pub fn new(enabled: bool, interval_minutes: u32) -> Result<Self> {
        let settings = Self {
            enabled,
            interval_minutes,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_minutes < MIN_INTERVAL_MINUTES {
            return Err(AppError::Config(format!(
                "interval_minutes must be at least {}, got {}",
                MIN_INTERVAL_MINUTES, self.interval_minutes
            )));
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(AppError::Config(format!(
                "interval_minutes must be at most {}, got {}",
                MAX_INTERVAL_MINUTES, self.interval_minutes
            )));
        }
        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_minutes: default_interval(),
        }
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsdesk");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("newsdesk.db").to_string_lossy().to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u32 {
    5
}

// Indian states and union territories
fn default_region_codes() -> Vec<String> {
    [
        "ap", "ar", "as", "br", "cg", "ga", "gj", "hr", "hp", "jh", "ka", "kl", "mp", "mh", "mn",
        "ml", "mz", "nl", "od", "pb", "rj", "sk", "tn", "ts", "tr", "up", "uk", "wb", "an", "ch",
        "dn", "dl", "jk", "la", "ld", "py",
    ]
    .iter()
    .map(|code| code.to_string())
    .collect()
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scheduler: SchedulerSettings::default(),
            region_codes: default_region_codes(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        if self.max_page_size == 0 {
            return Err(AppError::Config("max_page_size must be positive".into()));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(AppError::Config(format!(
                "default_page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        self.region_catalog()?;
        Ok(())
    }

    pub fn region_catalog(&self) -> Result<RegionCatalog> {
        RegionCatalog::new(&self.region_codes)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsdesk")
            .join("config.toml")
    }
}
