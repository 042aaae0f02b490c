//! Configuration loading and root folder resolution
//!
//! Priority order, highest first:
//! 1. Command-line argument / environment variable (handled by the binary)
//! 2. TOML config file
//! 3. Compiled defaults

use crate::{Error, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the SQLite database inside the root folder
pub const DATABASE_FILE_NAME: &str = "taskpulse.db";

/// Service configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Folder holding the database
    pub root_folder: PathBuf,
    /// HTTP listen address
    pub bind_addr: String,
    /// Reference timezone for calendar days, minutes east of UTC
    pub utc_offset_minutes: i32,
    /// Attendance tracker period (default: daily)
    pub attendance_interval_secs: u64,
    /// Overdue scanner period (default: hourly)
    pub overdue_interval_secs: u64,
    /// Sign-up code granting the admin role; None disables admin sign-up
    pub admin_join_code: Option<String>,
    pub request_timeout_ms: u64,
    /// Buffered push messages per user channel
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_folder: get_default_root_folder(),
            bind_addr: "127.0.0.1:5790".to_string(),
            utc_offset_minutes: 0,
            attendance_interval_secs: 24 * 60 * 60,
            overdue_interval_secs: 60 * 60,
            admin_join_code: None,
            request_timeout_ms: 30_000,
            event_channel_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path`, or from the platform config file
    ///
    /// A missing file is not an error: defaults are used and a warning logged.
    /// A file that exists but does not parse is a configuration error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_file(),
        };

        match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config = Self::from_toml_str(&content)?;
                info!("Loaded configuration from {}", p.display());
                Ok(config)
            }
            Some(p) => {
                warn!("Config file {} not found; using defaults", p.display());
                Ok(Self::default())
            }
            None => {
                warn!("No config file location available; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        if self.attendance_interval_secs == 0 || self.overdue_interval_secs == 0 {
            return Err(Error::Config("job intervals must be positive".to_string()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config("event_channel_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Reference timezone used for every calendar-day decision
    pub fn timezone(&self) -> Result<FixedOffset> {
        crate::time::offset_from_minutes(self.utc_offset_minutes).ok_or_else(|| {
            Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Platform config file (`~/.config/taskpulse/config.toml`, then `/etc`)
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("taskpulse").join("config.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/taskpulse/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    user_config
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("taskpulse"))
        .unwrap_or_else(|| PathBuf::from("./taskpulse_data"))
}
