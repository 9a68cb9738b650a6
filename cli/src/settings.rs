/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use mtkflash::Timeouts;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "MTKFLASH";

/// Settings read from `<config dir>/mtkflash/config.toml`, then from
/// `MTKFLASH_*` variables. Command line flags win over both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: Option<String>,
    pub baudrate: u32,
    pub da: Option<PathBuf>,
    pub payload: Option<PathBuf>,
    pub payload_addr: u32,
    pub timeouts: TimeoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: None,
            baudrate: 115_200,
            da: None,
            payload: None,
            payload_addr: 0x0010_0A00,
            timeouts: TimeoutSettings::default(),
        }
    }
}

/// Milliseconds, mirrors [`Timeouts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub read_ms: u64,
    pub probe_ms: u64,
    pub stage_confirm_ms: u64,
    pub optional_reply_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let t = Timeouts::default();
        TimeoutSettings {
            read_ms: t.read.as_millis() as u64,
            probe_ms: t.probe.as_millis() as u64,
            stage_confirm_ms: t.stage_confirm.as_millis() as u64,
            optional_reply_ms: t.optional_reply.as_millis() as u64,
        }
    }
}

impl From<&TimeoutSettings> for Timeouts {
    fn from(t: &TimeoutSettings) -> Self {
        Timeouts {
            read: Duration::from_millis(t.read_ms),
            probe: Duration::from_millis(t.probe_ms),
            stage_confirm: Duration::from_millis(t.stage_confirm_ms),
            optional_reply: Duration::from_millis(t.optional_reply_ms),
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mtkflash").join(CONFIG_FILE))
    }

    /// Loads `path`, or the default location when `None`. A missing file
    /// is not an error, an explicitly given one must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                if let Some(path) = Self::default_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()
            .context("Failed to load settings")?;

        config.try_deserialize().context("Invalid settings")
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from(&self.timeouts)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!("mtkflash-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, "port = \"/dev/ttyACM0\"\n\n[timeouts]\nprobe_ms = 250\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(settings.baudrate, 115_200);
        assert_eq!(settings.timeouts().probe, Duration::from_millis(250));
        assert_eq!(settings.timeouts().read, Timeouts::default().read);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn explicit_file_must_exist() {
        let path = std::env::temp_dir().join("mtkflash-settings-missing").join(CONFIG_FILE);
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn toml_round_trips() {
        let settings = Settings { port: Some("COM3".into()), ..Settings::default() };
        let text = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
