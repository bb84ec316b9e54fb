use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{error::Result, scheduler::DEFAULT_LOOKAHEAD_MINUTES, AlarmError};

const APPLICATION: &str = "custom_alarm";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// where alarm records live, defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
    /// how far ahead the scheduler arms a timer
    pub lookahead_minutes: u32,
    /// how often the scheduler wakes up on its own
    pub tick_seconds: u64,
    pub time_format: String,
    /// time of day for new alarms added without `--time`
    #[serde(with = "toml_datetime_compat")]
    pub default_time: NaiveTime,
    pub default_max_delay_minutes: u32,
    /// sound file to ring with, relative paths are looked up in the sounds directory
    pub sound: Option<PathBuf>,
    /// 0 to 100
    pub volume: f32,
    pub ring_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            lookahead_minutes: DEFAULT_LOOKAHEAD_MINUTES,
            tick_seconds: 60,
            time_format: "%Y-%m-%d %H:%M".to_string(),
            default_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            default_max_delay_minutes: crate::daily::DEFAULT_MAX_DELAY_MINUTES,
            sound: None,
            volume: 100.0,
            ring_seconds: 30,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// if the file can't be read or isn't a valid config
    pub fn load(path: &Path) -> Result<Self> {
        let config = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&config)?)
    }

    /// the config at `path`, or the defaults if there is no file yet
    ///
    /// # Errors
    /// if the file exists but can't be loaded
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// # Errors
    /// if the config can't be serialized or written
    pub fn save(&self, path: &Path) -> Result<()> {
        let config = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, config)?;
        Ok(())
    }

    fn project_dirs() -> Result<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", APPLICATION)
            .ok_or_else(|| AlarmError::Config("couldn't find a home directory".to_string()))
    }

    /// # Errors
    /// if there is no home directory to put it in
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// # Errors
    /// if there is no home directory to put it in
    pub fn sounds_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().join("sounds"))
    }

    /// # Errors
    /// if there is no home directory to put it in
    pub fn default_data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().join("alarms"))
    }

    /// the configured alarm directory or the platform default
    ///
    /// # Errors
    /// see [`default_data_dir`](Self::default_data_dir)
    pub fn data_dir(&self) -> Result<PathBuf> {
        self.data_dir
            .clone()
            .map_or_else(Self::default_data_dir, Ok)
    }

    /// # Errors
    /// if a relative sound path is configured and there is no home directory
    pub fn sound_path(&self) -> Result<Option<PathBuf>> {
        match &self.sound {
            Some(sound) if sound.is_relative() => Ok(Some(Self::sounds_path()?.join(sound))),
            sound => Ok(sound.clone()),
        }
    }

    /// writes a default config to `path` unless one is there already
    ///
    /// returns whether the file was written
    ///
    /// # Errors
    /// if the config can't be written
    pub fn init(path: &Path, force: bool) -> Result<bool> {
        if !force && path.exists() {
            return Ok(false);
        }
        Self::new().save(path)?;
        Ok(true)
    }
}
