use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use serde::{Deserialize, Serialize};

use crate::engines::EngineKind;
use crate::ranked_list::DEFAULT_CAPACITY;

const DEFAULT_USER_AGENT: &str = concat!("lyric-manager/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where saved lyric files go
    lyrics_directory: String,
    /// Cache database file, defaults to the platform data directory
    #[serde(default)]
    database: Option<String>,
    /// Engines queried by default, in order
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineKind>,
    #[serde(default = "default_candidate_capacity")]
    pub candidate_capacity: usize,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub locale: Option<String>,
    /// Charset assumed for sources that do not declare one
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub lrclib: LrclibConfig,
    #[serde(default)]
    pub netease: NeteaseConfig,
    #[serde(default)]
    local: Option<LocalConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrclibConfig {
    pub base_url: String,
    /// Requests allowed per second
    pub requests_per_second: u32,
}

impl Default for LrclibConfig {
    fn default() -> Self {
        Self {
            base_url: "https://lrclib.net".to_string(),
            requests_per_second: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeteaseConfig {
    pub base_url: String,
    pub requests_per_second: u32,
    pub search_limit: u32,
}

impl Default for NeteaseConfig {
    fn default() -> Self {
        Self {
            base_url: "https://music.163.com".to_string(),
            requests_per_second: 2,
            search_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub directory: String,
}

fn default_engines() -> Vec<EngineKind> {
    vec![EngineKind::Lrclib, EngineKind::Netease, EngineKind::Local]
}

fn default_candidate_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lyrics_directory: "~/.lyrics".to_string(),
            database: None,
            engines: default_engines(),
            candidate_capacity: default_candidate_capacity(),
            http_timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            locale: None,
            charset: None,
            lrclib: LrclibConfig::default(),
            netease: NeteaseConfig::default(),
            local: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("lyric-manager").join("config.toml"))
    }

    /// Load config from the default location, falling back to defaults when
    /// no file exists yet
    pub fn load() -> Result<Self> {
        let config_path =
            Self::config_path().ok_or(color_eyre::eyre::eyre!("No config directory found"))?;
        if !config_path.exists() {
            log::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::from_file(&config_path)
    }

    /// Create a default config file, if it doesn't exist
    pub fn create_default() -> Result<PathBuf> {
        let config_path =
            Self::config_path().ok_or(color_eyre::eyre::eyre!("No config directory found"))?;
        if config_path.exists() {
            log::info!("Config file already exists at {}", config_path.display());
            return Ok(config_path);
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create config directory: {}",
                parent.display()
            ))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context(format!(
            "Failed to write config file: {}",
            config_path.display()
        ))?;
        Ok(config_path)
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Get expanded lyrics directory path
    pub fn lyrics_directory_path(&self) -> PathBuf {
        self.expand_path(&self.lyrics_directory)
    }

    /// Get the cache database path
    pub fn database_path(&self) -> PathBuf {
        match self.database {
            Some(ref database) => self.expand_path(database),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lyric-manager")
                .join("lyrics.db"),
        }
    }

    /// Directory scanned by the local engine, defaults to the lyrics directory
    pub fn local_directory_path(&self) -> PathBuf {
        match self.local {
            Some(ref local) => self.expand_path(&local.directory),
            None => self.lyrics_directory_path(),
        }
    }
}
