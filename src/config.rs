//! Configuration management for isinfinder
//!
//! Configuration is loaded from `./config/isinfinder.toml`. The template in
//! `config/isinfinder.toml` is embedded in the binary and is the single source
//! of default values.

use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::batch::BatchSettings;
use crate::browser::{LaunchSettings, NavigationSettings, WaitPolicy};
use crate::locator::{LocatorSettings, QUERY_PLACEHOLDER};

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/isinfinder.toml";

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = include_str!("../config/isinfinder.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid search URL template '{template}': {reason}")]
    InvalidSearchTemplate { template: String, reason: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub search: SearchConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    #[serde(default)]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default)]
    pub window_width: Option<u32>,
    #[serde(default)]
    pub window_height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub search_url_template: String,
    #[serde(default = "default_stock_path_marker")]
    pub stock_path_marker: String,
}

fn default_stock_path_marker() -> String {
    "/stock/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub request_delay_ms: u64,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: usize,
    #[serde(default = "default_isolate_sessions")]
    pub isolate_sessions: bool,
}

fn default_flush_interval() -> usize {
    10
}

fn default_isolate_sessions() -> bool {
    true
}

/// Output file names, relative to the output directory
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub results_json: String,
    pub matches_csv: String,
}

impl AppConfig {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded default configuration
    pub fn embedded_default() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let template = &self.search.search_url_template;
        if !template.contains(QUERY_PLACEHOLDER) {
            return Err(ConfigError::InvalidSearchTemplate {
                template: template.clone(),
                reason: format!("missing {} placeholder", QUERY_PLACEHOLDER),
            });
        }
        if !(template.starts_with("https://") || template.starts_with("http://")) {
            return Err(ConfigError::InvalidSearchTemplate {
                template: template.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }

        if self.search.stock_path_marker.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "search.stock_path_marker".to_string(),
            });
        }

        if self.browser.navigation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "browser.navigation_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.browser.window_width.is_some() != self.browser.window_height.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "browser.window_width/window_height".to_string(),
                reason: "set both or neither".to_string(),
            });
        }

        if self.output.results_json.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "output.results_json".to_string(),
            });
        }
        if self.output.matches_csv.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "output.matches_csv".to_string(),
            });
        }

        Ok(())
    }

    pub fn navigation_settings(&self) -> NavigationSettings {
        let wait = match self.browser.settle_delay_ms {
            0 => WaitPolicy::Load,
            ms => WaitPolicy::LoadThenSettle(Duration::from_millis(ms)),
        };
        NavigationSettings {
            wait,
            timeout: Duration::from_secs(self.browser.navigation_timeout_secs),
        }
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        let window_size = match (self.browser.window_width, self.browser.window_height) {
            (Some(width), Some(height)) => Some((width, height)),
            _ => None,
        };
        LaunchSettings {
            headless: self.browser.headless,
            chrome_path: self.browser.chrome_path.clone(),
            window_size,
            command_timeout: Duration::from_secs(self.browser.navigation_timeout_secs),
        }
    }

    pub fn locator_settings(&self) -> LocatorSettings {
        LocatorSettings {
            search_url_template: self.search.search_url_template.clone(),
            stock_path_marker: self.search.stock_path_marker.clone(),
            navigation: self.navigation_settings(),
        }
    }

    pub fn batch_settings(&self, limit: Option<usize>) -> BatchSettings {
        BatchSettings {
            request_delay: Duration::from_millis(self.batch.request_delay_ms),
            isolate_sessions: self.batch.isolate_sessions,
            flush_interval: self.batch.flush_interval,
            limit,
        }
    }

    /// Write the bundled default configuration to `path`, creating parent directories
    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        atty::is(atty::Stream::Stdin)
    }

    /// Prompt user to create the default config at `path` (only in interactive mode)
    pub fn prompt_create_config(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found at {}. Create default config? [Y/n] ", path.display());
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            Ok(Some(Self::create_default_config_at(path)?))
        } else {
            Ok(None)
        }
    }
}
