use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};

/// Environment variable that overrides `backend.base_url`.
pub const BACKEND_URL_ENV: &str = "PROMPT_CONVERTER_BACKEND_URL";

/// Main configuration structure for prompt_converter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Conversion backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Terminal UI
    #[serde(default)]
    pub ui: UIConfig,

    /// Conversion history listing
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; `/api/...` paths are appended to it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Transport timeout. Unset means the HTTP client default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIConfig {
    /// Enable colorful output
    #[serde(default = "default_colorful")]
    pub colorful: bool,

    /// Model selected before the catalog arrives
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Directory downloads are written to
    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    /// How long the "copied" indicator stays on
    #[serde(default = "default_copied_reset_ms")]
    pub copied_reset_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Entries fetched by `:history` without an explicit count
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
}

// Default value functions
fn default_base_url() -> String { "http://localhost:8001".to_string() }
fn default_colorful() -> bool { true }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_download_dir() -> String { ".".to_string() }
fn default_copied_reset_ms() -> u64 { 2000 }
fn default_history_limit() -> usize { 10 }

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: default_base_url(),
            timeout_secs: None,
        }
    }
}

impl Default for UIConfig {
    fn default() -> Self {
        UIConfig {
            colorful: default_colorful(),
            default_model: default_model(),
            download_dir: default_download_dir(),
            copied_reset_ms: default_copied_reset_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            default_limit: default_history_limit(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig::default(),
            ui: UIConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    /// Load configuration from command line argument or default locations
    pub fn load(config_path: &Option<String>) -> Result<Self> {
        if let Some(path) = config_path {
            let expanded_path = shellexpand::tilde(path);
            return Self::from_file(expanded_path.as_ref());
        }

        // Try loading from default locations
        let default_paths = vec![
            "prompt_converter.toml",
            ".prompt_converter.toml",
            "~/.config/prompt_converter/config.toml",
        ];

        for path in default_paths {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                match Self::from_file(expanded_path.as_ref()) {
                    Ok(config) => return Ok(config),
                    Err(e) => log::warn!("Failed to load config from {}: {:#}", path, e),
                }
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Apply the environment override for the backend URL. Call after
    /// `dotenv` so a `.env` file is honored.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            self.apply_backend_url(Some(url));
        }
    }

    /// Merge with command-line arguments (CLI args take precedence)
    pub fn merge_with_args(&mut self, headless: bool, backend_url: Option<String>, model: Option<String>) {
        if headless {
            self.ui.colorful = false;
        }
        self.apply_backend_url(backend_url);
        if let Some(model) = model {
            self.ui.default_model = model;
        }
    }

    fn apply_backend_url(&mut self, url: Option<String>) {
        if let Some(url) = url {
            let trimmed = url.trim().trim_end_matches('/');
            if !trimmed.is_empty() {
                self.backend.base_url = trimmed.to_string();
            }
        }
    }

    /// Base URL with any trailing slash removed
    pub fn backend_url(&self) -> &str {
        self.backend.base_url.trim_end_matches('/')
    }
}
