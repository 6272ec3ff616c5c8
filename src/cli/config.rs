//! CLI Configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::output::OutputFormat;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// CLI Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory holding the persisted pool
    pub data_dir: PathBuf,
    /// Output format
    pub format: OutputFormat,
    /// Colored text output
    pub color: bool,
    /// Largest conservation gap `audit` accepts, in base units
    pub audit_tolerance: u128,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            format: OutputFormat::Text,
            color: true,
            audit_tolerance: 1_000_000,
        }
    }
}

impl CliConfig {
    /// Configuration using `data_dir`
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Load from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("ZUSD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(format) = std::env::var("ZUSD_OUTPUT") {
            config.format = format.parse().unwrap_or_default();
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.color = false;
        }

        config
    }

    /// Path of the CLI settings file inside the data directory
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("cli.json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("data directory cannot be empty".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration error
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// IO error
    Io(String),
    /// Parse error
    Parse(String),
    /// Serialization error
    Serialize(String),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Get default data directory
fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/zusd");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("zusd");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".zusd");
    }

    PathBuf::from(".zusd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CliConfig::default();
        assert_eq!(config.format, OutputFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = CliConfig::new(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = CliConfig::new(temp_dir.path().to_path_buf());
        config.format = OutputFormat::Json;

        let path = config.settings_path();
        config.save(&path).unwrap();
        assert_eq!(CliConfig::load(&path).unwrap(), config);
    }
}
