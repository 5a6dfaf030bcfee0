//! Application configuration
//!
//! ```toml
//! log_level = "info"
//! collection = "jeux_de_donnees"
//!
//! [report]
//! strategy = "pipeline"
//! output = "json"
//!
//! [generator]
//! datasets = 200
//! min_files = 1
//! max_files = 4
//! seed = 42
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::DEFAULT_COLLECTION;
use crate::error::{DataStatError, Result};
use crate::generator::GeneratorConfig;
use crate::report::ReportStrategy;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DATASTAT_CONFIG";

/// Config file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "datastat.toml";

/// How reports are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<OutputFormat> {
        match s.to_lowercase().as_str() {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub strategy: ReportStrategy,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub collection: String,
    pub report: ReportConfig,
    pub generator: GeneratorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: "warn".to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            report: ReportConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataStatError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load from `explicit`, else `$DATASTAT_CONFIG`, else `./datastat.toml`,
    /// else defaults. Returns the file actually used.
    ///
    /// An explicit or environment-provided path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Self::resolve(explicit, env_path.as_deref())
    }

    fn resolve(
        explicit: Option<&Path>,
        env_path: Option<&Path>,
    ) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit.or(env_path) {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Ok((Self::from_file(local)?, Some(local.to_path_buf())));
        }

        debug!("no configuration file, using defaults");
        Ok((AppConfig::default(), None))
    }
}
