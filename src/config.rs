//! Configuration for formflow paths and the account field values.
//!
//! Path configuration sources (highest priority first):
//! 1. Environment variables (FORMFLOW_HOME, FORMFLOW_FLOWS)
//! 2. Config file (.formflow/config.yaml)
//! 3. Defaults (~/.formflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .formflow/config.yaml
//! - Paths in config file are relative to the config file's directory

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub driver: Option<DriverConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Flow definitions directory (relative to config file)
    pub flows: Option<String>,
}

/// External driver command used by the subprocess form adapter
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to formflow home (engine state)
    pub home: PathBuf,
    /// Absolute path to the flow definitions directory
    pub flows: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Driver command, if configured
    pub driver: Option<DriverConfig>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".formflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".formflow");

    let config_file = find_config_file();

    let (home, flows, driver) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Paths are relative to the .formflow/ directory
        let base_dir = config_path.parent().unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("FORMFLOW_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(base_dir, home_path)
        } else {
            default_home.clone()
        };

        let flows = if let Ok(env_flows) = std::env::var("FORMFLOW_FLOWS") {
            PathBuf::from(env_flows)
        } else if let Some(ref flows_path) = config.paths.flows {
            resolve_path(base_dir, flows_path)
        } else {
            home.join("flows")
        };

        (home, flows, config.driver)
    } else {
        let home = std::env::var("FORMFLOW_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let flows = std::env::var("FORMFLOW_FLOWS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("flows"));

        (home, flows, None)
    };

    Ok(ResolvedConfig {
        home,
        flows,
        config_file,
        driver,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the formflow home directory (engine state).
pub fn formflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($FORMFLOW_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

/// Get the flow definitions directory
pub fn flows_dir() -> Result<PathBuf> {
    Ok(config()?.flows.clone())
}

// ============================================================================
// Account configuration (field values fed to the form adapter)
// ============================================================================

/// Fields a registration config must supply
pub const REQUIRED_FIELDS: [&str; 10] = [
    "email",
    "password",
    "account_name",
    "full_name",
    "phone_number",
    "address",
    "city",
    "state",
    "postal_code",
    "country",
];

/// Validated account/registration field values, loaded from JSON
#[derive(Debug, Clone)]
pub struct AccountConfig {
    fields: BTreeMap<String, String>,
}

impl AccountConfig {
    /// Load field values from a JSON file and validate required fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Configuration file not found: {}", path.display()))?;

        let fields: BTreeMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in configuration file: {}", path.display()))?;

        let config = Self { fields };
        config.validate()?;
        Ok(config)
    }

    /// Build directly from a field map (callers validate separately)
    pub fn from_fields(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Check that every required field is present and non-empty.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| self.fields.get(*f).map(|v| v.is_empty()).unwrap_or(true))
            .collect();

        if !missing.is_empty() {
            anyhow::bail!("Missing required fields in configuration: {:?}", missing);
        }

        Ok(())
    }

    /// Look up a field value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}
