//! Runtime configuration, read from the environment (and `.env`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_MAX_ROUNDS: u32 = 50;

/// Settings for the HTTP decision oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-call deadline, in seconds.
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

impl OracleConfig {
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// adb serial (`host:port` for network devices). `None` uses the only attached device.
    pub serial: Option<String>,
    pub screenshot_dir: String,
    pub xml_dir: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            screenshot_dir: "/sdcard/screenshots".to_string(),
            xml_dir: "/sdcard/xmls".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub oracle: OracleConfig,
    pub device: DeviceConfig,
    /// Root for task workspaces and the documentation store.
    pub work_dir: PathBuf,
    /// Optional YAML map of app name to package.
    pub app_mapping_file: Option<PathBuf>,
    /// Center distance (px) under which two nodes count as one widget.
    pub min_dist: f64,
    pub dark_mode: bool,
    /// Pause after a CONTINUE completion verdict, in seconds.
    pub request_interval_secs: u64,
    pub max_rounds: u32,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            oracle: OracleConfig::default(),
            device: DeviceConfig::default(),
            work_dir: PathBuf::from("./apps/robot"),
            app_mapping_file: None,
            min_dist: 30.0,
            dark_mode: false,
            request_interval_secs: 3,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl ExplorerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `.env` if present, then overlay environment variables on the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_BASE") {
            config.oracle.api_base = v;
        }
        config.oracle.api_key = get("OPENAI_API_KEY");
        if let Some(v) = get("MODEL") {
            config.oracle.model = v;
        }
        if let Some(v) = parsed(&get, "MAX_TOKENS")? {
            config.oracle.max_tokens = v;
        }
        if let Some(v) = parsed(&get, "TEMPERATURE")? {
            config.oracle.temperature = v;
        }
        if let Some(v) = parsed(&get, "ORACLE_TIMEOUT_SECS")? {
            config.oracle.timeout_secs = v;
        }

        config.device.serial = get("DEVICE_SERIAL").or_else(|| get("DEVICE_IP"));
        if let Some(v) = get("ANDROID_SCREENSHOT_DIR") {
            config.device.screenshot_dir = v;
        }
        if let Some(v) = get("ANDROID_XML_DIR") {
            config.device.xml_dir = v;
        }

        if let Some(v) = get("WORK_DIR") {
            config.work_dir = expand_home(&v);
        }
        config.app_mapping_file = get("APP_MAPPING_FILE").map(|v| expand_home(&v));
        if let Some(v) = parsed(&get, "MIN_DIST")? {
            config.min_dist = v;
        }
        if let Some(v) = get("DARK_MODE") {
            config.dark_mode = parse_bool("DARK_MODE", &v)?;
        }
        if let Some(v) = parsed(&get, "REQUEST_INTERVAL")? {
            config.request_interval_secs = v;
        }
        if let Some(v) = parsed(&get, "MAX_ROUNDS")? {
            config.max_rounds = v;
        }

        Ok(config)
    }

    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn min_dist(mut self, px: f64) -> Self {
        self.min_dist = px;
        self
    }

    pub fn request_interval(mut self, secs: u64) -> Self {
        self.request_interval_secs = secs;
        self
    }

    pub fn oracle_timeout(mut self, secs: u64) -> Self {
        self.oracle.timeout_secs = secs;
        self
    }

    /// App name to package overrides; empty when no mapping file is configured.
    pub fn load_app_mapping(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        match &self.app_mapping_file {
            Some(path) => read_app_mapping(path),
            None => Ok(BTreeMap::new()),
        }
    }
}

fn read_app_mapping(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::MappingRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mapping: Option<BTreeMap<String, String>> =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::MappingParse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(mapping.unwrap_or_default())
}

fn parsed<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                key,
                value: v.clone(),
            })
        })
        .transpose()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}
