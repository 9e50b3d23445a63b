use std::fmt;
use std::fs;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::audit::redact_value;
use crate::error::AppError;

/// How a registry endpoint is reached, classified by scheme prefix.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEndpoint {
    /// `local:<runtime>` — podman or docker, queried via subprocess
    Local(String),
    /// `mock:<name>` — fixture data, only used by tests
    Mock(String),
    /// Remote HTTP(S) registry, the primary target
    Remote(String),
}

impl RegistryEndpoint {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::InvalidEndpoint(raw.to_string()));
        }

        if let Some(runtime) = strip_scheme(raw, "local") {
            return match runtime {
                "podman" | "docker" => Ok(RegistryEndpoint::Local(runtime.to_string())),
                _ => Err(AppError::InvalidEndpoint(raw.to_string())),
            };
        }
        if let Some(name) = strip_scheme(raw, "mock") {
            if name.is_empty() {
                return Err(AppError::InvalidEndpoint(raw.to_string()));
            }
            return Ok(RegistryEndpoint::Mock(name.to_string()));
        }

        let url = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if raw.contains("://") {
            return Err(AppError::InvalidEndpoint(raw.to_string()));
        } else {
            // Bare hostname: assume HTTPS (quay.io, ghcr.io, ...)
            format!("https://{}", raw)
        };
        Ok(RegistryEndpoint::Remote(url.trim_end_matches('/').to_string()))
    }

    /// Short display name for table rows
    pub fn name(&self) -> String {
        match self {
            RegistryEndpoint::Local(runtime) => format!("Local {}", runtime),
            RegistryEndpoint::Mock(name) => format!("Mock {}", name),
            RegistryEndpoint::Remote(url) => url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string(),
        }
    }

    /// Sort key for the status view: local runtimes first (podman before
    /// docker), then local-network/plain-http endpoints, then HTTPS.
    pub fn sort_key(&self) -> (u8, u8, String) {
        match self {
            RegistryEndpoint::Local(runtime) => {
                let rank = match runtime.as_str() {
                    "podman" => 0,
                    "docker" => 1,
                    _ => 2,
                };
                (1, rank, runtime.clone())
            }
            RegistryEndpoint::Mock(name) => (2, 0, name.clone()),
            RegistryEndpoint::Remote(url) => {
                let lower = url.to_lowercase();
                let host = lower
                    .trim_start_matches("https://")
                    .trim_start_matches("http://");
                let local_net = host.starts_with("localhost")
                    || host.starts_with("127.0.0.1")
                    || host.starts_with("192.168.")
                    || host.starts_with("10.")
                    || host.starts_with("172.")
                    || lower.starts_with("http://");
                (if local_net { 2 } else { 3 }, 0, lower)
            }
        }
    }
}

impl fmt::Display for RegistryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryEndpoint::Local(runtime) => write!(f, "local:{}", runtime),
            RegistryEndpoint::Mock(name) => write!(f, "mock:{}", name),
            RegistryEndpoint::Remote(url) => write!(f, "{}", url),
        }
    }
}

fn strip_scheme<'a>(raw: &'a str, scheme: &str) -> Option<&'a str> {
    raw.strip_prefix(&format!("{}://", scheme))
        .or_else(|| raw.strip_prefix(&format!("{}:", scheme)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Bearer,
    Token,
}

pub const DEFAULT_AUTH_SCOPE: &str = "registry:catalog:*";
pub const DEFAULT_MAX_REPOS: usize = 100;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 900;

/// Per-registry configuration, held in memory for a session. Credentials
/// are never written to disk.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default = "default_auth_scope")]
    pub auth_scope: String,
    #[serde(default = "default_max_repos")]
    pub max_repos: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub monitored_repos: Vec<String>,
}

fn default_auth_scope() -> String {
    DEFAULT_AUTH_SCOPE.to_string()
}

fn default_max_repos() -> usize {
    DEFAULT_MAX_REPOS
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            username: String::new(),
            password: String::new(),
            auth_mode: AuthMode::None,
            auth_scope: default_auth_scope(),
            max_repos: default_max_repos(),
            cache_ttl: default_cache_ttl(),
            monitored_repos: Vec::new(),
        }
    }
}

impl AuthConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Drop duplicate monitored names while preserving the user-specified
    /// order (that order is the display priority).
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.monitored_repos.retain(|name| seen.insert(name.clone()));
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &redact_value("password", &self.password))
            .field("auth_mode", &self.auth_mode)
            .field("auth_scope", &self.auth_scope)
            .field("max_repos", &self.max_repos)
            .field("cache_ttl", &self.cache_ttl)
            .field("monitored_repos", &self.monitored_repos)
            .finish()
    }
}

/// On-disk configuration: monitored repositories and per-registry settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub registries: Vec<StoredRegistry>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for StoredConfig {
    fn default() -> Self {
        StoredConfig {
            version: default_version(),
            registries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRegistry {
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub monitored_repos: Vec<String>,
    #[serde(default)]
    pub settings: StoredSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default = "default_max_repos")]
    pub max_repos: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default = "default_auth_scope")]
    pub auth_scope: String,
}

impl Default for StoredSettings {
    fn default() -> Self {
        StoredSettings {
            max_repos: default_max_repos(),
            cache_ttl: default_cache_ttl(),
            auth_scope: default_auth_scope(),
        }
    }
}

/// Flat JSON config file with a backup copy written before each save.
pub struct ConfigStore {
    config_file: PathBuf,
    backup_file: PathBuf,
}

impl ConfigStore {
    pub fn open_default() -> Result<Self, AppError> {
        let base = dirs::config_dir()
            .ok_or_else(|| AppError::Config("could not determine config directory".to_string()))?;
        Ok(Self::at(base.join("regshelf")))
    }

    pub fn at(dir: PathBuf) -> Self {
        ConfigStore {
            config_file: dir.join("config.json"),
            backup_file: dir.join("config.backup.json"),
        }
    }

    /// Load the stored configuration. A missing or corrupt file yields
    /// defaults rather than an error.
    pub fn load(&self) -> StoredConfig {
        match fs::read_to_string(&self.config_file) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => StoredConfig::default(),
        }
    }

    /// Save, backing up the previous file first.
    pub fn save(&self, config: &StoredConfig) -> Result<(), AppError> {
        if let Some(dir) = self.config_file.parent() {
            fs::create_dir_all(dir)?;
        }
        if self.config_file.exists() {
            // A failed backup is not fatal; the save still proceeds
            let _ = fs::copy(&self.config_file, &self.backup_file);
        }
        let raw = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, raw)?;
        Ok(())
    }

    /// Replace or insert the entry for one registry.
    pub fn upsert_registry(&self, entry: StoredRegistry) -> Result<(), AppError> {
        let mut config = self.load();
        match config.registries.iter_mut().find(|r| r.url == entry.url) {
            Some(existing) => *existing = entry,
            None => config.registries.push(entry),
        }
        self.save(&config)
    }

    /// Session config for one registry: stored settings plus monitored
    /// repos, with no credentials (those come from the CLI only).
    pub fn auth_config_for(&self, url: &str) -> AuthConfig {
        let stored = self.load();
        let mut config = AuthConfig::default();
        if let Some(entry) = stored.registries.iter().find(|r| r.url == url) {
            config.auth_scope = entry.settings.auth_scope.clone();
            config.max_repos = entry.settings.max_repos;
            config.cache_ttl = entry.settings.cache_ttl;
            config.monitored_repos = entry.monitored_repos.clone();
            config.normalize();
        }
        config
    }
}
