//! Configuration loading for KOMpass storage.
//!
//! Layered config: defaults -> config file -> environment variables.
//! Environment keys are unprefixed (`MAX_FILE_SIZE_MB`, `OBJECT_STORE_BUCKET`, ...)
//! and map onto the lowercase field names below. Settings are read once at
//! process start; nothing re-reads the environment afterwards.
//!
//! Credentials are never part of `Settings`. Each remote backend names the
//! environment variable that holds its token (`*_TOKEN_ENV`), and the token is
//! resolved when the backend is constructed.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{gb_to_bytes, mb_to_bytes, BackendKind, QuotaLimits};
use crate::error::KompassError;

/// Main storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the local record tree
    #[serde(default = "default_data_directory")]
    pub data_directory: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Comma-separated backend preference, most preferred first
    #[serde(default = "default_backend_priority")]
    pub storage_backend_priority: String,

    #[serde(default = "default_true")]
    pub local_storage_enabled: bool,

    #[serde(default)]
    pub object_store_enabled: bool,

    #[serde(default)]
    pub object_store_bucket: Option<String>,

    #[serde(default = "default_object_store_endpoint")]
    pub object_store_endpoint: String,

    /// Name of the env var holding the object store bearer token
    #[serde(default = "default_object_store_token_env")]
    pub object_store_token_env: String,

    #[serde(default)]
    pub document_store_enabled: bool,

    #[serde(default)]
    pub document_store_project_id: Option<String>,

    #[serde(default = "default_document_store_endpoint")]
    pub document_store_endpoint: String,

    /// Name of the env var holding the document store bearer token
    #[serde(default = "default_document_store_token_env")]
    pub document_store_token_env: String,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: f64,

    #[serde(default = "default_max_user_storage_mb")]
    pub max_user_storage_mb: f64,

    #[serde(default = "default_max_total_storage_gb")]
    pub max_total_storage_gb: f64,

    #[serde(default = "default_cleanup_threshold_percent")]
    pub cleanup_threshold_percent: f64,

    #[serde(default = "default_true")]
    pub auto_cleanup_enabled: bool,

    #[serde(default = "default_min_files_to_keep")]
    pub min_files_to_keep: usize,

    /// Retries after the first attempt, for transient backend failures only
    #[serde(default = "default_retry_attempts")]
    pub backend_retry_attempts: u32,

    #[serde(default = "default_retry_initial_ms")]
    pub backend_retry_initial_ms: u64,

    /// Per-call timeout for remote backends
    #[serde(default = "default_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_data_directory() -> String {
    "saved_routes".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend_priority() -> String {
    "document,object,local".to_string()
}

fn default_true() -> bool {
    true
}

fn default_object_store_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_object_store_token_env() -> String {
    "OBJECT_STORE_TOKEN".to_string()
}

fn default_document_store_endpoint() -> String {
    "https://firestore.googleapis.com".to_string()
}

fn default_document_store_token_env() -> String {
    "DOCUMENT_STORE_TOKEN".to_string()
}

fn default_max_file_size_mb() -> f64 {
    50.0
}

fn default_max_user_storage_mb() -> f64 {
    100.0
}

fn default_max_total_storage_gb() -> f64 {
    4.5
}

fn default_cleanup_threshold_percent() -> f64 {
    70.0
}

fn default_min_files_to_keep() -> usize {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_ms() -> u64 {
    200
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            log_level: default_log_level(),
            storage_backend_priority: default_backend_priority(),
            local_storage_enabled: true,
            object_store_enabled: false,
            object_store_bucket: None,
            object_store_endpoint: default_object_store_endpoint(),
            object_store_token_env: default_object_store_token_env(),
            document_store_enabled: false,
            document_store_project_id: None,
            document_store_endpoint: default_document_store_endpoint(),
            document_store_token_env: default_document_store_token_env(),
            max_file_size_mb: default_max_file_size_mb(),
            max_user_storage_mb: default_max_user_storage_mb(),
            max_total_storage_gb: default_max_total_storage_gb(),
            cleanup_threshold_percent: default_cleanup_threshold_percent(),
            auto_cleanup_enabled: true,
            min_files_to_keep: default_min_files_to_keep(),
            backend_retry_attempts: default_retry_attempts(),
            backend_retry_initial_ms: default_retry_initial_ms(),
            backend_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/kompass/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, KompassError> {
        Self::build(cli_config_path, Environment::default())
    }

    /// Same as [`Settings::load`], reading variables from `env` instead of the
    /// process environment.
    pub fn load_from_env_map(
        cli_config_path: Option<&str>,
        env: HashMap<String, String>,
    ) -> Result<Self, KompassError> {
        let source = env.into_iter().collect();
        Self::build(cli_config_path, Environment::default().source(Some(source)))
    }

    fn build(cli_config_path: Option<&str>, env: Environment) -> Result<Self, KompassError> {
        let config_dir = ProjectDirs::from("", "", "kompass")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(env.try_parsing(true));

        let settings: Settings = builder
            .build()
            .map_err(|e| KompassError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| KompassError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), KompassError> {
        if !(self.cleanup_threshold_percent > 0.0 && self.cleanup_threshold_percent <= 100.0) {
            return Err(KompassError::Config(format!(
                "cleanup_threshold_percent must be in (0, 100], got {}",
                self.cleanup_threshold_percent
            )));
        }
        for (name, value) in [
            ("max_file_size_mb", self.max_file_size_mb),
            ("max_user_storage_mb", self.max_user_storage_mb),
            ("max_total_storage_gb", self.max_total_storage_gb),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(KompassError::Config(format!(
                    "{name} must be > 0, got {value}"
                )));
            }
        }
        if self.object_store_enabled && is_blank(&self.object_store_bucket) {
            return Err(KompassError::Config(
                "object store enabled but object_store_bucket is not set".to_string(),
            ));
        }
        if self.document_store_enabled && is_blank(&self.document_store_project_id) {
            return Err(KompassError::Config(
                "document store enabled but document_store_project_id is not set".to_string(),
            ));
        }
        self.backend_priority()?;
        Ok(())
    }

    /// Backend kinds in preference order, as written in the priority list.
    pub fn backend_priority(&self) -> Result<Vec<BackendKind>, KompassError> {
        let mut kinds = Vec::new();
        for name in self
            .storage_backend_priority
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let kind: BackendKind = name.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Enabled backends in preference order.
    ///
    /// An enabled local backend missing from the priority list is appended
    /// last so there is always a fallback.
    pub fn enabled_backends(&self) -> Result<Vec<BackendKind>, KompassError> {
        let mut kinds: Vec<BackendKind> = self
            .backend_priority()?
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect();
        if self.local_storage_enabled && !kinds.contains(&BackendKind::Local) {
            kinds.push(BackendKind::Local);
        }
        Ok(kinds)
    }

    pub fn is_enabled(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Local => self.local_storage_enabled,
            BackendKind::Object => self.object_store_enabled,
            BackendKind::Document => self.document_store_enabled,
        }
    }

    /// Byte ceilings and cleanup policy shared by every backend.
    pub fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_file_size_bytes: mb_to_bytes(self.max_file_size_mb),
            max_user_storage_bytes: mb_to_bytes(self.max_user_storage_mb),
            max_total_storage_bytes: gb_to_bytes(self.max_total_storage_gb),
            cleanup_threshold_fraction: self.cleanup_threshold_percent / 100.0,
            min_records_to_keep: self.min_files_to_keep,
            auto_cleanup_enabled: self.auto_cleanup_enabled,
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn retry_initial_interval(&self) -> Duration {
        Duration::from_millis(self.backend_retry_initial_ms)
    }

    /// Expand ~ in data_directory to the home directory.
    pub fn expanded_data_directory(&self) -> PathBuf {
        if let Some(rest) = self.data_directory.strip_prefix("~/") {
            if let Some(dirs) = directories::BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.data_directory)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}
