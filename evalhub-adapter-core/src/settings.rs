//! Process-wide adapter configuration.
//!
//! Settings are read once at startup into an immutable [`AdapterSettings`]
//! value and handed to constructors; nothing else in the crate reads the
//! environment.

use crate::persister::PersisterConfig;
use std::path::PathBuf;

pub const ENV_MODE: &str = "EVALHUB_MODE";
pub const ENV_JOB_SPEC_PATH: &str = "EVALHUB_JOB_SPEC_PATH";
pub const ENV_SERVICE_URL: &str = "EVALHUB_SERVICE_URL";
pub const ENV_REGISTRY_URL: &str = "REGISTRY_URL";
pub const ENV_REGISTRY_USERNAME: &str = "REGISTRY_USERNAME";
pub const ENV_REGISTRY_PASSWORD: &str = "REGISTRY_PASSWORD";
pub const ENV_REGISTRY_INSECURE: &str = "REGISTRY_INSECURE";

pub const DEFAULT_JOB_SPEC_PATH_K8S: &str = "/meta/job.json";
pub const DEFAULT_JOB_SPEC_PATH_LOCAL: &str = "meta/job.json";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("job spec file not found: {0}")]
    JobSpecNotFound(PathBuf),
    #[error("invalid job spec {path}: {reason}")]
    InvalidJobSpec { path: PathBuf, reason: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Local,
    K8s,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RegistrySettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AdapterSettings {
    pub mode: RunMode,
    pub job_spec_path: Option<PathBuf>,
    /// Sidecar (or service) base URL. Status updates are only logged when unset.
    pub service_url: Option<String>,
    pub registry: RegistrySettings,
}

impl AdapterSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mode = match get(ENV_MODE) {
            None => RunMode::default(),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "local" => RunMode::Local,
                "k8s" => RunMode::K8s,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_MODE,
                        value: v,
                    })
                }
            },
        };

        let insecure = match get(ENV_REGISTRY_INSECURE) {
            None => false,
            Some(v) => parse_bool(&v).ok_or(ConfigError::InvalidValue {
                key: ENV_REGISTRY_INSECURE,
                value: v,
            })?,
        };

        Ok(Self {
            mode,
            job_spec_path: get(ENV_JOB_SPEC_PATH).map(PathBuf::from),
            service_url: get(ENV_SERVICE_URL).map(|u| u.trim_end_matches('/').to_string()),
            registry: RegistrySettings {
                url: get(ENV_REGISTRY_URL),
                username: get(ENV_REGISTRY_USERNAME),
                password: get(ENV_REGISTRY_PASSWORD),
                insecure,
            },
        })
    }

    pub fn with_job_spec_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.job_spec_path = Some(path.into());
        self
    }

    pub fn resolved_job_spec_path(&self) -> PathBuf {
        if let Some(p) = &self.job_spec_path {
            return p.clone();
        }
        match self.mode {
            RunMode::K8s => PathBuf::from(DEFAULT_JOB_SPEC_PATH_K8S),
            RunMode::Local => PathBuf::from(DEFAULT_JOB_SPEC_PATH_LOCAL),
        }
    }

    pub fn validate_runtime(&self) -> Result<(), ConfigError> {
        let path = self.resolved_job_spec_path();
        if !path.exists() {
            return Err(ConfigError::JobSpecNotFound(path));
        }
        match (&self.registry.username, &self.registry.password) {
            (Some(_), None) => return Err(ConfigError::Missing(ENV_REGISTRY_PASSWORD)),
            (None, Some(_)) => return Err(ConfigError::Missing(ENV_REGISTRY_USERNAME)),
            _ => {}
        }
        if self.mode == RunMode::K8s && self.registry.url.is_none() {
            return Err(ConfigError::Missing(ENV_REGISTRY_URL));
        }
        Ok(())
    }

    pub fn persister_config(&self) -> PersisterConfig {
        match &self.registry.url {
            Some(url) => PersisterConfig::Registry {
                url: url.clone(),
                username: self.registry.username.clone(),
                password: self.registry.password.clone(),
                insecure: self.registry.insecure,
            },
            None => PersisterConfig::Placeholder { registry_url: None },
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
