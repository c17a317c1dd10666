//! Run configuration.
//!
//! Values come from defaults, then environment variables, then command-line
//! flags (applied by the CLI on top of [`RunConfig::from_env`]).

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::pipeline::RetainPolicy;

/// Base image the versioned test images are built from.
pub const DEFAULT_BASE_IMAGE: &str = "mhart/alpine-node";

/// Tags of [`DEFAULT_BASE_IMAGE`] tested when no versions are given.
pub const DEFAULT_VERSIONS: &[&str] = &[
    "0.10.41", "0.10.42", "0.10.43", "0.10.44", "0.12.9", "0.12.10", "0.12.11", "0.12.12",
    "0.12.13", "4.2.4", "4.2.5", "4.2.6", "4.3.0", "4.3.1", "4.3.2", "4.4.0", "4.4.1", "4.4.2",
    "5.1.1", "5.2.0", "5.3.0", "5.4.0", "5.4.1", "5.5.0", "5.6.0", "5.7.0", "5.7.1", "5.8.0",
    "5.9.0", "5.9.1", "5.10.0", "5.10.1",
];

/// Configuration for one autochecker invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum number of versions tested at the same time.
    pub concurrency: usize,
    /// Image pulled as `base_image:version`.
    pub base_image: String,
    /// Command run inside each test container.
    pub test_command: Vec<String>,
    /// Dockerfile template override; `DockerTemplate` in the project otherwise.
    pub template_path: Option<PathBuf>,
    /// Directory staging copies are created in.
    pub staging_root: PathBuf,
    /// When staging copies are kept after a run.
    pub retain: RetainPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            test_command: vec!["npm".to_string(), "test".to_string()],
            template_path: None,
            staging_root: std::env::temp_dir(),
            retain: RetainPolicy::default(),
        }
    }
}

/// Number of available processing units, at least 1.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RunConfig {
    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TEST_LIMIT`: Maximum concurrent versions (default: number of CPUs)
    /// - `AUTOCHECKER_BASE_IMAGE`: Base image (default: mhart/alpine-node)
    /// - `AUTOCHECKER_TEST_CMD`: Whitespace separated test command (default: npm test)
    /// - `AUTOCHECKER_STAGING_DIR`: Staging root (default: system temp dir)
    /// - `AUTOCHECKER_KEEP_STAGING`: Keep staging copies, true/false (default: true)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunConfig::from_env`] with an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("TEST_LIMIT") {
            config.concurrency = parse_env_value(&val, "TEST_LIMIT")?;
        }

        if let Some(val) = lookup("AUTOCHECKER_BASE_IMAGE") {
            config.base_image = val.trim().to_string();
        }

        if let Some(val) = lookup("AUTOCHECKER_TEST_CMD") {
            config.test_command = val.split_whitespace().map(str::to_string).collect();
        }

        if let Some(val) = lookup("AUTOCHECKER_STAGING_DIR") {
            config.staging_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("AUTOCHECKER_KEEP_STAGING") {
            if !parse_env_bool(&val, "AUTOCHECKER_KEEP_STAGING")? {
                config.retain = RetainPolicy::discard();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.base_image.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "base_image cannot be empty".to_string(),
            ));
        }

        if self.test_command.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "test_command cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Default versions, in the order they are tested.
    pub fn default_versions() -> Vec<String> {
        DEFAULT_VERSIONS.iter().map(|v| v.to_string()).collect()
    }
}

/// Sorts versions by semantic version; unparsable ones go last, as given.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        match (semver::Version::parse(a), semver::Version::parse(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => std::cmp::Ordering::Equal,
        }
    });
}

fn parse_env_value<T: FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_env_bool(val: &str, key: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{val}'"),
        }),
    }
}
