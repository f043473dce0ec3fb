//! Page configuration parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::submission::SubmissionBuilder;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Settings for the task page itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageConfig {
    /// External task experience the redirect form points at
    pub task_url: String,
}

impl PageConfig {
    /// Parse a config from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PageConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PageConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file, choosing JSON or YAML by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Check required fields and URL shape.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.task_url()?;
        Ok(())
    }

    /// The task URL, parsed.
    pub fn task_url(&self) -> Result<Url, ConfigError> {
        validate_http_url("task_url", &self.task_url)
    }

    /// A [`SubmissionBuilder`] for this page.
    pub fn submission_builder(&self) -> Result<SubmissionBuilder, ConfigError> {
        Ok(SubmissionBuilder::new(self.task_url()?))
    }
}

/// Parse `value` as an absolute http(s) URL, naming `field` in errors.
pub fn validate_http_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()));
    }

    let url = Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{} is not a valid URL: {}", field, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::ValidationError(format!(
            "{} must use http or https, got '{}'",
            field, other
        ))),
    }
}
