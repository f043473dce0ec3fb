//! Runtime configuration: the page settings plus issuance and stall timing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use voucher_core::{config::validate_http_url, ConfigError, PageConfig};

/// Default time a request may stay outstanding before the page calls it stalled.
pub const DEFAULT_STALL_AFTER: Duration = Duration::from_secs(30);

/// Full configuration for a running task page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(flatten)]
    pub page: PageConfig,

    #[serde(default)]
    pub issuance: IssuanceConfig,

    #[serde(default = "default_stall_after", with = "humantime_duration")]
    pub stall_after: Duration,
}

/// Which issuance backend to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuanceConfig {
    #[serde(default)]
    pub kind: IssuerKind,

    /// Issuance endpoint, required for `http`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(
        default,
        with = "humantime_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// Environment variable holding a bearer token for the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerKind {
    Http,
    #[default]
    Memory,
}

impl IssuerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuerKind::Http => "http",
            IssuerKind::Memory => "memory",
        }
    }
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            kind: IssuerKind::Memory,
            endpoint: None,
            timeout: None,
            token_env: None,
        }
    }
}

impl IssuanceConfig {
    /// Backend configuration in the shape the issuer factories read.
    pub fn to_issuer_json(&self) -> serde_json::Value {
        let mut json = serde_json::json!({});
        if let Some(endpoint) = &self.endpoint {
            json["endpoint"] = endpoint.clone().into();
        }
        if let Some(timeout) = self.timeout {
            json["timeout"] = humantime::format_duration(timeout).to_string().into();
        }
        if let Some(token_env) = &self.token_env {
            json["token_env"] = token_env.clone().into();
        }
        json
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.kind, &self.endpoint) {
            (IssuerKind::Http, None) => {
                return Err(ConfigError::MissingField("issuance.endpoint".to_string()))
            }
            (_, Some(endpoint)) => {
                validate_http_url("issuance.endpoint", endpoint)?;
            }
            (IssuerKind::Memory, None) => {}
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationError(
                "issuance.timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_stall_after() -> Duration {
    DEFAULT_STALL_AFTER
}

impl RuntimeConfig {
    pub fn new(page: PageConfig) -> Self {
        Self {
            page,
            issuance: IssuanceConfig::default(),
            stall_after: DEFAULT_STALL_AFTER,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.page.validate()?;
        self.issuance.validate()?;
        if self.stall_after.is_zero() {
            return Err(ConfigError::ValidationError(
                "stall_after must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod humantime_duration_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::humantime_duration::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
