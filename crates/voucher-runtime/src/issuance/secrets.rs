//! Bearer token for an issuance endpoint.
//!
//! The token sits in a [`SecretString`]; `Debug` and `Display` print where it
//! came from, never its value. [`ApiCredential::expose`] is called only when
//! the request header is built.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::IssuanceError;

/// Origin of a token, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Inline `token` key in the issuer config
    Config,
    /// Environment variable named by `token_env`
    Environment(String),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => f.write_str("inline config"),
            CredentialSource::Environment(var) => write!(f, "${}", var),
        }
    }
}

pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
        }
    }

    /// Read the token from the issuer config.
    ///
    /// `token` wins over `token_env`. Neither key means no credential. A
    /// named variable that is unset, or a blank token from either place, is
    /// a configuration error.
    pub fn from_issuer_config(config: &JsonValue) -> Result<Option<Self>, IssuanceError> {
        let credential = match (config["token"].as_str(), config["token_env"].as_str()) {
            (Some(token), _) => Self::new(token, CredentialSource::Config),
            (None, Some(var)) => {
                let token = std::env::var(var).map_err(|_| {
                    IssuanceError::NotConfigured(format!("token_env names unset variable '{}'", var))
                })?;
                Self::new(token, CredentialSource::Environment(var.to_string()))
            }
            (None, None) => return Ok(None),
        };

        if credential.is_blank() {
            return Err(IssuanceError::NotConfigured(format!(
                "issuance token from {} is empty",
                credential.source
            )));
        }
        Ok(Some(credential))
    }

    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    fn is_blank(&self) -> bool {
        self.value.expose_secret().trim().is_empty()
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "issuance token from {} [REDACTED]", self.source)
    }
}
