//! HTTP issuance backend.
//!
//! Posts the identity fields form-encoded to the issuance endpoint and
//! returns the response body as-is.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use voucher_core::config::validate_http_url;

use super::{
    factory::IssuerFactory, secrets::ApiCredential, IssuanceError, IssuanceRequest, VoucherIssuer,
};

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Issuance service reached over HTTP.
pub struct HttpVoucherIssuer {
    endpoint: String,
    timeout: Duration,
    credential: Option<ApiCredential>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpVoucherIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVoucherIssuer")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("credential", &self.credential)
            .finish()
    }
}

impl HttpVoucherIssuer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, IssuanceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| IssuanceError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            credential: None,
            client,
        })
    }

    /// Create from JSON configuration.
    ///
    /// Keys: `endpoint` (required), `timeout` (humantime, e.g. "15s"),
    /// `token` or `token_env` (optional bearer credential).
    pub fn from_config(config: &JsonValue) -> Result<Self, IssuanceError> {
        let endpoint = config["endpoint"]
            .as_str()
            .ok_or_else(|| IssuanceError::NotConfigured("endpoint is required".to_string()))?;

        let mut issuer = Self::new(endpoint)?;

        if let Some(timeout) = config["timeout"].as_str() {
            let timeout = humantime::parse_duration(timeout)
                .map_err(|e| IssuanceError::NotConfigured(format!("timeout: {}", e)))?;
            issuer = issuer.with_timeout(timeout);
        }

        if let Some(credential) = ApiCredential::from_issuer_config(config)? {
            issuer = issuer.with_credential(credential);
        }

        Ok(issuer)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VoucherIssuer for HttpVoucherIssuer {
    async fn issue(&self, request: &IssuanceRequest) -> Result<String, IssuanceError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .form(&request.form_fields());

        // Only expose the credential here, at the point of use
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential.expose());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                IssuanceError::Timeout(self.timeout)
            } else {
                IssuanceError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                IssuanceError::Timeout(self.timeout)
            } else {
                IssuanceError::HttpError(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(IssuanceError::ApiError {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        Ok(body)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Factory for [`HttpVoucherIssuer`].
///
/// ## Configuration Format
/// ```json
/// {
///   "endpoint": "https://mywebsite.com/voucher-demo/amt-voucher/post-voucher.php",
///   "timeout": "15s",
///   "token_env": "VOUCHER_ISSUANCE_TOKEN"
/// }
/// ```
pub struct HttpIssuerFactory;

impl IssuerFactory for HttpIssuerFactory {
    fn issuer_type(&self) -> &'static str {
        "http"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn VoucherIssuer>, IssuanceError> {
        Ok(Arc::new(HttpVoucherIssuer::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), IssuanceError> {
        let endpoint = config["endpoint"]
            .as_str()
            .ok_or_else(|| IssuanceError::NotConfigured("endpoint is required".to_string()))?;
        validate_http_url("endpoint", endpoint)
            .map_err(|e| IssuanceError::NotConfigured(e.to_string()))?;
        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "timeout": humantime::format_duration(DEFAULT_TIMEOUT).to_string()
        })
    }

    fn description(&self) -> &'static str {
        "Form-encoded POST to a deployed issuance endpoint"
    }
}
