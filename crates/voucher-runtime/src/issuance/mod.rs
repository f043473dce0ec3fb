//! Voucher issuance service abstractions.
//!
//! This module defines the trait every issuance backend implements and
//! ships two backends: an HTTP client for a deployed issuance endpoint and
//! an in-memory service for tests and local runs.
//!
//! ## Contract
//!
//! For a fixed assignment id, repeated calls return the same code. A body
//! of `"0"` means no voucher was produced. Interpreting the body is left to
//! [`voucher_core::IssuanceOutcome::from_response_body`].

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use voucher_core::{AssignmentContext, IsLive};

mod factory;
mod memory;
pub mod secrets;

#[cfg(feature = "http")]
mod http;

pub use factory::{IssuerFactory, IssuerInfo, IssuerRegistry};
pub use memory::{MemoryIssuerFactory, MemoryVoucherIssuer};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "http")]
pub use http::{HttpIssuerFactory, HttpVoucherIssuer};

/// Errors from issuance backends.
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Issuance endpoint returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Issuer not configured: {0}")]
    NotConfigured(String),
}

/// Identity fields sent with every issuance request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuanceRequest {
    #[serde(rename = "amtIsLive")]
    pub is_live: IsLive,

    #[serde(rename = "amtAssignmentId")]
    pub assignment_id: String,

    #[serde(rename = "amtWorkerId")]
    pub worker_id: String,

    #[serde(rename = "amtHitId")]
    pub hit_id: String,
}

impl IssuanceRequest {
    pub fn from_context(context: &AssignmentContext) -> Self {
        Self {
            is_live: context.is_live(),
            assignment_id: context.assignment_id().to_string(),
            worker_id: context.worker_id().to_string(),
            hit_id: context.hit_id().to_string(),
        }
    }

    /// Form fields in wire order.
    pub fn form_fields(&self) -> [(&'static str, String); 4] {
        [
            ("amtIsLive", self.is_live.to_string()),
            ("amtAssignmentId", self.assignment_id.clone()),
            ("amtWorkerId", self.worker_id.clone()),
            ("amtHitId", self.hit_id.clone()),
        ]
    }
}

/// A voucher issuance backend.
///
/// This is the only place an issuance request leaves the process. The
/// coordinator calls it at most once per outstanding request.
#[async_trait]
pub trait VoucherIssuer: Send + Sync {
    /// Submit one issuance request and return the raw response body.
    async fn issue(&self, request: &IssuanceRequest) -> Result<String, IssuanceError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use voucher_core::{AssignmentId, SubmitTarget};

    #[test]
    fn test_request_from_context() {
        let ctx = AssignmentContext::new(
            "W1",
            AssignmentId::Accepted("A1".into()),
            "H1",
            SubmitTarget::Production,
        );
        let request = IssuanceRequest::from_context(&ctx);
        let fields = request.form_fields();

        assert_eq!(fields[0], ("amtIsLive", "1".to_string()));
        assert_eq!(fields[1], ("amtAssignmentId", "A1".to_string()));
        assert_eq!(fields[2], ("amtWorkerId", "W1".to_string()));
        assert_eq!(fields[3], ("amtHitId", "H1".to_string()));
    }

    #[test]
    fn test_request_serializes_wire_names() {
        let ctx = AssignmentContext::new("W1", AssignmentId::Accepted("A1".into()), "", SubmitTarget::None);
        let json = serde_json::to_value(IssuanceRequest::from_context(&ctx)).unwrap();
        assert_eq!(json["amtIsLive"], -1);
        assert_eq!(json["amtAssignmentId"], "A1");
        assert_eq!(json["amtHitId"], "");
    }
}
