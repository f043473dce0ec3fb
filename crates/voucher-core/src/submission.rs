//! Outbound actions: the redirect to the external task and the completion
//! form posted back to the platform.

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::classifier::{Classification, LifecycleState};
use crate::context::AssignmentContext;

/// Form field carrying the voucher code on the completion POST.
pub const VOUCHER_FIELD: &str = "voucherCode";

/// Preconditions that block the completion form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("The HIT has not been accepted yet; accept it before submitting")]
    Preview,

    #[error("Could not determine where to submit this HIT; please contact the requester")]
    UnresolvedEnvironment,

    #[error("A voucher code is required to submit the HIT")]
    MissingVoucherCode,
}

/// A fully specified completion POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionForm {
    /// externalSubmit endpoint
    pub action: String,

    pub method: &'static str,

    /// Hidden fields plus the voucher code, in submission order
    pub fields: Vec<(String, String)>,
}

impl CompletionForm {
    /// `application/x-www-form-urlencoded` body for the POST.
    pub fn encoded_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Builds the redirect-out URL and the completion form.
#[derive(Debug, Clone)]
pub struct SubmissionBuilder {
    task_url: Url,
}

impl SubmissionBuilder {
    /// `task_url` is the external task experience the worker is sent to.
    pub fn new(task_url: Url) -> Self {
        Self { task_url }
    }

    pub fn task_url(&self) -> &Url {
        &self.task_url
    }

    /// Redirect URL carrying the assignment identity.
    ///
    /// Existing query parameters on the task URL are preserved.
    pub fn redirect_url(&self, context: &AssignmentContext) -> Url {
        let mut url = self.task_url.clone();
        url.query_pairs_mut()
            .append_pair("assignmentId", context.assignment_id())
            .append_pair("workerId", context.worker_id())
            .append_pair("hitId", context.hit_id())
            .append_pair("isLive", &context.is_live().to_string());
        url
    }

    /// Completion form for the platform.
    ///
    /// Refuses to build a form for a preview, an unresolved endpoint, or a
    /// blank voucher code. None of these are recoverable here; the page must
    /// block and show the error.
    pub fn completion_form(
        &self,
        context: &AssignmentContext,
        classification: &Classification,
        voucher_code: &str,
    ) -> Result<CompletionForm, SubmissionError> {
        let endpoint = match (classification.state, classification.endpoint) {
            (LifecycleState::Preview, _) => return Err(SubmissionError::Preview),
            (_, Some(endpoint)) => endpoint,
            (_, None) => return Err(SubmissionError::UnresolvedEnvironment),
        };

        let voucher_code = voucher_code.trim();
        if voucher_code.is_empty() {
            return Err(SubmissionError::MissingVoucherCode);
        }

        Ok(CompletionForm {
            action: endpoint.to_string(),
            method: "POST",
            fields: vec![
                ("assignmentId".to_string(), context.assignment_id().to_string()),
                ("workerId".to_string(), context.worker_id().to_string()),
                ("hitId".to_string(), context.hit_id().to_string()),
                (VOUCHER_FIELD.to_string(), voucher_code.to_string()),
            ],
        })
    }
}
