//! Raw page parameters and their extraction into an [`AssignmentContext`].
//!
//! Extraction never fails. Missing, empty or garbled input always lands on
//! the empty/undetermined representation, which classifies as Preview.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::{AssignmentContext, AssignmentId, SubmitTarget};

/// The identifying parameters exactly as they arrived on the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParameters {
    #[serde(default)]
    pub worker_id: Option<String>,

    #[serde(default)]
    pub assignment_id: Option<String>,

    #[serde(default)]
    pub hit_id: Option<String>,

    #[serde(default)]
    pub turk_submit_to: Option<String>,
}

impl RawParameters {
    /// Read parameters from a query string (with or without a leading `?`).
    ///
    /// `+` decodes to a space and percent escapes are decoded. When a key
    /// repeats, the first occurrence wins. A bare key with no `=` counts as
    /// present with an empty value. Any other key, including a legacy
    /// `isLive`, is ignored.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "workerId" => &mut params.worker_id,
                "assignmentId" => &mut params.assignment_id,
                "hitId" => &mut params.hit_id,
                "turkSubmitTo" => &mut params.turk_submit_to,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        params
    }

    /// Read parameters from a full page URL.
    ///
    /// An unparseable URL yields no parameters at all.
    pub fn from_url(page_url: &str) -> Self {
        match Url::parse(page_url) {
            Ok(url) => Self::from_query(url.query().unwrap_or("")),
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable page URL, treating as preview");
                Self::default()
            }
        }
    }
}

/// Turns [`RawParameters`] into an [`AssignmentContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterExtractor;

impl ParameterExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Build the context for one page load.
    pub fn extract(&self, raw: &RawParameters) -> AssignmentContext {
        // Parameters not supplied at all: force every field empty.
        let Some(assignment_id) = raw.assignment_id.as_deref() else {
            return AssignmentContext::empty();
        };

        let assignment = AssignmentId::parse(Some(assignment_id));
        let submit_target = raw
            .turk_submit_to
            .as_deref()
            .map(SubmitTarget::from_host)
            .unwrap_or_default();

        let context = AssignmentContext::new(
            raw.worker_id.clone().unwrap_or_default(),
            assignment,
            raw.hit_id.clone().unwrap_or_default(),
            submit_target,
        );

        tracing::debug!(
            assignment_id = %context.assignment_id(),
            submit_target = ?context.submit_target(),
            "Extracted assignment context"
        );

        context
    }
}

/// Extract a context straight from a page URL.
pub fn extract_from_url(page_url: &str) -> AssignmentContext {
    ParameterExtractor::new().extract(&RawParameters::from_url(page_url))
}
