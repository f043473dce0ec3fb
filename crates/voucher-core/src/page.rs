//! Explicit per-page state and the render decision derived from it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::classifier::{Classification, LifecycleState, StateClassifier};
use crate::context::AssignmentContext;
use crate::params::{ParameterExtractor, RawParameters};
use crate::submission::{CompletionForm, SubmissionBuilder, SubmissionError};
use crate::voucher::{VoucherDisplay, VoucherState};

/// Everything one page load knows about itself.
///
/// The context and classification are fixed at load; only `voucher` moves.
#[derive(Debug, Clone)]
pub struct AppState {
    pub context: AssignmentContext,
    pub classification: Classification,
    pub voucher: VoucherState,
}

impl AppState {
    /// Build the state for a page load from its raw parameters.
    pub fn load(raw: &RawParameters) -> Self {
        Self::from_context(ParameterExtractor::new().extract(raw))
    }

    /// Build the state for a page URL.
    pub fn from_url(page_url: &str) -> Self {
        Self::load(&RawParameters::from_url(page_url))
    }

    pub fn from_context(context: AssignmentContext) -> Self {
        let classification = StateClassifier::new().classify(&context);
        Self {
            context,
            classification,
            voucher: VoucherState::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.classification.state
    }

    /// Completion form using the worker-entered code, or the issued code
    /// when nothing was entered.
    pub fn completion_form(
        &self,
        builder: &SubmissionBuilder,
        entered_code: Option<&str>,
    ) -> Result<CompletionForm, SubmissionError> {
        let code = entered_code
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.voucher.code().map(|c| c.expose()))
            .unwrap_or("");
        builder.completion_form(&self.context, &self.classification, code)
    }

    /// What the page should show right now.
    pub fn render(&self, now: DateTime<Utc>, stall_after: Duration) -> RenderDecision {
        let state = self.classification.state;
        let show_accept_content = state.shows_voucher_ui();

        let voucher = if show_accept_content {
            self.voucher.display(now, stall_after)
        } else {
            VoucherDisplay::Hidden
        };

        let code_present = self.voucher.code().is_some();
        let submit_enabled = state.has_endpoint() && code_present;

        let notice = match state {
            LifecycleState::Preview => None,
            LifecycleState::AcceptedUnknown => {
                Some(SubmissionError::UnresolvedEnvironment.to_string())
            }
            _ if !code_present => Some(SubmissionError::MissingVoucherCode.to_string()),
            _ => None,
        };

        RenderDecision {
            state,
            show_preview_content: true,
            show_accept_content,
            voucher_message: voucher.message(),
            voucher,
            submit_enabled,
            notice,
        }
    }
}

/// Render decision for the task page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderDecision {
    pub state: LifecycleState,

    /// Informational HIT description, shown in every state
    pub show_preview_content: bool,

    /// Redirect button, voucher box and completion form
    pub show_accept_content: bool,

    pub voucher: VoucherDisplay,

    pub voucher_message: String,

    pub submit_enabled: bool,

    /// Why submission is blocked, if it is
    pub notice: Option<String>,
}
