//! Lifecycle classification and completion endpoint resolution.
//!
//! | assignment     | submit target | state              | endpoint    |
//! |----------------|---------------|--------------------|-------------|
//! | empty/sentinel | (forced None) | Preview            | none        |
//! | real           | Sandbox       | AcceptedSandbox    | sandbox     |
//! | real           | Production    | AcceptedProduction | production  |
//! | real           | None          | AcceptedUnknown    | unresolved  |

use serde::{Deserialize, Serialize};

use crate::context::{AssignmentContext, SubmitTarget};

/// Sandbox externalSubmit endpoint.
pub const SANDBOX_SUBMIT_URL: &str = "https://workersandbox.mturk.com/mturk/externalSubmit";

/// Production externalSubmit endpoint.
pub const PRODUCTION_SUBMIT_URL: &str = "https://www.mturk.com/mturk/externalSubmit";

/// Where the page is in the assignment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Worker has not accepted the HIT
    Preview,
    AcceptedSandbox,
    AcceptedProduction,
    /// Accepted, but the environment could not be determined
    AcceptedUnknown,
}

impl LifecycleState {
    /// Whether the voucher box and completion form are rendered.
    pub fn shows_voucher_ui(self) -> bool {
        !matches!(self, Self::Preview)
    }

    /// Whether a completion endpoint exists for this state.
    pub fn has_endpoint(self) -> bool {
        matches!(self, Self::AcceptedSandbox | Self::AcceptedProduction)
    }
}

/// Classifier output: the lifecycle state plus the resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub state: LifecycleState,

    /// Literal externalSubmit URL; `None` for Preview and AcceptedUnknown
    pub endpoint: Option<&'static str>,
}

/// Maps an [`AssignmentContext`] to a [`Classification`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StateClassifier;

impl StateClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, context: &AssignmentContext) -> Classification {
        if context.is_preview() {
            return Classification {
                state: LifecycleState::Preview,
                endpoint: None,
            };
        }

        let (state, endpoint) = match context.submit_target() {
            SubmitTarget::Sandbox => (LifecycleState::AcceptedSandbox, Some(SANDBOX_SUBMIT_URL)),
            SubmitTarget::Production => {
                (LifecycleState::AcceptedProduction, Some(PRODUCTION_SUBMIT_URL))
            }
            SubmitTarget::None => {
                tracing::warn!(
                    assignment_id = %context.assignment_id(),
                    "Accepted assignment with unrecognised submit host; completion disabled"
                );
                (LifecycleState::AcceptedUnknown, None)
            }
        };

        Classification { state, endpoint }
    }
}

/// Convenience wrapper around [`StateClassifier::classify`].
pub fn classify(context: &AssignmentContext) -> Classification {
    StateClassifier::new().classify(context)
}
