//! Normalized identity of one task-page load.
//!
//! Every sentinel string the platform uses (the preview assignment id, the
//! two submit-to hosts) is resolved once here into a closed enum. Nothing
//! downstream compares raw strings again.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Assignment id the platform sends while a worker previews a HIT.
pub const PREVIEW_ASSIGNMENT_ID: &str = "ASSIGNMENT_ID_NOT_AVAILABLE";

/// `turkSubmitTo` value for the worker sandbox.
pub const SANDBOX_HOST: &str = "https://workersandbox.mturk.com";

/// `turkSubmitTo` value for the production marketplace.
pub const PRODUCTION_HOST: &str = "https://www.mturk.com";

/// Platform environment the completion form must be posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTarget {
    /// Host unknown, absent, or the page is a preview
    #[default]
    None,
    Sandbox,
    Production,
}

impl SubmitTarget {
    /// Classify a raw `turkSubmitTo` value.
    ///
    /// Exact, case-sensitive, full-string match only. A trailing slash or
    /// different scheme is not the same host.
    pub fn from_host(host: &str) -> Self {
        match host {
            SANDBOX_HOST => Self::Sandbox,
            PRODUCTION_HOST => Self::Production,
            _ => Self::None,
        }
    }

    /// The `isLive` flag this target implies.
    pub fn is_live(self) -> IsLive {
        match self {
            Self::None => IsLive::Undetermined,
            Self::Sandbox => IsLive::Sandbox,
            Self::Production => IsLive::Production,
        }
    }
}

/// The tri-state `isLive` flag carried on the wire as -1, 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i8", try_from = "i8")]
pub enum IsLive {
    #[default]
    Undetermined,
    Sandbox,
    Production,
}

impl IsLive {
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Undetermined => -1,
            Self::Sandbox => 0,
            Self::Production => 1,
        }
    }
}

impl From<IsLive> for i8 {
    fn from(value: IsLive) -> Self {
        value.as_i8()
    }
}

impl TryFrom<i8> for IsLive {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Undetermined),
            0 => Ok(Self::Sandbox),
            1 => Ok(Self::Production),
            other => Err(format!("isLive must be -1, 0 or 1, got {}", other)),
        }
    }
}

impl fmt::Display for IsLive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// What the `assignmentId` parameter says about the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AssignmentId {
    /// Parameter missing or empty
    NotSupplied,
    /// The platform's preview sentinel
    Preview,
    /// A real assignment the worker has accepted
    Accepted(String),
}

impl AssignmentId {
    /// Resolve a raw parameter value.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("") => Self::NotSupplied,
            Some(PREVIEW_ASSIGNMENT_ID) => Self::Preview,
            Some(id) => Self::Accepted(id.to_string()),
        }
    }

    /// The wire representation: empty, the sentinel, or the real id.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotSupplied => "",
            Self::Preview => PREVIEW_ASSIGNMENT_ID,
            Self::Accepted(id) => id,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Parsed identity of the current page load.
///
/// Immutable once built. Construction enforces that a preview (no real
/// assignment id) never carries a submit target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentContext {
    worker_id: String,
    assignment: AssignmentId,
    hit_id: String,
    submit_target: SubmitTarget,
}

impl AssignmentContext {
    /// Build a context, dropping the submit target for previews.
    pub fn new(
        worker_id: impl Into<String>,
        assignment: AssignmentId,
        hit_id: impl Into<String>,
        submit_target: SubmitTarget,
    ) -> Self {
        let submit_target = if assignment.is_accepted() {
            submit_target
        } else {
            SubmitTarget::None
        };

        Self {
            worker_id: worker_id.into(),
            assignment,
            hit_id: hit_id.into(),
            submit_target,
        }
    }

    /// The "parameters not supplied" context: every field empty.
    pub fn empty() -> Self {
        Self::new("", AssignmentId::NotSupplied, "", SubmitTarget::None)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn assignment(&self) -> &AssignmentId {
        &self.assignment
    }

    /// Wire form of the assignment id.
    pub fn assignment_id(&self) -> &str {
        self.assignment.as_str()
    }

    pub fn hit_id(&self) -> &str {
        &self.hit_id
    }

    pub fn submit_target(&self) -> SubmitTarget {
        self.submit_target
    }

    pub fn is_live(&self) -> IsLive {
        self.submit_target.is_live()
    }

    /// True when no voucher may be requested for this page.
    pub fn is_preview(&self) -> bool {
        !self.assignment.is_accepted()
    }
}

impl Default for AssignmentContext {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_target_exact_match() {
        assert_eq!(SubmitTarget::from_host(SANDBOX_HOST), SubmitTarget::Sandbox);
        assert_eq!(SubmitTarget::from_host(PRODUCTION_HOST), SubmitTarget::Production);
        assert_eq!(SubmitTarget::from_host(""), SubmitTarget::None);
        assert_eq!(
            SubmitTarget::from_host("https://www.mturk.com/"),
            SubmitTarget::None
        );
        assert_eq!(
            SubmitTarget::from_host("HTTPS://WWW.MTURK.COM"),
            SubmitTarget::None
        );
        assert_eq!(
            SubmitTarget::from_host("http://workersandbox.mturk.com"),
            SubmitTarget::None
        );
    }

    #[test]
    fn test_is_live_wire_values() {
        assert_eq!(IsLive::Undetermined.as_i8(), -1);
        assert_eq!(IsLive::Sandbox.as_i8(), 0);
        assert_eq!(IsLive::Production.as_i8(), 1);
        assert_eq!(serde_json::to_string(&IsLive::Undetermined).unwrap(), "-1");
        assert_eq!(serde_json::from_str::<IsLive>("1").unwrap(), IsLive::Production);
        assert!(serde_json::from_str::<IsLive>("2").is_err());
    }

    #[test]
    fn test_assignment_id_parse() {
        assert_eq!(AssignmentId::parse(None), AssignmentId::NotSupplied);
        assert_eq!(AssignmentId::parse(Some("")), AssignmentId::NotSupplied);
        assert_eq!(
            AssignmentId::parse(Some(PREVIEW_ASSIGNMENT_ID)),
            AssignmentId::Preview
        );
        assert_eq!(
            AssignmentId::parse(Some("A1")),
            AssignmentId::Accepted("A1".to_string())
        );
        assert_eq!(AssignmentId::Preview.as_str(), PREVIEW_ASSIGNMENT_ID);
    }

    #[test]
    fn test_preview_drops_submit_target() {
        let ctx = AssignmentContext::new("W1", AssignmentId::Preview, "H1", SubmitTarget::Production);
        assert_eq!(ctx.submit_target(), SubmitTarget::None);
        assert_eq!(ctx.is_live(), IsLive::Undetermined);
        assert!(ctx.is_preview());
        assert_eq!(ctx.worker_id(), "W1");
    }

    #[test]
    fn test_accepted_keeps_submit_target() {
        let ctx = AssignmentContext::new(
            "W1",
            AssignmentId::Accepted("A1".into()),
            "H1",
            SubmitTarget::Sandbox,
        );
        assert_eq!(ctx.is_live(), IsLive::Sandbox);
        assert_eq!(ctx.assignment_id(), "A1");
        assert!(!ctx.is_preview());
    }
}
