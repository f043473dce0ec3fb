//! Per-page voucher state and the single-flight issuance guard.
//!
//! ```text
//! NotRequested ──begin──► Requesting ──resolve(Issued)──► Issued (terminal)
//!                             │  ▲
//!              resolve(Failed)│  │begin (manual retry)
//!                             ▼  │
//!                            Failed
//! ```
//!
//! While `Requesting`, [`VoucherState::begin`] returns [`BeginOutcome::Pending`]
//! and never authorises a second request. Once `Issued`, the code is fixed
//! for the life of the page.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::context::AssignmentContext;

/// Body the issuance service returns when it produced no voucher.
pub const REFUSED_SENTINEL: &str = "0";

/// An issued voucher code.
///
/// `Debug` is redacted so codes never reach logs; use [`VoucherCode::expose`]
/// at the point of display or submission.
#[derive(Clone, PartialEq, Eq)]
pub struct VoucherCode(String);

impl VoucherCode {
    /// Accept a code, rejecting blanks and the refusal sentinel.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == REFUSED_SENTINEL {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VoucherCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VoucherCode([REDACTED])")
    }
}

/// Why an issuance attempt produced no code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The service answered with the refusal sentinel
    Refused,
    /// The service could not be reached or answered with an error
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "the voucher service did not issue a code"),
            Self::Transport(detail) => write!(f, "could not reach the voucher service: {}", detail),
        }
    }
}

/// Result of one issuance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceOutcome {
    Issued(VoucherCode),
    Failed(FailureReason),
}

impl IssuanceOutcome {
    /// Interpret the raw response body of the issuance endpoint.
    pub fn from_response_body(body: &str) -> Self {
        match VoucherCode::parse(body) {
            Some(code) => Self::Issued(code),
            None => Self::Failed(FailureReason::Refused),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Failed(FailureReason::Transport(detail.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    NotRequested,
    Requesting,
    Issued,
    Failed,
}

/// What the caller of [`VoucherState::begin`] must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Fire exactly one issuance request, tagged with this attempt number
    Start { attempt: u32 },
    /// A request is already in flight; do nothing
    Pending,
    /// Already issued; no request needed
    Cached(VoucherCode),
    /// Preview page; vouchers may not be requested
    Suppressed,
}

/// Mutable voucher state, one per page load.
#[derive(Debug, Clone)]
pub struct VoucherState {
    status: VoucherStatus,
    code: Option<VoucherCode>,
    last_failure: Option<FailureReason>,
    attempts: u32,
    requested_at: Option<DateTime<Utc>>,
}

impl VoucherState {
    pub fn new() -> Self {
        Self {
            status: VoucherStatus::NotRequested,
            code: None,
            last_failure: None,
            attempts: 0,
            requested_at: None,
        }
    }

    /// Guard run on every "complete" trigger.
    pub fn begin(&mut self, context: &AssignmentContext) -> BeginOutcome {
        self.begin_at(context, Utc::now())
    }

    /// [`VoucherState::begin`] with an explicit clock.
    pub fn begin_at(&mut self, context: &AssignmentContext, now: DateTime<Utc>) -> BeginOutcome {
        if context.is_preview() {
            return BeginOutcome::Suppressed;
        }

        match self.status {
            VoucherStatus::Issued => match &self.code {
                Some(code) => BeginOutcome::Cached(code.clone()),
                None => {
                    // Unreachable through resolve(); recover by re-requesting
                    self.start(now)
                }
            },
            VoucherStatus::Requesting => BeginOutcome::Pending,
            VoucherStatus::NotRequested | VoucherStatus::Failed => self.start(now),
        }
    }

    fn start(&mut self, now: DateTime<Utc>) -> BeginOutcome {
        self.attempts += 1;
        self.status = VoucherStatus::Requesting;
        self.requested_at = Some(now);
        BeginOutcome::Start {
            attempt: self.attempts,
        }
    }

    /// Apply the response for `attempt`.
    ///
    /// Returns false when the response is stale (not the attempt in flight)
    /// and was ignored.
    pub fn resolve(&mut self, attempt: u32, outcome: IssuanceOutcome) -> bool {
        if self.status != VoucherStatus::Requesting || attempt != self.attempts {
            tracing::debug!(
                attempt,
                current = self.attempts,
                status = ?self.status,
                "Ignoring stale issuance response"
            );
            return false;
        }

        match outcome {
            IssuanceOutcome::Issued(code) => {
                if self.code.is_none() {
                    self.code = Some(code);
                }
                self.status = VoucherStatus::Issued;
                self.last_failure = None;
            }
            IssuanceOutcome::Failed(reason) => {
                self.status = VoucherStatus::Failed;
                self.last_failure = Some(reason);
            }
        }
        self.requested_at = None;
        true
    }

    pub fn status(&self) -> VoucherStatus {
        self.status
    }

    pub fn code(&self) -> Option<&VoucherCode> {
        self.code.as_ref()
    }

    pub fn last_failure(&self) -> Option<&FailureReason> {
        self.last_failure.as_ref()
    }

    /// Number of issuance requests authorised so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    /// A request has been in flight for at least `stall_after`.
    pub fn is_stalled(&self, now: DateTime<Utc>, stall_after: Duration) -> bool {
        match (self.status, self.requested_at) {
            (VoucherStatus::Requesting, Some(since)) => now
                .signed_duration_since(since)
                .to_std()
                .map(|elapsed| elapsed >= stall_after)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// User-facing status for the voucher box.
    pub fn display(&self, now: DateTime<Utc>, stall_after: Duration) -> VoucherDisplay {
        match self.status {
            VoucherStatus::NotRequested => VoucherDisplay::NotRequested,
            VoucherStatus::Requesting if self.is_stalled(now, stall_after) => {
                VoucherDisplay::Stalled {
                    since: self.requested_at.unwrap_or(now),
                }
            }
            VoucherStatus::Requesting => VoucherDisplay::Requesting,
            VoucherStatus::Issued => VoucherDisplay::Issued,
            VoucherStatus::Failed => VoucherDisplay::Failed {
                reason: self
                    .last_failure
                    .clone()
                    .unwrap_or(FailureReason::Refused),
            },
        }
    }
}

impl Default for VoucherState {
    fn default() -> Self {
        Self::new()
    }
}

/// Voucher box status as the page shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoucherDisplay {
    /// Preview page, no voucher box
    Hidden,
    NotRequested,
    Requesting,
    Stalled { since: DateTime<Utc> },
    Issued,
    Failed { reason: FailureReason },
}

impl VoucherDisplay {
    pub fn message(&self) -> String {
        match self {
            Self::Hidden => String::new(),
            Self::NotRequested => "Click \"Complete Task\" to receive your voucher code.".to_string(),
            Self::Requesting => "Requesting your voucher code...".to_string(),
            Self::Stalled { .. } => {
                "The voucher request is taking longer than expected. If no code appears, \
                 reload the page or email the requester."
                    .to_string()
            }
            Self::Issued => {
                "Please copy the voucher code and use it to complete the HIT.".to_string()
            }
            Self::Failed { reason } => format!(
                "No voucher code was issued ({}). Click \"Complete Task\" to try again.",
                reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AssignmentId, SubmitTarget};

    fn accepted() -> AssignmentContext {
        AssignmentContext::new("W1", AssignmentId::Accepted("A1".into()), "H1", SubmitTarget::Sandbox)
    }

    fn code(s: &str) -> VoucherCode {
        VoucherCode::parse(s).unwrap()
    }

    #[test]
    fn test_response_body_parsing() {
        assert_eq!(
            IssuanceOutcome::from_response_body("0"),
            IssuanceOutcome::Failed(FailureReason::Refused)
        );
        assert_eq!(
            IssuanceOutcome::from_response_body(" 0\n"),
            IssuanceOutcome::Failed(FailureReason::Refused)
        );
        assert_eq!(
            IssuanceOutcome::from_response_body(""),
            IssuanceOutcome::Failed(FailureReason::Refused)
        );
        assert_eq!(
            IssuanceOutcome::from_response_body("AB12CD34EF56\n"),
            IssuanceOutcome::Issued(code("AB12CD34EF56"))
        );
    }

    #[test]
    fn test_code_redacted_in_debug() {
        let c = code("SECRET123");
        assert!(!format!("{:?}", c).contains("SECRET123"));
        assert_eq!(c.expose(), "SECRET123");
    }

    #[test]
    fn test_preview_is_suppressed() {
        let mut state = VoucherState::new();
        assert_eq!(state.begin(&AssignmentContext::empty()), BeginOutcome::Suppressed);
        assert_eq!(state.status(), VoucherStatus::NotRequested);
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn test_single_flight_while_requesting() {
        let mut state = VoucherState::new();
        let ctx = accepted();

        assert_eq!(state.begin(&ctx), BeginOutcome::Start { attempt: 1 });
        assert_eq!(state.begin(&ctx), BeginOutcome::Pending);
        assert_eq!(state.begin(&ctx), BeginOutcome::Pending);
        assert_eq!(state.attempts(), 1);

        assert!(state.resolve(1, IssuanceOutcome::Issued(code("XYZ"))));
        assert_eq!(state.begin(&ctx), BeginOutcome::Cached(code("XYZ")));
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_refused_then_manual_retry() {
        let mut state = VoucherState::new();
        let ctx = accepted();

        let BeginOutcome::Start { attempt } = state.begin(&ctx) else {
            panic!("expected start");
        };
        state.resolve(attempt, IssuanceOutcome::from_response_body("0"));
        assert_eq!(state.status(), VoucherStatus::Failed);
        assert!(state.code().is_none());
        assert_eq!(state.last_failure(), Some(&FailureReason::Refused));

        assert_eq!(state.begin(&ctx), BeginOutcome::Start { attempt: 2 });
        state.resolve(2, IssuanceOutcome::Issued(code("OK1")));
        assert_eq!(state.status(), VoucherStatus::Issued);
        assert!(state.last_failure().is_none());
    }

    #[test]
    fn test_stale_response_ignored() {
        let mut state = VoucherState::new();
        let ctx = accepted();

        state.begin(&ctx);
        state.resolve(1, IssuanceOutcome::transport("connection reset"));
        state.begin(&ctx);

        // Late answer for attempt 1 arrives while attempt 2 is in flight
        assert!(!state.resolve(1, IssuanceOutcome::Issued(code("LATE"))));
        assert_eq!(state.status(), VoucherStatus::Requesting);

        assert!(state.resolve(2, IssuanceOutcome::Issued(code("FRESH"))));
        assert!(!state.resolve(2, IssuanceOutcome::Issued(code("DUPLICATE"))));
        assert_eq!(state.code().map(|c| c.expose()), Some("FRESH"));
    }

    #[test]
    fn test_stall_detection() {
        let mut state = VoucherState::new();
        let t0 = Utc::now();
        state.begin_at(&accepted(), t0);

        let stall_after = Duration::from_secs(30);
        assert!(!state.is_stalled(t0 + chrono::Duration::seconds(29), stall_after));
        assert!(state.is_stalled(t0 + chrono::Duration::seconds(30), stall_after));
        assert!(matches!(
            state.display(t0 + chrono::Duration::seconds(31), stall_after),
            VoucherDisplay::Stalled { .. }
        ));
        assert_eq!(
            state.display(t0 + chrono::Duration::seconds(1), stall_after),
            VoucherDisplay::Requesting
        );
    }

    #[test]
    fn test_failed_display_mentions_retry() {
        let mut state = VoucherState::new();
        state.begin(&accepted());
        state.resolve(1, IssuanceOutcome::transport("timeout"));
        let msg = state.display(Utc::now(), Duration::from_secs(30)).message();
        assert!(msg.contains("try again"));
        assert!(msg.contains("timeout"));
    }
}
