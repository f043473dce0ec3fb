//! Single-flight voucher coordinator.
//!
//! The coordinator owns one page load's [`AppState`] and is the only thing
//! allowed to call the issuance backend. However many times the worker
//! triggers "complete", at most one request is outstanding; once a code is
//! issued it is served from the page state without another call.
//!
//! The state lock is never held across the issuance await, so concurrent
//! triggers observe `Requesting` and return [`EnsureOutcome::Pending`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use voucher_core::{
    AppState, AssignmentContext, BeginOutcome, CompletionForm, FailureReason, IssuanceOutcome,
    RenderDecision, SubmissionBuilder, SubmissionError, VoucherCode, VoucherState, VoucherStatus,
};

use crate::config::{RuntimeConfig, DEFAULT_STALL_AFTER};
use crate::issuance::{IssuanceRequest, IssuerRegistry, VoucherIssuer};
use crate::RuntimeError;

/// Result of one "complete" trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum EnsureOutcome {
    /// Preview page; nothing was requested
    Suppressed,
    /// Another trigger's request is still in flight
    Pending,
    #[serde(serialize_with = "serialize_redacted")]
    Issued(VoucherCode),
    Failed(FailureReason),
}

fn serialize_redacted<S>(_code: &VoucherCode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("[REDACTED]")
}

impl EnsureOutcome {
    fn from_state(voucher: &VoucherState) -> Self {
        match voucher.status() {
            VoucherStatus::Issued => match voucher.code() {
                Some(code) => EnsureOutcome::Issued(code.clone()),
                None => EnsureOutcome::Pending,
            },
            VoucherStatus::Failed => EnsureOutcome::Failed(
                voucher
                    .last_failure()
                    .cloned()
                    .unwrap_or(FailureReason::Refused),
            ),
            VoucherStatus::Requesting | VoucherStatus::NotRequested => EnsureOutcome::Pending,
        }
    }

    pub fn code(&self) -> Option<&VoucherCode> {
        match self {
            EnsureOutcome::Issued(code) => Some(code),
            _ => None,
        }
    }
}

/// Failure detail recorded when an `ensure_voucher` future is dropped mid-request.
pub const CANCELLED: &str = "cancelled";

/// One outstanding attempt. Dropping it unresolved fails the attempt, so a
/// cancelled caller does not leave the page `Requesting` forever.
struct InFlight<'a> {
    page: &'a Mutex<AppState>,
    attempt: u32,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self, outcome: IssuanceOutcome) -> EnsureOutcome {
        self.finished = true;
        let mut page = self.page.lock();
        page.voucher.resolve(self.attempt, outcome);
        EnsureOutcome::from_state(&page.voucher)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(attempt = self.attempt, "Issuance request dropped before a response");
            self.page
                .lock()
                .voucher
                .resolve(self.attempt, IssuanceOutcome::transport(CANCELLED));
        }
    }
}

/// Guards issuance for one page load.
pub struct VoucherCoordinator {
    issuer: Arc<dyn VoucherIssuer>,
    page: Mutex<AppState>,
    stall_after: Duration,
}

impl VoucherCoordinator {
    pub fn new(issuer: Arc<dyn VoucherIssuer>, page: AppState) -> Self {
        Self {
            issuer,
            page: Mutex::new(page),
            stall_after: DEFAULT_STALL_AFTER,
        }
    }

    /// Coordinator for a page URL using the configured issuer.
    pub fn from_config(config: &RuntimeConfig, page_url: &str) -> Result<Self, RuntimeError> {
        let registry = IssuerRegistry::with_defaults();
        let issuer = registry.create(
            config.issuance.kind.as_str(),
            &config.issuance.to_issuer_json(),
        )?;
        Ok(Self::new(issuer, AppState::from_url(page_url)).with_stall_after(config.stall_after))
    }

    pub fn with_stall_after(mut self, stall_after: Duration) -> Self {
        self.stall_after = stall_after;
        self
    }

    pub fn issuer(&self) -> &Arc<dyn VoucherIssuer> {
        &self.issuer
    }

    pub fn context(&self) -> AssignmentContext {
        self.page.lock().context.clone()
    }

    /// Copy of the current page state.
    pub fn snapshot(&self) -> AppState {
        self.page.lock().clone()
    }

    /// Obtain the voucher for this page, issuing at most one request.
    ///
    /// From `Failed` this starts a fresh attempt; that is the manual retry.
    pub async fn ensure_voucher(&self) -> EnsureOutcome {
        let (attempt, request) = {
            let mut page = self.page.lock();
            let AppState {
                context, voucher, ..
            } = &mut *page;

            match voucher.begin(context) {
                BeginOutcome::Suppressed => {
                    tracing::debug!("Preview page, voucher request suppressed");
                    return EnsureOutcome::Suppressed;
                }
                BeginOutcome::Pending => {
                    tracing::debug!(
                        assignment_id = %context.assignment_id(),
                        "Issuance already in flight, ignoring trigger"
                    );
                    return EnsureOutcome::Pending;
                }
                BeginOutcome::Cached(code) => return EnsureOutcome::Issued(code),
                BeginOutcome::Start { attempt } => (attempt, IssuanceRequest::from_context(context)),
            }
        };

        let in_flight = InFlight {
            page: &self.page,
            attempt,
            finished: false,
        };

        tracing::info!(
            assignment_id = %request.assignment_id,
            is_live = %request.is_live,
            attempt,
            issuer = self.issuer.name(),
            "Requesting voucher"
        );

        let outcome = match self.issuer.issue(&request).await {
            Ok(body) => IssuanceOutcome::from_response_body(&body),
            Err(e) => {
                tracing::warn!(
                    assignment_id = %request.assignment_id,
                    attempt,
                    error = %e,
                    "Voucher issuance transport failure"
                );
                IssuanceOutcome::transport(e.to_string())
            }
        };

        match &outcome {
            IssuanceOutcome::Issued(_) => tracing::info!(
                assignment_id = %request.assignment_id,
                attempt,
                "Voucher issued"
            ),
            IssuanceOutcome::Failed(FailureReason::Refused) => tracing::warn!(
                assignment_id = %request.assignment_id,
                attempt,
                "Issuance service refused to produce a voucher"
            ),
            IssuanceOutcome::Failed(FailureReason::Transport(_)) => {}
        }

        in_flight.finish(outcome)
    }

    /// Fire `clicks` triggers concurrently, as a worker hammering "complete" would.
    pub async fn trigger(&self, clicks: usize) -> Vec<EnsureOutcome> {
        futures::future::join_all((0..clicks).map(|_| self.ensure_voucher())).await
    }

    pub fn render(&self) -> RenderDecision {
        self.render_at(Utc::now())
    }

    pub fn render_at(&self, now: DateTime<Utc>) -> RenderDecision {
        self.page.lock().render(now, self.stall_after)
    }

    /// Completion form for the worker-entered code, falling back to the issued one.
    pub fn completion_form(
        &self,
        builder: &SubmissionBuilder,
        entered_code: Option<&str>,
    ) -> Result<CompletionForm, SubmissionError> {
        self.page.lock().completion_form(builder, entered_code)
    }
}

impl std::fmt::Debug for VoucherCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let page = self.page.lock();
        f.debug_struct("VoucherCoordinator")
            .field("issuer", &self.issuer.name())
            .field("state", &page.state())
            .field("voucher", &page.voucher.status())
            .field("stall_after", &self.stall_after)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::{IssuanceError, MemoryVoucherIssuer};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;
    use voucher_core::{LifecycleState, VoucherDisplay};

    const SANDBOX_PAGE: &str = "https://tasks.example.org/?assignmentId=A1&workerId=W1&hitId=H1&turkSubmitTo=https://workersandbox.mturk.com";

    fn builder() -> SubmissionBuilder {
        SubmissionBuilder::new(Url::parse("https://tasks.example.org/task").unwrap())
    }

    /// Returns scripted bodies in order; errors once the script runs out.
    struct ScriptedIssuer {
        bodies: Mutex<Vec<Result<String, IssuanceError>>>,
        calls: AtomicU32,
    }

    impl ScriptedIssuer {
        fn new(mut bodies: Vec<Result<String, IssuanceError>>) -> Self {
            bodies.reverse();
            Self {
                bodies: Mutex::new(bodies),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VoucherIssuer for ScriptedIssuer {
        async fn issue(&self, _request: &IssuanceRequest) -> Result<String, IssuanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .lock()
                .pop()
                .unwrap_or_else(|| Err(IssuanceError::HttpError("script exhausted".into())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_issue_once() {
        let issuer = Arc::new(MemoryVoucherIssuer::new().with_latency(Duration::from_millis(500)));
        let coordinator = VoucherCoordinator::new(issuer.clone(), AppState::from_url(SANDBOX_PAGE));

        let (first, second) = tokio::join!(coordinator.ensure_voucher(), coordinator.ensure_voucher());

        assert!(matches!(first, EnsureOutcome::Issued(_)));
        assert_eq!(second, EnsureOutcome::Pending);
        assert_eq!(issuer.calls(), 1);

        let third = coordinator.ensure_voucher().await;
        assert_eq!(third.code(), first.code());
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_clicks_share_one_request() {
        let issuer = Arc::new(MemoryVoucherIssuer::new().with_latency(Duration::from_millis(200)));
        let coordinator = VoucherCoordinator::new(issuer.clone(), AppState::from_url(SANDBOX_PAGE));

        let outcomes = coordinator.trigger(5).await;
        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes.iter().filter(|o| o.code().is_some()).count(), 1);
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test]
    async fn test_preview_never_calls_issuer() {
        let issuer = Arc::new(MemoryVoucherIssuer::new());
        let coordinator = VoucherCoordinator::new(
            issuer.clone(),
            AppState::from_url("https://tasks.example.org/?assignmentId=ASSIGNMENT_ID_NOT_AVAILABLE"),
        );

        for _ in 0..3 {
            assert_eq!(coordinator.ensure_voucher().await, EnsureOutcome::Suppressed);
        }
        assert_eq!(issuer.calls(), 0);
        assert_eq!(coordinator.render().voucher, VoucherDisplay::Hidden);
    }

    #[tokio::test]
    async fn test_refused_blocks_submission() {
        let issuer = Arc::new(ScriptedIssuer::new(vec![Ok("0".into())]));
        let coordinator = VoucherCoordinator::new(issuer, AppState::from_url(SANDBOX_PAGE));

        assert_eq!(
            coordinator.ensure_voucher().await,
            EnsureOutcome::Failed(FailureReason::Refused)
        );

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.voucher.status(), VoucherStatus::Failed);
        assert!(snapshot.voucher.code().is_none());
        assert_eq!(
            coordinator.completion_form(&builder(), None),
            Err(SubmissionError::MissingVoucherCode)
        );
        assert!(!coordinator.render().submit_enabled);
    }

    #[tokio::test]
    async fn test_transport_failure_then_manual_retry() {
        let issuer = Arc::new(ScriptedIssuer::new(vec![
            Err(IssuanceError::HttpError("connection reset".into())),
            Ok("VOUCHER123".into()),
        ]));
        let coordinator = VoucherCoordinator::new(issuer.clone(), AppState::from_url(SANDBOX_PAGE));

        assert!(matches!(
            coordinator.ensure_voucher().await,
            EnsureOutcome::Failed(FailureReason::Transport(_))
        ));

        let retried = coordinator.ensure_voucher().await;
        assert_eq!(retried.code().map(|c| c.expose()), Some("VOUCHER123"));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);

        let form = coordinator.completion_form(&builder(), None).unwrap();
        assert_eq!(form.field("voucherCode"), Some("VOUCHER123"));
        assert_eq!(form.action, voucher_core::SANDBOX_SUBMIT_URL);
    }

    #[tokio::test]
    async fn test_reload_recovers_same_code() {
        let issuer = Arc::new(MemoryVoucherIssuer::new());

        let first_load = VoucherCoordinator::new(issuer.clone(), AppState::from_url(SANDBOX_PAGE));
        let second_load = VoucherCoordinator::new(issuer.clone(), AppState::from_url(SANDBOX_PAGE));

        let a = first_load.ensure_voucher().await;
        let b = second_load.ensure_voucher().await;

        assert_eq!(a.code(), b.code());
        assert!(a.code().is_some());
        assert_eq!(issuer.calls(), 2);
        assert_eq!(issuer.records().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_environment_issues_but_cannot_submit() {
        let issuer = Arc::new(MemoryVoucherIssuer::new());
        let coordinator = VoucherCoordinator::new(
            issuer,
            AppState::from_url("https://tasks.example.org/?assignmentId=A1&turkSubmitTo=https://example.org"),
        );

        assert!(coordinator.ensure_voucher().await.code().is_some());
        let render = coordinator.render();
        assert_eq!(render.state, LifecycleState::AcceptedUnknown);
        assert!(render.show_accept_content);
        assert!(!render.submit_enabled);
        assert_eq!(
            coordinator.completion_form(&builder(), None),
            Err(SubmissionError::UnresolvedEnvironment)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_request_reported_as_stalled() {
        let issuer = Arc::new(MemoryVoucherIssuer::new().with_latency(Duration::from_secs(3600)));
        let coordinator = Arc::new(
            VoucherCoordinator::new(issuer, AppState::from_url(SANDBOX_PAGE))
                .with_stall_after(Duration::from_secs(5)),
        );

        let background = coordinator.clone();
        let handle = tokio::spawn(async move { background.ensure_voucher().await });
        tokio::task::yield_now().await;

        let now = Utc::now();
        assert_eq!(coordinator.render_at(now).voucher, VoucherDisplay::Requesting);
        assert!(matches!(
            coordinator.render_at(now + chrono::Duration::seconds(10)).voucher,
            VoucherDisplay::Stalled { .. }
        ));
        assert_eq!(coordinator.ensure_voucher().await, EnsureOutcome::Pending);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_fails_attempt_and_allows_retry() {
        let issuer = Arc::new(MemoryVoucherIssuer::new().with_latency(Duration::from_secs(60)));
        let coordinator = Arc::new(VoucherCoordinator::new(
            issuer.clone(),
            AppState::from_url(SANDBOX_PAGE),
        ));

        let background = coordinator.clone();
        let handle = tokio::spawn(async move { background.ensure_voucher().await });
        tokio::task::yield_now().await;
        assert_eq!(coordinator.snapshot().voucher.status(), VoucherStatus::Requesting);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.voucher.status(), VoucherStatus::Failed);
        assert_eq!(
            snapshot.voucher.last_failure(),
            Some(&FailureReason::Transport(CANCELLED.to_string()))
        );

        let retried = coordinator.ensure_voucher().await;
        assert!(retried.code().is_some());
        assert_eq!(coordinator.snapshot().voucher.attempts(), 2);
        assert_eq!(issuer.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_caller_does_not_wedge_page() {
        let issuer = Arc::new(MemoryVoucherIssuer::new().with_latency(Duration::from_secs(60)));
        let coordinator = VoucherCoordinator::new(issuer, AppState::from_url(SANDBOX_PAGE));

        let result =
            tokio::time::timeout(Duration::from_secs(1), coordinator.ensure_voucher()).await;
        assert!(result.is_err());
        assert_eq!(coordinator.snapshot().voucher.status(), VoucherStatus::Failed);
    }

    #[test]
    fn test_issued_outcome_serializes_redacted() {
        let outcome = EnsureOutcome::Issued(VoucherCode::parse("SECRETCODE").unwrap());
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("SECRETCODE"));
        assert!(json.contains("issued"));
    }

    #[test]
    fn test_from_config_uses_memory_issuer() {
        let config = RuntimeConfig::from_yaml("task_url: https://tasks.example.org/\n").unwrap();
        let coordinator = VoucherCoordinator::from_config(&config, SANDBOX_PAGE).unwrap();
        assert_eq!(coordinator.issuer().name(), "memory");
        assert_eq!(coordinator.context().assignment_id(), "A1");
    }
}
