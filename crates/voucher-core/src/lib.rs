//! # voucher-core
//!
//! Deterministic half of the MTurk task-completion handshake.
//!
//! A task page hosted inside a HIT must work out, from optional query
//! parameters, whether the worker is previewing, working in the sandbox, or
//! working in production; obtain exactly one voucher code per assignment;
//! and post that code back to the right externalSubmit endpoint.
//!
//! ## Key Guarantees
//!
//! 1. **Never fails on input**: missing or garbled parameters degrade to Preview
//! 2. **No I/O**: issuance lives in `voucher-runtime`
//! 3. **Single flight**: [`VoucherState::begin`] authorises at most one
//!    outstanding request per page
//! 4. **No malformed completions**: [`SubmissionBuilder::completion_form`]
//!    refuses previews, unresolved endpoints and blank codes
//!
//! ## Example
//!
//! ```rust,ignore
//! use voucher_core::{AppState, BeginOutcome, IssuanceOutcome, PageConfig};
//!
//! let config = PageConfig::from_file("page.yaml")?;
//! let mut app = AppState::from_url(page_url);
//!
//! if let BeginOutcome::Start { attempt } = app.voucher.begin(&app.context) {
//!     let body = post_to_issuance_service(&app.context).await;
//!     app.voucher.resolve(attempt, IssuanceOutcome::from_response_body(&body));
//! }
//!
//! let form = app.completion_form(&config.submission_builder()?, None)?;
//! ```

pub mod classifier;
pub mod config;
pub mod context;
pub mod page;
pub mod params;
pub mod question;
pub mod review;
pub mod submission;
pub mod voucher;

// Re-export main types at crate root
pub use classifier::{
    classify, Classification, LifecycleState, StateClassifier, PRODUCTION_SUBMIT_URL,
    SANDBOX_SUBMIT_URL,
};
pub use config::{ConfigError, PageConfig};
pub use context::{
    AssignmentContext, AssignmentId, IsLive, SubmitTarget, PREVIEW_ASSIGNMENT_ID,
    PRODUCTION_HOST, SANDBOX_HOST,
};
pub use page::{AppState, RenderDecision};
pub use params::{extract_from_url, ParameterExtractor, RawParameters};
pub use question::{external_question_xml, requester_endpoint, HitConfig};
pub use review::{
    hash_voucher_code, review, HashMatch, ReviewError, ReviewOutcome, SubmittedAnswer,
    VoucherRecord, VoucherRecordStatus,
};
pub use submission::{CompletionForm, SubmissionBuilder, SubmissionError, VOUCHER_FIELD};
pub use voucher::{
    BeginOutcome, FailureReason, IssuanceOutcome, VoucherCode, VoucherDisplay, VoucherState,
    VoucherStatus, REFUSED_SENTINEL,
};
