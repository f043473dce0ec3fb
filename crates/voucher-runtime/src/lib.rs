//! # voucher-runtime
//!
//! Async half of the MTurk completion handshake.
//!
//! `voucher-core` decides what a page load is and what may be submitted.
//! This crate talks to the voucher issuance service and enforces the one
//! property the handshake depends on: however many times a worker clicks
//! "complete", one page load sends at most one outstanding issuance request.
//!
//! ## Example
//!
//! ```rust,ignore
//! use voucher_runtime::{RuntimeConfig, VoucherCoordinator};
//!
//! let config = RuntimeConfig::from_file("page.yaml")?;
//! let coordinator = VoucherCoordinator::from_config(&config, page_url)?;
//!
//! let outcome = coordinator.ensure_voucher().await;
//! let form = coordinator.completion_form(&config.page.submission_builder()?, None)?;
//! ```

use thiserror::Error;

pub mod config;
pub mod coordinator;
pub mod issuance;

pub use config::{IssuanceConfig, IssuerKind, RuntimeConfig, DEFAULT_STALL_AFTER};
pub use coordinator::{EnsureOutcome, VoucherCoordinator};
pub use issuance::{
    ApiCredential, CredentialSource, IssuanceError, IssuanceRequest, IssuerFactory,
    IssuerInfo, IssuerRegistry, MemoryIssuerFactory, MemoryVoucherIssuer, VoucherIssuer,
};

#[cfg(feature = "http")]
pub use issuance::{HttpIssuerFactory, HttpVoucherIssuer};

/// Errors from assembling the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] voucher_core::ConfigError),

    #[error("Issuer error: {0}")]
    Issuance(#[from] IssuanceError),

    #[error("Submission blocked: {0}")]
    Submission(#[from] voucher_core::SubmissionError),
}
