//! In-process issuance service.
//!
//! Honours the issuance contract without any storage: one code per
//! assignment id for the lifetime of the service, `"0"` for previews. It
//! also keeps the hashed voucher records so submitted codes can be
//! reviewed and redeemed.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voucher_core::{
    hash_voucher_code, review, ReviewError, ReviewOutcome, SubmittedAnswer, VoucherRecord,
    VoucherRecordStatus, PREVIEW_ASSIGNMENT_ID, REFUSED_SENTINEL,
};

use super::{factory::IssuerFactory, IssuanceError, IssuanceRequest, VoucherIssuer};

/// Length of generated codes.
pub const CODE_LENGTH: usize = 12;

#[derive(Default)]
struct Ledger {
    codes: HashMap<String, String>,
    records: Vec<VoucherRecord>,
}

/// Idempotent in-memory voucher issuer.
pub struct MemoryVoucherIssuer {
    ledger: Mutex<Ledger>,
    calls: AtomicU32,
    refuse: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryVoucherIssuer {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            calls: AtomicU32::new(0),
            refuse: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Answer every request with the refusal sentinel while set.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of issuance requests received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Snapshot of the voucher records.
    pub fn records(&self) -> Vec<VoucherRecord> {
        self.ledger.lock().records.clone()
    }

    /// Review a submitted answer and redeem the voucher if it is valid.
    ///
    /// A second redemption of the same voucher reports `redeem: false`.
    pub fn redeem(
        &self,
        assignment_id: &str,
        answer: &SubmittedAnswer,
    ) -> Result<ReviewOutcome, ReviewError> {
        let mut ledger = self.ledger.lock();
        let outcome = review(&ledger.records, assignment_id, answer);

        if outcome.redeem {
            if let Some(record) = ledger
                .records
                .iter_mut()
                .find(|r| Some(r.voucher_id) == outcome.voucher_id)
            {
                record.redeem()?;
                tracing::info!(voucher_id = record.voucher_id, assignment_id, "Voucher redeemed");
            }
        }

        Ok(outcome)
    }

    /// Mark the voucher for an assignment expired.
    pub fn expire(&self, assignment_id: &str) -> bool {
        let mut ledger = self.ledger.lock();
        let mut changed = false;
        for record in ledger
            .records
            .iter_mut()
            .filter(|r| r.assignment_id == assignment_id && r.status == VoucherRecordStatus::Valid)
        {
            record.status = VoucherRecordStatus::Expired;
            changed = true;
        }
        changed
    }

    fn issue_now(&self, request: &IssuanceRequest) -> String {
        let assignment_id = request.assignment_id.as_str();
        if assignment_id.is_empty() || assignment_id == PREVIEW_ASSIGNMENT_ID {
            return REFUSED_SENTINEL.to_string();
        }
        if self.refuse.load(Ordering::SeqCst) {
            return REFUSED_SENTINEL.to_string();
        }

        let mut ledger = self.ledger.lock();
        if let Some(code) = ledger.codes.get(assignment_id) {
            return code.clone();
        }

        let code = generate_code(CODE_LENGTH);
        let voucher_id = ledger.records.len() as u64 + 1;
        ledger.records.push(VoucherRecord {
            voucher_id,
            worker_id: request.worker_id.clone(),
            assignment_id: assignment_id.to_string(),
            voucher_hash: hash_voucher_code(&code),
            status: VoucherRecordStatus::Valid,
            issued_at: Some(Utc::now()),
        });
        ledger.codes.insert(assignment_id.to_string(), code.clone());
        tracing::info!(voucher_id, assignment_id, "Voucher issued");
        code
    }
}

impl Default for MemoryVoucherIssuer {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[async_trait]
impl VoucherIssuer for MemoryVoucherIssuer {
    async fn issue(&self, request: &IssuanceRequest) -> Result<String, IssuanceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.issue_now(request))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Factory for [`MemoryVoucherIssuer`].
///
/// Optional keys: `latency` (humantime) and `refuse` (bool).
pub struct MemoryIssuerFactory;

impl IssuerFactory for MemoryIssuerFactory {
    fn issuer_type(&self) -> &'static str {
        "memory"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn VoucherIssuer>, IssuanceError> {
        let mut issuer = MemoryVoucherIssuer::new();
        if let Some(latency) = config["latency"].as_str() {
            let latency = humantime::parse_duration(latency)
                .map_err(|e| IssuanceError::NotConfigured(format!("latency: {}", e)))?;
            issuer = issuer.with_latency(latency);
        }
        issuer.set_refusing(config["refuse"].as_bool().unwrap_or(false));
        Ok(Arc::new(issuer))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), IssuanceError> {
        if !config["refuse"].is_null() && !config["refuse"].is_boolean() {
            return Err(IssuanceError::NotConfigured("refuse must be a boolean".to_string()));
        }
        if let Some(latency) = config["latency"].as_str() {
            humantime::parse_duration(latency)
                .map_err(|e| IssuanceError::NotConfigured(format!("latency: {}", e)))?;
        }
        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "refuse": false })
    }

    fn description(&self) -> &'static str {
        "In-process idempotent issuer for tests and local runs"
    }
}
