//! Voucher review: matching what a worker submitted to the platform against
//! the issued voucher records, and redeeming matching vouchers once.
//!
//! Records never hold the code itself, only its SHA-512 hex digest.
//!
//! Answers are read with a pattern match, not an XML parser: each
//! `<Answer>` must hold a `<QuestionIdentifier>` followed by a `<FreeText>`
//! (whitespace between elements is fine). Other answer kinds, attributes on
//! these elements, CDATA sections and namespace prefixes are not recognised.
//! Named and numeric character references in values are decoded.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::voucher::VoucherCode;

lazy_static! {
    // One <Answer> element of a QuestionFormAnswers document
    static ref ANSWER_PATTERN: Regex = Regex::new(
        r"(?s)<Answer>\s*<QuestionIdentifier>(.*?)</QuestionIdentifier>\s*(?:<FreeText>(.*?)</FreeText>|<FreeText\s*/>)\s*</Answer>"
    ).unwrap();

    // Named or numeric character reference
    static ref ENTITY_PATTERN: Regex = Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-z]+);").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("Answer document contains no answers")]
    MalformedAnswer,

    #[error("Answer document has no usable '{0}' answer")]
    MissingAnswer(&'static str),

    #[error("Voucher {0} was already redeemed")]
    AlreadyRedeemed(u64),

    #[error("Voucher {0} has expired")]
    Expired(u64),
}

/// Stored lifecycle of an issued voucher. Persisted as 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum VoucherRecordStatus {
    /// Not redeemed, not expired
    Valid,
    Redeemed,
    Expired,
}

impl From<VoucherRecordStatus> for u8 {
    fn from(status: VoucherRecordStatus) -> Self {
        match status {
            VoucherRecordStatus::Valid => 0,
            VoucherRecordStatus::Redeemed => 1,
            VoucherRecordStatus::Expired => 2,
        }
    }
}

impl TryFrom<u8> for VoucherRecordStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Valid),
            1 => Ok(Self::Redeemed),
            2 => Ok(Self::Expired),
            other => Err(format!("unknown voucher status code {}", other)),
        }
    }
}

/// One row of the voucher store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRecord {
    pub voucher_id: u64,
    pub worker_id: String,
    pub assignment_id: String,

    /// Lowercase hex SHA-512 of the code
    pub voucher_hash: String,

    pub status: VoucherRecordStatus,

    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl VoucherRecord {
    /// Mark the voucher redeemed. Only a valid voucher can be redeemed.
    pub fn redeem(&mut self) -> Result<(), ReviewError> {
        match self.status {
            VoucherRecordStatus::Valid => {
                self.status = VoucherRecordStatus::Redeemed;
                Ok(())
            }
            VoucherRecordStatus::Redeemed => Err(ReviewError::AlreadyRedeemed(self.voucher_id)),
            VoucherRecordStatus::Expired => Err(ReviewError::Expired(self.voucher_id)),
        }
    }
}

/// Lowercase hex SHA-512 digest of a voucher code.
pub fn hash_voucher_code(code: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The identity and code a worker submitted with their assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAnswer {
    pub worker_id: String,
    pub voucher_code: VoucherCode,
}

impl SubmittedAnswer {
    /// Parse the platform's QuestionFormAnswers XML.
    pub fn from_answer_xml(xml: &str) -> Result<Self, ReviewError> {
        let mut worker_id = None;
        let mut voucher_code = None;
        let mut seen_any = false;

        for caps in ANSWER_PATTERN.captures_iter(xml) {
            seen_any = true;
            let value = caps.get(2).map(|m| unescape_xml(m.as_str())).unwrap_or_default();
            match caps[1].trim() {
                "workerId" => worker_id = Some(value),
                "voucherCode" => voucher_code = Some(value),
                _ => {}
            }
        }

        if !seen_any {
            return Err(ReviewError::MalformedAnswer);
        }

        let worker_id = worker_id
            .filter(|w| !w.trim().is_empty())
            .ok_or(ReviewError::MissingAnswer("workerId"))?;
        let voucher_code = voucher_code
            .as_deref()
            .and_then(VoucherCode::parse)
            .ok_or(ReviewError::MissingAnswer("voucherCode"))?;

        Ok(Self {
            worker_id: worker_id.trim().to_string(),
            voucher_code,
        })
    }
}

fn unescape_xml(text: &str) -> String {
    ENTITY_PATTERN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(|dec| dec.parse::<u32>()))
                    .and_then(|n| n.ok())
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// How the submitted code compares to the stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMatch {
    Match,
    Mismatch,
    /// No record for this worker and assignment
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    pub assignment_id: String,
    pub worker_id: String,
    pub verdict: HashMatch,
    pub record_status: Option<VoucherRecordStatus>,
    pub voucher_id: Option<u64>,

    /// Matching, still-valid voucher: safe to redeem
    pub redeem: bool,
}

/// Review one submitted assignment against the voucher records.
///
/// Only records for the same worker and assignment are considered. If
/// several exist, the first one is used.
pub fn review(records: &[VoucherRecord], assignment_id: &str, answer: &SubmittedAnswer) -> ReviewOutcome {
    let mut candidates = records
        .iter()
        .filter(|r| r.worker_id == answer.worker_id && r.assignment_id == assignment_id);

    let Some(record) = candidates.next() else {
        tracing::warn!(assignment_id, "No voucher entry for worker and assignment");
        return ReviewOutcome {
            assignment_id: assignment_id.to_string(),
            worker_id: answer.worker_id.clone(),
            verdict: HashMatch::Unknown,
            record_status: None,
            voucher_id: None,
            redeem: false,
        };
    };

    let extra = candidates.count();
    if extra > 0 {
        tracing::warn!(
            assignment_id,
            ignored = extra,
            "More than one voucher entry for worker and assignment; using the first"
        );
    }

    let submitted_hash = hash_voucher_code(answer.voucher_code.expose());
    let verdict = if submitted_hash.eq_ignore_ascii_case(&record.voucher_hash) {
        HashMatch::Match
    } else {
        HashMatch::Mismatch
    };

    ReviewOutcome {
        assignment_id: assignment_id.to_string(),
        worker_id: answer.worker_id.clone(),
        verdict,
        record_status: Some(record.status),
        voucher_id: Some(record.voucher_id),
        redeem: verdict == HashMatch::Match && record.status == VoucherRecordStatus::Valid,
    }
}
