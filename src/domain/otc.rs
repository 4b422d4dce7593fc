use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OtcPurpose {
    Register,
    ResetPassword,
    VerifyPhone,
}

impl fmt::Display for OtcPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OtcPurpose::Register => "register",
            OtcPurpose::ResetPassword => "reset-password",
            OtcPurpose::VerifyPhone => "verify-phone",
        };
        f.write_str(s)
    }
}

impl FromStr for OtcPurpose {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "register" => Ok(OtcPurpose::Register),
            "reset-password" => Ok(OtcPurpose::ResetPassword),
            "verify-phone" => Ok(OtcPurpose::VerifyPhone),
            other => Err(EngineError::Validation(format!(
                "Unknown OTC purpose: {}",
                other
            ))),
        }
    }
}

/// A one-time code bound to a (phone, purpose) key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OtcRecord {
    pub id: Uuid,
    pub phone: String,
    pub purpose: OtcPurpose,
    /// Kept as a string so leading zeros survive.
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub is_used: bool,
}

/// Result of presenting a code against a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Code matched; the record is now used.
    Accepted,
    /// Code did not match; `attempts` is the count after this guess.
    Rejected { attempts: u32 },
    /// The attempt ceiling was already reached; nothing was changed.
    Exhausted,
    /// The record outlived `expires_at`; nothing was changed.
    Expired,
    /// No usable record (absent or already consumed).
    Missing,
}

impl OtcRecord {
    pub fn new(
        phone: impl Into<String>,
        purpose: OtcPurpose,
        code: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            purpose,
            code: code.into(),
            created_at: now,
            expires_at: now + ttl,
            attempts: 0,
            is_used: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn matches_key(&self, phone: &str, purpose: OtcPurpose) -> bool {
        self.phone == phone && self.purpose == purpose
    }

    /// The compare-and-update step of verification.
    ///
    /// Store backends run this inside one atomic document update so that
    /// concurrent guesses can neither exceed `max_attempts` nor reuse a code.
    pub fn attempt(&mut self, code: &str, max_attempts: u32, now: DateTime<Utc>) -> AttemptOutcome {
        if self.is_used {
            return AttemptOutcome::Missing;
        }
        if self.is_expired(now) {
            return AttemptOutcome::Expired;
        }
        if self.attempts >= max_attempts {
            return AttemptOutcome::Exhausted;
        }
        if bool::from(self.code.as_bytes().ct_eq(code.as_bytes())) {
            self.is_used = true;
            AttemptOutcome::Accepted
        } else {
            self.attempts += 1;
            AttemptOutcome::Rejected {
                attempts: self.attempts,
            }
        }
    }
}

/// Accepts an optional leading `+` followed by 9 to 15 digits, ignoring
/// spaces, dots, dashes and parentheses.
pub fn validate_phone(phone: &str) -> Result<()> {
    let body = phone.strip_prefix('+').unwrap_or(phone);
    let mut digits = 0;
    for c in body.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '.' | '-' | '(' | ')' => {}
            _ => {
                return Err(EngineError::Validation(format!(
                    "Invalid phone number: {}",
                    phone
                )));
            }
        }
    }
    if !(9..=15).contains(&digits) {
        return Err(EngineError::Validation(format!(
            "Invalid phone number: {}",
            phone
        )));
    }
    Ok(())
}

pub fn validate_code(code: &str) -> Result<()> {
    if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(EngineError::Validation(
            "OTC must be exactly 6 digits".to_string(),
        ))
    }
}
