use crate::config::EngineConfig;
use crate::domain::otc::{AttemptOutcome, CODE_LENGTH, OtcPurpose, OtcRecord, validate_code, validate_phone};
use crate::domain::ports::{Clock, NotificationGateway, OtcStore};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened when the code was handed to the notification gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedOtc {
    pub phone: String,
    pub purpose: OtcPurpose,
    pub expires_at: DateTime<Utc>,
    /// Only populated outside production.
    pub code: Option<String>,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtcVerification {
    pub success: bool,
    pub message: String,
    pub remaining_attempts: u32,
}

/// Issues and checks one-time codes bound to a (phone, purpose) key.
#[derive(Clone)]
pub struct OtcGate {
    otcs: Arc<dyn OtcStore>,
    notifier: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_attempts: u32,
    expose_code: bool,
}

fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", n, width = CODE_LENGTH)
}

impl OtcGate {
    pub fn new(
        otcs: Arc<dyn OtcStore>,
        notifier: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            otcs,
            notifier,
            clock,
            ttl: config.otp_ttl,
            max_attempts: config.otp_max_attempts,
            expose_code: !config.environment.is_production(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Replaces any outstanding code for the key and dispatches a fresh one.
    ///
    /// A delivery failure does not fail issuance; it is reported in
    /// `IssuedOtc::delivery`.
    pub async fn issue(&self, phone: &str, purpose: OtcPurpose) -> Result<IssuedOtc> {
        validate_phone(phone)?;
        let now = self.clock.now();
        let record = OtcRecord::new(phone, purpose, generate_code(), now, self.ttl);
        let expires_at = record.expires_at;
        let code = record.code.clone();

        self.otcs.replace(record).await?;
        info!(phone = %phone, purpose = %purpose, %expires_at, "OTC issued");

        let message = format!(
            "Your Shipway verification code is {}. It expires in {} minutes.",
            code,
            self.ttl.num_minutes()
        );
        let delivery = match self.notifier.send_text(phone, &message).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                warn!(phone = %phone, purpose = %purpose, error = %e, "OTC delivery failed");
                Delivery::Failed(e.to_string())
            }
        };

        Ok(IssuedOtc {
            phone: phone.to_string(),
            purpose,
            expires_at,
            code: self.expose_code.then_some(code),
            delivery,
        })
    }

    pub async fn verify(&self, phone: &str, purpose: OtcPurpose, code: &str) -> Result<OtcVerification> {
        validate_code(code)?;
        let record = self
            .otcs
            .find_active(phone, purpose)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("no active {} code for {}", purpose, phone)))?;

        let now = self.clock.now();
        match self.otcs.attempt(record.id, code, self.max_attempts, now).await? {
            AttemptOutcome::Accepted => {
                info!(phone = %phone, purpose = %purpose, "OTC verified");
                Ok(OtcVerification {
                    success: true,
                    message: "Verification successful".to_string(),
                    remaining_attempts: self.max_attempts.saturating_sub(record.attempts),
                })
            }
            AttemptOutcome::Rejected { attempts } => {
                let remaining = self.max_attempts.saturating_sub(attempts);
                info!(phone = %phone, purpose = %purpose, remaining, "OTC rejected");
                Ok(OtcVerification {
                    success: false,
                    message: format!("Incorrect code, {} attempts left", remaining),
                    remaining_attempts: remaining,
                })
            }
            AttemptOutcome::Exhausted => self.exhausted(&record).await,
            AttemptOutcome::Expired => {
                self.otcs.delete(record.id).await?;
                info!(phone = %phone, purpose = %purpose, "OTC expired");
                Err(EngineError::Expired(
                    "The code has expired, request a new one".to_string(),
                ))
            }
            AttemptOutcome::Missing => Err(EngineError::NotFound(format!(
                "no active {} code for {}",
                purpose, phone
            ))),
        }
    }

    async fn exhausted(&self, record: &OtcRecord) -> Result<OtcVerification> {
        self.otcs.delete(record.id).await?;
        warn!(phone = %record.phone, purpose = %record.purpose, "OTC attempts exhausted");
        Err(EngineError::RateLimited(
            "Too many wrong attempts, request a new code".to_string(),
        ))
    }

    /// Deletes every expired record. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self.otcs.purge_expired(self.clock.now()).await?;
        if removed > 0 {
            info!(removed, "Expired OTC records purged");
        }
        Ok(removed)
    }
}
