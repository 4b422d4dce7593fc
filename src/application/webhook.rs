use super::wallet::WalletLedger;
use crate::config::EngineConfig;
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{Clock, TransactionStore};
use crate::domain::transaction::{Settlement, Transaction, TransactionId, TransactionStatus, TransactionType};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Success,
    Failed,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationStatus::Success => f.write_str("success"),
            NotificationStatus::Failed => f.write_str("failed"),
        }
    }
}

/// An inbound report from the payment processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub payment_id: String,
    pub status: NotificationStatus,
    pub transaction_code: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub success: bool,
    pub message: String,
    pub transaction_id: Option<TransactionId>,
    pub new_balance: Option<Balance>,
}

/// Hex HMAC-SHA256 over `payment_id|amount|status`, keyed by the shared secret.
pub fn sign_notification(
    secret: &str,
    payment_id: &str,
    amount: Amount,
    status: NotificationStatus,
) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EngineError::Config("Invalid webhook secret".to_string()))?;
    mac.update(signing_payload(payment_id, amount, status).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signing_payload(payment_id: &str, amount: Amount, status: NotificationStatus) -> String {
    format!("{}|{}|{}", payment_id, amount.value().normalize(), status)
}

/// Applies payment notifications to pending top-ups, at most once each.
#[derive(Clone)]
pub struct PaymentWebhookHandler {
    transactions: Arc<dyn TransactionStore>,
    wallet: WalletLedger,
    clock: Arc<dyn Clock>,
    secret: Option<String>,
    require_signature: bool,
}

impl PaymentWebhookHandler {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        wallet: WalletLedger,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            transactions,
            wallet,
            clock,
            secret: config.webhook_secret.clone(),
            require_signature: config.require_signature,
        }
    }

    /// Required signatures must be present and valid. An optional signature
    /// is still checked when a secret is configured.
    fn check_signature(&self, tx: &Transaction, notification: &PaymentNotification) -> Result<()> {
        let signature = match (&notification.signature, self.require_signature) {
            (Some(signature), _) => signature,
            (None, true) => {
                return Err(EngineError::Forbidden(
                    "missing webhook signature".to_string(),
                ));
            }
            (None, false) => return Ok(()),
        };
        let Some(secret) = &self.secret else {
            if self.require_signature {
                return Err(EngineError::Config(
                    "webhook secret is not configured".to_string(),
                ));
            }
            return Ok(());
        };

        let expected = sign_notification(secret, &notification.payment_id, tx.amount, notification.status)?;
        if expected
            .as_bytes()
            .ct_eq(signature.to_ascii_lowercase().as_bytes())
            .unwrap_u8()
            != 1
        {
            warn!(payment_id = %notification.payment_id, "Webhook signature mismatch");
            return Err(EngineError::Forbidden(
                "invalid webhook signature".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn verify_payment(&self, notification: PaymentNotification) -> Result<PaymentOutcome> {
        let tx = self
            .transactions
            .find_by_payment_id(&notification.payment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("payment {}", notification.payment_id)))?;

        self.check_signature(&tx, &notification)?;

        if tx.r#type != TransactionType::Topup {
            return Err(EngineError::InvalidState(format!(
                "payment {} is not a top-up",
                notification.payment_id
            )));
        }
        if tx.status.is_terminal() {
            info!(payment_id = %notification.payment_id, status = %tx.status, "Webhook replay ignored");
            return Err(EngineError::AlreadyProcessed(format!(
                "payment {} is already {}",
                notification.payment_id, tx.status
            )));
        }

        let now = self.clock.now();
        if tx.is_payment_window_elapsed(now) {
            match self
                .transactions
                .finalize(tx.id, TransactionStatus::Cancelled, None, now)
                .await
            {
                Ok(_) | Err(EngineError::AlreadyProcessed(_)) => {}
                Err(e) => return Err(e),
            }
            info!(payment_id = %notification.payment_id, "Payment window elapsed, top-up cancelled");
            return Err(EngineError::Expired(format!(
                "payment window for {} has elapsed",
                notification.payment_id
            )));
        }

        let settlement = Settlement {
            transaction_code: notification.transaction_code,
            payment_time: notification.payment_time,
        };
        match notification.status {
            NotificationStatus::Success => {
                // Finalizing first is the idempotency guard: a racing replay
                // loses here with AlreadyProcessed and never reaches the credit.
                let completed = self
                    .transactions
                    .finalize(tx.id, TransactionStatus::Completed, Some(settlement), now)
                    .await?;
                let wallet = self.wallet.credit(completed.user_id, completed.amount).await?;
                info!(
                    payment_id = %notification.payment_id,
                    user_id = %completed.user_id,
                    amount = %completed.amount,
                    "Top-up settled"
                );
                Ok(PaymentOutcome {
                    success: true,
                    message: "Payment confirmed".to_string(),
                    transaction_id: Some(completed.id),
                    new_balance: Some(wallet.balance),
                })
            }
            NotificationStatus::Failed => {
                let failed = self
                    .transactions
                    .finalize(tx.id, TransactionStatus::Failed, Some(settlement), now)
                    .await?;
                info!(payment_id = %notification.payment_id, user_id = %failed.user_id, "Top-up failed");
                Ok(PaymentOutcome {
                    success: false,
                    message: "Payment failed".to_string(),
                    transaction_id: Some(failed.id),
                    new_balance: None,
                })
            }
        }
    }
}
