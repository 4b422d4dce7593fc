use super::money::{Amount, Balance};
use super::order::OrderId;
use super::user::UserId;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type TransactionId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Topup,
    Usage,
    Refund,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Topup => "topup",
            TransactionType::Usage => "usage",
            TransactionType::Refund => "refund",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a ledger entry. Moves one way only: `Pending` to a terminal state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a top-up is paid for.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Qr,
    BankTransfer,
    Momo,
    Vnpay,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentMethod::Qr => "qr",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Momo => "momo",
            PaymentMethod::Vnpay => "vnpay",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qr" => Ok(PaymentMethod::Qr),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "momo" => Ok(PaymentMethod::Momo),
            "vnpay" => Ok(PaymentMethod::Vnpay),
            other => Err(EngineError::Validation(format!(
                "Payment method must be one of qr, bank_transfer, momo, vnpay (got {})",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct PaymentDetails {
    /// End of the payment window for a pending top-up.
    pub expires_at: Option<DateTime<Utc>>,
    /// Reference assigned by the bank or gateway on settlement.
    pub transaction_code: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Amount,
    pub r#type: TransactionType,
    pub status: TransactionStatus,
    pub description: Option<String>,
    /// Booking this entry paid for or refunded.
    pub order_id: Option<OrderId>,
    /// Unique when present.
    pub payment_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_details: PaymentDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// A wallet-side entry (usage or refund) that is settled at creation.
    pub fn settled(
        user_id: UserId,
        amount: Amount,
        r#type: TransactionType,
        order_id: Option<OrderId>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            r#type,
            status: TransactionStatus::Completed,
            description: Some(description.into()),
            order_id,
            payment_id: None,
            payment_method: None,
            payment_details: PaymentDetails::default(),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    /// A top-up awaiting confirmation from the payment processor.
    pub fn pending_topup(
        user_id: UserId,
        amount: Amount,
        method: PaymentMethod,
        payment_id: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            r#type: TransactionType::Topup,
            status: TransactionStatus::Pending,
            description: Some(format!("Top-up via {}", method)),
            order_id: None,
            payment_id: Some(payment_id.into()),
            payment_method: Some(method),
            payment_details: PaymentDetails {
                expires_at: Some(expires_at),
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_payment_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.payment_details
            .expires_at
            .is_some_and(|deadline| now > deadline)
    }

    /// Moves a pending entry to a terminal status.
    ///
    /// Fails with `AlreadyProcessed` once the entry is terminal, which is what
    /// makes webhook replays harmless.
    pub fn finalize(
        &mut self,
        status: TransactionStatus,
        settlement: Option<Settlement>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::AlreadyProcessed(format!(
                "transaction {} is already {}",
                self.id, self.status
            )));
        }
        if !status.is_terminal() {
            return Err(EngineError::InvalidState(
                "a transaction can only be finalized to a terminal status".to_string(),
            ));
        }
        if let Some(settlement) = settlement {
            self.payment_details.transaction_code = settlement.transaction_code;
            self.payment_details.payment_time = settlement.payment_time;
        }
        self.status = status;
        self.updated_at = now;
        if status == TransactionStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Contribution of this entry to the wallet balance.
    pub fn signed_amount(&self) -> Balance {
        let amount = Balance::from(self.amount);
        match self.r#type {
            TransactionType::Topup | TransactionType::Refund => amount,
            TransactionType::Usage => Balance::ZERO - amount,
        }
    }
}

/// Data reported by the processor when a payment settles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settlement {
    pub transaction_code: Option<String>,
    pub payment_time: Option<DateTime<Utc>>,
}

/// Sum of completed entries. Must equal the cached wallet balance.
pub fn ledger_balance<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Balance {
    transactions
        .into_iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
        .fold(Balance::ZERO, |acc, tx| acc + tx.signed_amount())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[test]
    fn test_finalize_is_one_way() {
        let now = Utc::now();
        let mut tx = Transaction::pending_topup(
            Uuid::new_v4(),
            amount(dec!(50000)),
            PaymentMethod::Momo,
            "P1",
            now,
            now,
        );
        tx.finalize(TransactionStatus::Completed, None, now).unwrap();
        assert_eq!(tx.completed_at, Some(now));

        let again = tx.finalize(TransactionStatus::Failed, None, now);
        assert!(matches!(again, Err(EngineError::AlreadyProcessed(_))));
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_finalize_rejects_pending_target() {
        let now = Utc::now();
        let mut tx = Transaction::pending_topup(
            Uuid::new_v4(),
            amount(dec!(10000)),
            PaymentMethod::Qr,
            "P2",
            now,
            now,
        );
        let result = tx.finalize(TransactionStatus::Pending, None, now);
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_ledger_balance_counts_only_completed() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let topup = Transaction::settled(user, amount(dec!(100000)), TransactionType::Topup, None, "seed", now);
        let usage = Transaction::settled(user, amount(dec!(46000)), TransactionType::Usage, None, "order", now);
        let refund = Transaction::settled(user, amount(dec!(46000)), TransactionType::Refund, None, "cancel", now);
        let pending = Transaction::pending_topup(user, amount(dec!(20000)), PaymentMethod::Vnpay, "P3", now, now);

        let sum = ledger_balance([&topup, &usage, &refund, &pending]);
        assert_eq!(sum, Balance::new(dec!(100000)));
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("bank_transfer".parse::<PaymentMethod>().unwrap(), PaymentMethod::BankTransfer);
        assert!("paypal".parse::<PaymentMethod>().is_err());
    }
}
