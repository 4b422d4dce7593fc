use crate::domain::money::Amount;
use crate::domain::ports::{Clock, Page, TransactionFilter, TransactionStore, UserStore};
use crate::domain::transaction::{PaymentMethod, Transaction, TransactionId, TransactionStatus, TransactionType};
use crate::domain::user::UserId;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const MIN_TOPUP: Decimal = dec!(10000);
pub const MAX_TOPUP: Decimal = dec!(100000000);
pub const TOPUP_STEP: Decimal = dec!(10000);
const TRANSFER_MEMO: &str = "Nap tien Shipway";
const PAYMENT_ID_ATTEMPTS: usize = 3;

/// Receiving account for bank transfers and VietQR payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BankAccount {
    pub bank_id: &'static str,
    pub bank_name: &'static str,
    pub account_no: &'static str,
    pub account_name: &'static str,
    pub branch: &'static str,
}

pub const RECEIVING_ACCOUNT: BankAccount = BankAccount {
    bank_id: "970422",
    bank_name: "MB Bank",
    account_no: "0123456789",
    account_name: "CONG TY SHIPWAY",
    branch: "Ho Chi Minh",
};

/// How the payer completes a top-up. Gateway URLs point at sandbox stubs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentInstructions {
    BankTransfer {
        bank: BankAccount,
        amount: Decimal,
        /// Memo the payer must put on the transfer.
        content: String,
        /// VietQR data string: `bank_id|account_no|account_name|amount|content|qr_only`.
        qr_payload: String,
    },
    Gateway {
        provider: PaymentMethod,
        payment_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopUpTicket {
    pub transaction_id: TransactionId,
    pub payment_id: String,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub expires_at: DateTime<Utc>,
    pub instructions: PaymentInstructions,
}

/// Checks the top-up limits: a multiple of 10,000 between 10,000 and 100,000,000.
pub fn validate_amount(amount: Decimal) -> Result<Amount> {
    if amount < MIN_TOPUP || amount > MAX_TOPUP {
        return Err(EngineError::Validation(format!(
            "Top-up amount must be between {} and {} VND",
            MIN_TOPUP, MAX_TOPUP
        )));
    }
    if !(amount % TOPUP_STEP).is_zero() {
        return Err(EngineError::Validation(format!(
            "Top-up amount must be a multiple of {} VND",
            TOPUP_STEP
        )));
    }
    Amount::new(amount)
}

/// `SW` + UTC timestamp + 8 random uppercase hex digits.
pub fn generate_payment_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("SW{}{}", now.format("%Y%m%d%H%M%S"), random)
}

fn instructions(method: PaymentMethod, payment_id: &str, amount: Decimal) -> PaymentInstructions {
    let amount = amount.normalize();
    match method {
        PaymentMethod::Qr | PaymentMethod::BankTransfer => {
            let content = format!("{} {}", TRANSFER_MEMO, payment_id);
            let qr_payload = format!(
                "{}|{}|{}|{}|{}|qr_only",
                RECEIVING_ACCOUNT.bank_id,
                RECEIVING_ACCOUNT.account_no,
                RECEIVING_ACCOUNT.account_name,
                amount,
                content
            );
            PaymentInstructions::BankTransfer {
                bank: RECEIVING_ACCOUNT,
                amount,
                content,
                qr_payload,
            }
        }
        PaymentMethod::Momo => PaymentInstructions::Gateway {
            provider: method,
            payment_url: format!(
                "https://test-payment.momo.vn/v2/gateway/pay?partnerCode=SHIPWAY&orderId={}&amount={}",
                payment_id, amount
            ),
        },
        PaymentMethod::Vnpay => PaymentInstructions::Gateway {
            provider: method,
            payment_url: format!(
                "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?vnp_TmnCode=SHIPWAY&vnp_TxnRef={}&vnp_Amount={}",
                payment_id,
                amount * dec!(100)
            ),
        },
    }
}

/// Opens pending top-ups and closes the ones nobody paid for.
#[derive(Clone)]
pub struct TopUpService {
    users: Arc<dyn UserStore>,
    transactions: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl TopUpService {
    pub fn new(
        users: Arc<dyn UserStore>,
        transactions: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
    ) -> Self {
        Self {
            users,
            transactions,
            clock,
            window,
        }
    }

    pub async fn request_top_up(
        &self,
        user_id: UserId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<TopUpTicket> {
        let amount = validate_amount(amount)?;
        if self.users.get(user_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("user {}", user_id)));
        }

        let now = self.clock.now();
        let expires_at = now + self.window;
        for _ in 0..PAYMENT_ID_ATTEMPTS {
            let payment_id = generate_payment_id(now);
            let tx = Transaction::pending_topup(user_id, amount, method, payment_id.clone(), expires_at, now);
            let transaction_id = tx.id;
            match self.transactions.insert(tx).await {
                Ok(()) => {
                    info!(user_id = %user_id, payment_id = %payment_id, amount = %amount, method = %method, "Top-up requested");
                    return Ok(TopUpTicket {
                        transaction_id,
                        instructions: instructions(method, &payment_id, amount.value()),
                        payment_id,
                        amount,
                        method,
                        expires_at,
                    });
                }
                Err(EngineError::Conflict(_)) => {
                    warn!(payment_id = %payment_id, "Payment id collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::Conflict(
            "could not allocate a unique payment id".to_string(),
        ))
    }

    /// Cancels pending top-ups whose payment window has elapsed.
    pub async fn expire_stale(&self) -> Result<usize> {
        let now = self.clock.now();
        let filter = TransactionFilter {
            user_id: None,
            r#type: Some(TransactionType::Topup),
            status: Some(TransactionStatus::Pending),
        };
        let (pending, _) = self.transactions.list(&filter, Page::new(0, usize::MAX)).await?;
        let mut expired = 0;
        for tx in pending.iter().filter(|tx| tx.is_payment_window_elapsed(now)) {
            match self
                .transactions
                .finalize(tx.id, TransactionStatus::Cancelled, None, now)
                .await
            {
                Ok(_) => expired += 1,
                // Settled by a webhook in the meantime.
                Err(EngineError::AlreadyProcessed(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "Stale top-ups cancelled");
        }
        Ok(expired)
    }
}
