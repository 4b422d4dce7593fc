use crate::domain::money::{Amount, Balance};
use crate::domain::order::OrderId;
use crate::domain::ports::{Clock, Page, TransactionFilter, TransactionStore, UserStore};
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType, ledger_balance};
use crate::domain::user::{UserId, Wallet, WalletChange};
use crate::error::{EngineError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

const RECENT_TRANSACTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletInfo {
    pub user_id: UserId,
    pub balance: Balance,
    pub total_topup: Balance,
    pub total_usage: Balance,
    pub total_refund: Balance,
    pub pending_topups: usize,
    pub recent_transactions: Vec<Transaction>,
}

/// Cached wallet compared with the sum of completed ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerAudit {
    pub user_id: UserId,
    pub phone: String,
    pub wallet: Wallet,
    pub ledger_balance: Balance,
    pub consistent: bool,
}

/// The only writer of wallet fields.
///
/// Each balance change is one atomic store update; the matching ledger entry
/// is written right after it.
#[derive(Clone)]
pub struct WalletLedger {
    users: Arc<dyn UserStore>,
    transactions: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
}

impl WalletLedger {
    pub fn new(
        users: Arc<dyn UserStore>,
        transactions: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            transactions,
            clock,
        }
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(self.wallet(user_id).await?.balance)
    }

    async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.users
            .get(user_id)
            .await?
            .map(|u| u.wallet)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))
    }

    /// Spends `amount`. Fails with `InsufficientFunds`, changing nothing,
    /// when the balance cannot cover it.
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Amount,
        order_id: Option<OrderId>,
        description: impl Into<String>,
    ) -> Result<Wallet> {
        let now = self.clock.now();
        let wallet = self
            .users
            .apply_wallet(user_id, WalletChange::Debit(amount), now)
            .await?;
        let tx = Transaction::settled(user_id, amount, TransactionType::Usage, order_id, description, now);
        self.record(tx).await?;
        info!(user_id = %user_id, amount = %amount, balance = %wallet.balance, "Wallet debited");
        Ok(wallet)
    }

    /// Adds settled top-up funds. The caller owns the completed `topup`
    /// transaction that backs this credit.
    pub async fn credit(&self, user_id: UserId, amount: Amount) -> Result<Wallet> {
        let wallet = self
            .users
            .apply_wallet(user_id, WalletChange::Topup(amount), self.clock.now())
            .await?;
        info!(user_id = %user_id, amount = %amount, balance = %wallet.balance, "Wallet credited");
        Ok(wallet)
    }

    /// Returns money for a cancelled order. Counted in `total_refund`, never
    /// in `total_topup`.
    pub async fn refund(
        &self,
        user_id: UserId,
        amount: Amount,
        order_id: OrderId,
        description: impl Into<String>,
    ) -> Result<Wallet> {
        let now = self.clock.now();
        let wallet = self
            .users
            .apply_wallet(user_id, WalletChange::Refund(amount), now)
            .await?;
        let tx = Transaction::settled(
            user_id,
            amount,
            TransactionType::Refund,
            Some(order_id),
            description,
            now,
        );
        self.record(tx).await?;
        info!(user_id = %user_id, order_id = %order_id, amount = %amount, balance = %wallet.balance, "Wallet refunded");
        Ok(wallet)
    }

    async fn record(&self, tx: Transaction) -> Result<()> {
        let (user_id, tx_id) = (tx.user_id, tx.id);
        if let Err(e) = self.transactions.insert(tx).await {
            error!(user_id = %user_id, transaction_id = %tx_id, error = %e, "Wallet changed but ledger entry was not written");
            return Err(e);
        }
        Ok(())
    }

    pub async fn wallet_info(&self, user_id: UserId) -> Result<WalletInfo> {
        let wallet = self.wallet(user_id).await?;
        let (recent_transactions, _) = self
            .transactions
            .list(
                &TransactionFilter {
                    user_id: Some(user_id),
                    ..Default::default()
                },
                Page::new(0, RECENT_TRANSACTIONS),
            )
            .await?;
        let (_, pending_topups) = self
            .transactions
            .list(
                &TransactionFilter {
                    user_id: Some(user_id),
                    r#type: Some(TransactionType::Topup),
                    status: Some(TransactionStatus::Pending),
                },
                Page::new(0, 0),
            )
            .await?;

        Ok(WalletInfo {
            user_id,
            balance: wallet.balance,
            total_topup: wallet.total_topup,
            total_usage: wallet.total_usage,
            total_refund: wallet.total_refund,
            pending_topups,
            recent_transactions,
        })
    }

    /// Newest first. `limit` is capped at 100.
    pub async fn history(
        &self,
        user_id: UserId,
        r#type: Option<TransactionType>,
        page: Page,
    ) -> Result<(Vec<Transaction>, usize)> {
        let filter = TransactionFilter {
            user_id: Some(user_id),
            r#type,
            status: None,
        };
        self.transactions
            .list(&filter, Page::new(page.skip, page.limit.min(100)))
            .await
    }

    pub async fn audit(&self, user_id: UserId) -> Result<LedgerAudit> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))?;
        let (entries, _) = self
            .transactions
            .list(
                &TransactionFilter {
                    user_id: Some(user_id),
                    ..Default::default()
                },
                Page::new(0, usize::MAX),
            )
            .await?;
        let ledger = ledger_balance(&entries);
        Ok(LedgerAudit {
            user_id,
            phone: user.phone,
            consistent: user.wallet.balance == ledger && user.wallet.is_consistent(),
            wallet: user.wallet,
            ledger_balance: ledger,
        })
    }

    pub async fn audit_all(&self) -> Result<Vec<LedgerAudit>> {
        let mut users = self.users.all().await?;
        users.sort_by(|a, b| a.phone.cmp(&b.phone));
        let mut audits = Vec::with_capacity(users.len());
        for user in users {
            audits.push(self.audit(user.id).await?);
        }
        Ok(audits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Stores;
    use crate::domain::user::{Role, User};
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::in_memory::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn ledger_with_user() -> (WalletLedger, UserId) {
        let stores = Stores::from_backend(InMemoryStore::new());
        let user = User::new("0912345678", "An", "hash", Role::User, Utc::now());
        let id = user.id;
        stores.users.insert(user).await.unwrap();
        (
            WalletLedger::new(stores.users, stores.transactions, Arc::new(SystemClock)),
            id,
        )
    }

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    /// Stands in for a settled top-up: completed entry plus credit.
    async fn fund(ledger: &WalletLedger, user_id: UserId, v: rust_decimal::Decimal) {
        let tx = Transaction::settled(user_id, amount(v), TransactionType::Topup, None, "Top-up", Utc::now());
        ledger.transactions.insert(tx).await.unwrap();
        ledger.credit(user_id, amount(v)).await.unwrap();
    }

    #[tokio::test]
    async fn test_debit_and_refund_keep_ledger_in_sync() {
        let (ledger, user_id) = ledger_with_user().await;
        fund(&ledger, user_id, dec!(600000)).await;

        let order_id = Uuid::new_v4();
        ledger
            .debit(user_id, amount(dec!(546000)), Some(order_id), "Order SW20240115001")
            .await
            .unwrap();
        let wallet = ledger
            .refund(user_id, amount(dec!(546000)), order_id, "Refund SW20240115001")
            .await
            .unwrap();

        assert_eq!(wallet.balance, Balance::new(dec!(600000)));
        assert_eq!(wallet.total_topup, Balance::new(dec!(600000)));
        assert_eq!(wallet.total_refund, Balance::new(dec!(546000)));

        let audit = ledger.audit(user_id).await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.ledger_balance, Balance::new(dec!(600000)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_writes_nothing() {
        let (ledger, user_id) = ledger_with_user().await;
        fund(&ledger, user_id, dec!(10000)).await;

        let err = ledger
            .debit(user_id, amount(dec!(20000)), None, "too much")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        let (history, total) = ledger.history(user_id, None, Page::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(history[0].r#type, TransactionType::Topup);
        assert_eq!(ledger.balance(user_id).await.unwrap(), Balance::new(dec!(10000)));
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() {
        let (ledger, user_id) = ledger_with_user().await;
        fund(&ledger, user_id, dec!(100000)).await;

        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(user_id, amount(dec!(10000)), None, "race").await
            }));
        }
        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(EngineError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(ledger.balance(user_id).await.unwrap(), Balance::ZERO);
        assert!(ledger.audit(user_id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_wallet_info_summarises_recent_activity() {
        let (ledger, user_id) = ledger_with_user().await;
        fund(&ledger, user_id, dec!(100000)).await;
        for i in 0..6 {
            ledger
                .debit(user_id, amount(dec!(1000)), None, format!("debit {}", i))
                .await
                .unwrap();
        }
        let pending = Transaction::pending_topup(
            user_id,
            amount(dec!(50000)),
            crate::domain::transaction::PaymentMethod::Qr,
            "SW1",
            Utc::now(),
            Utc::now(),
        );
        ledger.transactions.insert(pending).await.unwrap();

        let info = ledger.wallet_info(user_id).await.unwrap();
        assert_eq!(info.balance, Balance::new(dec!(94000)));
        assert_eq!(info.total_usage, Balance::new(dec!(6000)));
        assert_eq!(info.pending_topups, 1);
        assert_eq!(info.recent_transactions.len(), 5);

        let (usage, total) = ledger
            .history(user_id, Some(TransactionType::Usage), Page::new(0, 4))
            .await
            .unwrap();
        assert_eq!(usage.len(), 4);
        assert_eq!(total, 6);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (ledger, _) = ledger_with_user().await;
        let err = ledger.balance(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
