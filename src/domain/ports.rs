use super::order::{Order, OrderFilter, OrderId, OrderMutation};
use super::otc::{AttemptOutcome, OtcPurpose, OtcRecord};
use super::transaction::{Settlement, Transaction, TransactionId, TransactionStatus, TransactionType};
use super::user::{User, UserId, Wallet, WalletChange};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Offset pagination. `limit` is clamped by the callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 20 }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub user_id: Option<UserId>,
    pub r#type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.user_id.is_none_or(|id| tx.user_id == id)
            && self.r#type.is_none_or(|t| tx.r#type == t)
            && self.status.is_none_or(|s| tx.status == s)
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the phone is already registered.
    async fn insert(&self, user: User) -> Result<()>;
    async fn get(&self, id: UserId) -> Result<Option<User>>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>>;
    async fn all(&self) -> Result<Vec<User>>;
    async fn set_password(&self, id: UserId, password_hash: String, now: DateTime<Utc>) -> Result<()>;
    /// Atomic read-modify-write of the wallet. Returns the wallet after the change.
    async fn apply_wallet(&self, id: UserId, change: WalletChange, now: DateTime<Utc>) -> Result<Wallet>;
}

#[async_trait]
pub trait OtcStore: Send + Sync {
    /// Drops every record for the record's (phone, purpose) key, then stores it.
    async fn replace(&self, record: OtcRecord) -> Result<()>;
    /// Newest unused record for the key, expired or not.
    async fn find_active(&self, phone: &str, purpose: OtcPurpose) -> Result<Option<OtcRecord>>;
    /// Runs `OtcRecord::attempt` atomically against the stored record.
    async fn attempt(
        &self,
        id: Uuid,
        code: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    /// Returns how many records were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `Conflict` when the tracking code is taken.
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Order>>;
    /// Newest first, with the total number of matches.
    async fn query(&self, filter: &OrderFilter, page: Page) -> Result<(Vec<Order>, usize)>;
    /// Applies `Order::apply` atomically. `NotFound` when the order is missing.
    async fn apply(&self, id: OrderId, mutation: OrderMutation, now: DateTime<Utc>) -> Result<Order>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `Conflict` when the payment id is taken.
    async fn insert(&self, tx: Transaction) -> Result<()>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;
    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>>;
    /// Applies `Transaction::finalize` atomically.
    async fn finalize(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        settlement: Option<Settlement>,
        now: DateTime<Utc>,
    ) -> Result<Transaction>;
    /// Newest first, with the total number of matches.
    async fn list(&self, filter: &TransactionFilter, page: Page) -> Result<(Vec<Transaction>, usize)>;
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Atomically increments the counter for `key` and returns the new value, starting at 1.
    async fn next(&self, key: &str) -> Result<u64>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Outbound text channel used to deliver one-time codes.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_text(&self, phone: &str, message: &str) -> Result<()>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the path it can be served from.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Every persistence port the engine needs, usually backed by one store.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub otcs: Arc<dyn OtcStore>,
    pub orders: Arc<dyn OrderStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub sequences: Arc<dyn SequenceStore>,
}

impl Stores {
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: UserStore + OtcStore + OrderStore + TransactionStore + SequenceStore + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            users: backend.clone(),
            otcs: backend.clone(),
            orders: backend.clone(),
            transactions: backend.clone(),
            sequences: backend,
        }
    }
}
