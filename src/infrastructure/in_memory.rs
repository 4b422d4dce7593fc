use crate::domain::order::{Order, OrderFilter, OrderId, OrderMutation};
use crate::domain::otc::{AttemptOutcome, OtcPurpose, OtcRecord};
use crate::domain::ports::{
    OrderStore, OtcStore, Page, SequenceStore, TransactionFilter, TransactionStore, UserStore,
};
use crate::domain::transaction::{Settlement, Transaction, TransactionId, TransactionStatus};
use crate::domain::user::{User, UserId, Wallet, WalletChange};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory backend for every engine port.
///
/// Each collection sits behind its own `Arc<RwLock<..>>`. Conditional updates
/// take the write lock for the whole read-check-write, which is what gives them
/// single-document atomicity.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    otcs: Arc<RwLock<HashMap<Uuid, OtcRecord>>>,
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    transactions: Arc<RwLock<HashMap<TransactionId, Transaction>>>,
    sequences: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> (Vec<T>, usize) {
    let total = items.len();
    let items = items.into_iter().skip(page.skip).take(page.limit).collect();
    (items, total)
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert(&self, user: User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.phone == user.phone) {
            return Err(EngineError::Conflict(format!(
                "phone {} is already registered",
                user.phone
            )));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.phone == phone).cloned())
    }

    async fn all(&self) -> Result<Vec<User>> {
        let users = self.users.read().await;
        Ok(users.values().cloned().collect())
    }

    async fn set_password(&self, id: UserId, password_hash: String, now: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", id)))?;
        user.password_hash = password_hash;
        user.updated_at = now;
        Ok(())
    }

    async fn apply_wallet(&self, id: UserId, change: WalletChange, now: DateTime<Utc>) -> Result<Wallet> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", id)))?;
        user.wallet.apply(change)?;
        user.updated_at = now;
        Ok(user.wallet.clone())
    }
}

#[async_trait]
impl OtcStore for InMemoryStore {
    async fn replace(&self, record: OtcRecord) -> Result<()> {
        let mut otcs = self.otcs.write().await;
        otcs.retain(|_, r| !r.matches_key(&record.phone, record.purpose));
        otcs.insert(record.id, record);
        Ok(())
    }

    async fn find_active(&self, phone: &str, purpose: OtcPurpose) -> Result<Option<OtcRecord>> {
        let otcs = self.otcs.read().await;
        Ok(otcs
            .values()
            .filter(|r| r.matches_key(phone, purpose) && !r.is_used)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn attempt(
        &self,
        id: Uuid,
        code: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        let mut otcs = self.otcs.write().await;
        Ok(match otcs.get_mut(&id) {
            Some(record) => record.attempt(code, max_attempts, now),
            None => AttemptOutcome::Missing,
        })
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut otcs = self.otcs.write().await;
        otcs.remove(&id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut otcs = self.otcs.write().await;
        let before = otcs.len();
        otcs.retain(|_, r| !r.is_expired(now));
        Ok(before - otcs.len())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders
            .values()
            .any(|o| o.tracking_code == order.tracking_code)
        {
            return Err(EngineError::Conflict(format!(
                "tracking code {} is taken",
                order.tracking_code
            )));
        }
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.values().find(|o| o.tracking_code == code).cloned())
    }

    async fn query(&self, filter: &OrderFilter, page: Page) -> Result<(Vec<Order>, usize)> {
        let orders = self.orders.read().await;
        let mut matched: Vec<Order> = orders.values().filter(|o| filter.matches(o)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, page))
    }

    async fn apply(&self, id: OrderId, mutation: OrderMutation, now: DateTime<Utc>) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("order {}", id)))?;
        // Work on a copy so a rejected mutation leaves nothing half-applied.
        let mut updated = order.clone();
        updated.apply(mutation, now)?;
        *order = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(payment_id) = &tx.payment_id
            && transactions
                .values()
                .any(|t| t.payment_id.as_ref() == Some(payment_id))
        {
            return Err(EngineError::Conflict(format!(
                "payment id {} is taken",
                payment_id
            )));
        }
        transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|t| t.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn finalize(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        settlement: Option<Settlement>,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("transaction {}", id)))?;
        tx.finalize(status, settlement, now)?;
        Ok(tx.clone())
    }

    async fn list(&self, filter: &TransactionFilter, page: Page) -> Result<(Vec<Transaction>, usize)> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, page))
    }
}

#[async_trait]
impl SequenceStore for InMemoryStore {
    async fn next(&self, key: &str) -> Result<u64> {
        let mut sequences = self.sequences.write().await;
        let counter = sequences.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
