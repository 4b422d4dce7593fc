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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_USERS: &str = "users";
pub const CF_OTCS: &str = "otcs";
pub const CF_ORDERS: &str = "orders";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_SEQUENCES: &str = "sequences";
/// phone -> user id
pub const CF_IDX_PHONE: &str = "idx_user_phone";
/// tracking code -> order id
pub const CF_IDX_TRACKING: &str = "idx_tracking_code";
/// payment id -> transaction id
pub const CF_IDX_PAYMENT: &str = "idx_payment_id";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_USERS,
    CF_OTCS,
    CF_ORDERS,
    CF_TRANSACTIONS,
    CF_SEQUENCES,
    CF_IDX_PHONE,
    CF_IDX_TRACKING,
    CF_IDX_PAYMENT,
];

/// A persistent backend for every engine port, using RocksDB.
///
/// Each collection lives in its own column family as JSON documents keyed by
/// id. Unique lookups go through index column families kept in the same
/// `WriteBatch` as the document.
///
/// RocksDB has no conditional writes, so every read-modify-write (wallet
/// changes, order mutations, finalization, counters) holds `write_lock` for
/// its duration. This struct is thread-safe; `Clone` shares the `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::storage(format!("{} column family not found", name)))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn lookup_index(&self, cf: &str, key: &str) -> Result<Option<Uuid>> {
        match self.db.get_cf(self.cf(cf)?, key.as_bytes())? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(Some)
                .map_err(|e| EngineError::storage(format!("corrupt index entry in {}: {}", cf, e))),
            None => Ok(None),
        }
    }

    fn load_user(&self, id: UserId) -> Result<User> {
        self.get_json(CF_USERS, id.as_bytes())?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", id)))
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> (Vec<T>, usize) {
    let total = items.len();
    let items = items.into_iter().skip(page.skip).take(page.limit).collect();
    (items, total)
}

#[async_trait]
impl UserStore for RocksDBStore {
    async fn insert(&self, user: User) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.lookup_index(CF_IDX_PHONE, &user.phone)?.is_some() {
            return Err(EngineError::Conflict(format!(
                "phone {} is already registered",
                user.phone
            )));
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_USERS)?, user.id.as_bytes(), serde_json::to_vec(&user)?);
        batch.put_cf(self.cf(CF_IDX_PHONE)?, user.phone.as_bytes(), user.id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        self.get_json(CF_USERS, id.as_bytes())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        match self.lookup_index(CF_IDX_PHONE, phone)? {
            Some(id) => self.get_json(CF_USERS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<User>> {
        self.scan_json(CF_USERS)
    }

    async fn set_password(&self, id: UserId, password_hash: String, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut user = self.load_user(id)?;
        user.password_hash = password_hash;
        user.updated_at = now;
        self.put_json(CF_USERS, id.as_bytes(), &user)
    }

    async fn apply_wallet(&self, id: UserId, change: WalletChange, now: DateTime<Utc>) -> Result<Wallet> {
        let _guard = self.write_lock.lock().await;
        let mut user = self.load_user(id)?;
        user.wallet.apply(change)?;
        user.updated_at = now;
        self.put_json(CF_USERS, id.as_bytes(), &user)?;
        Ok(user.wallet)
    }
}

#[async_trait]
impl OtcStore for RocksDBStore {
    async fn replace(&self, record: OtcRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_OTCS)?;
        let mut batch = WriteBatch::default();
        for existing in self.scan_json::<OtcRecord>(CF_OTCS)? {
            if existing.matches_key(&record.phone, record.purpose) {
                batch.delete_cf(cf, existing.id.as_bytes());
            }
        }
        batch.put_cf(cf, record.id.as_bytes(), serde_json::to_vec(&record)?);
        self.db.write(batch)?;
        Ok(())
    }

    async fn find_active(&self, phone: &str, purpose: OtcPurpose) -> Result<Option<OtcRecord>> {
        Ok(self
            .scan_json::<OtcRecord>(CF_OTCS)?
            .into_iter()
            .filter(|r| r.matches_key(phone, purpose) && !r.is_used)
            .max_by_key(|r| r.created_at))
    }

    async fn attempt(
        &self,
        id: Uuid,
        code: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.get_json::<OtcRecord>(CF_OTCS, id.as_bytes())? else {
            return Ok(AttemptOutcome::Missing);
        };
        let outcome = record.attempt(code, max_attempts, now);
        if matches!(outcome, AttemptOutcome::Accepted | AttemptOutcome::Rejected { .. }) {
            self.put_json(CF_OTCS, id.as_bytes(), &record)?;
        }
        Ok(outcome)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.db.delete_cf(self.cf(CF_OTCS)?, id.as_bytes())?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_OTCS)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for record in self.scan_json::<OtcRecord>(CF_OTCS)? {
            if record.is_expired(now) {
                batch.delete_cf(cf, record.id.as_bytes());
                removed += 1;
            }
        }
        self.db.write(batch)?;
        Ok(removed)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self
            .lookup_index(CF_IDX_TRACKING, &order.tracking_code)?
            .is_some()
        {
            return Err(EngineError::Conflict(format!(
                "tracking code {} is taken",
                order.tracking_code
            )));
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ORDERS)?, order.id.as_bytes(), serde_json::to_vec(&order)?);
        batch.put_cf(
            self.cf(CF_IDX_TRACKING)?,
            order.tracking_code.as_bytes(),
            order.id.as_bytes(),
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, id.as_bytes())
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Order>> {
        match self.lookup_index(CF_IDX_TRACKING, code)? {
            Some(id) => self.get_json(CF_ORDERS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn query(&self, filter: &OrderFilter, page: Page) -> Result<(Vec<Order>, usize)> {
        let mut matched: Vec<Order> = self
            .scan_json::<Order>(CF_ORDERS)?
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, page))
    }

    async fn apply(&self, id: OrderId, mutation: OrderMutation, now: DateTime<Utc>) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        let mut order: Order = self
            .get_json(CF_ORDERS, id.as_bytes())?
            .ok_or_else(|| EngineError::NotFound(format!("order {}", id)))?;
        order.apply(mutation, now)?;
        self.put_json(CF_ORDERS, id.as_bytes(), &order)?;
        Ok(order)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        if let Some(payment_id) = &tx.payment_id {
            if self.lookup_index(CF_IDX_PAYMENT, payment_id)?.is_some() {
                return Err(EngineError::Conflict(format!(
                    "payment id {} is taken",
                    payment_id
                )));
            }
            batch.put_cf(self.cf(CF_IDX_PAYMENT)?, payment_id.as_bytes(), tx.id.as_bytes());
        }
        batch.put_cf(self.cf(CF_TRANSACTIONS)?, tx.id.as_bytes(), serde_json::to_vec(&tx)?);
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.get_json(CF_TRANSACTIONS, id.as_bytes())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>> {
        match self.lookup_index(CF_IDX_PAYMENT, payment_id)? {
            Some(id) => self.get_json(CF_TRANSACTIONS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn finalize(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        settlement: Option<Settlement>,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let _guard = self.write_lock.lock().await;
        let mut tx: Transaction = self
            .get_json(CF_TRANSACTIONS, id.as_bytes())?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {}", id)))?;
        tx.finalize(status, settlement, now)?;
        self.put_json(CF_TRANSACTIONS, id.as_bytes(), &tx)?;
        Ok(tx)
    }

    async fn list(&self, filter: &TransactionFilter, page: Page) -> Result<(Vec<Transaction>, usize)> {
        let mut matched: Vec<Transaction> = self
            .scan_json::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, page))
    }
}

#[async_trait]
impl SequenceStore for RocksDBStore {
    async fn next(&self, key: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let current: u64 = self.get_json(CF_SEQUENCES, key.as_bytes())?.unwrap_or(0);
        let next = current + 1;
        self.put_json(CF_SEQUENCES, key.as_bytes(), &next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::transaction::PaymentMethod;
    use crate::domain::user::Role;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_rocksdb_user_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let user = User::new("0912345678", "An", "hash", Role::User, now);
        UserStore::insert(&store, user.clone()).await.unwrap();

        let by_phone = store.find_by_phone("0912345678").await.unwrap().unwrap();
        assert_eq!(by_phone, user);

        let dup = UserStore::insert(&store, User::new("0912345678", "Binh", "h", Role::User, now)).await;
        assert!(matches!(dup, Err(EngineError::Conflict(_))));

        let wallet = store
            .apply_wallet(user.id, WalletChange::Topup(Amount::new(dec!(50000)).unwrap()), now)
            .await
            .unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(50000)));
        let reloaded = UserStore::get(&store, user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.wallet, wallet);
    }

    #[tokio::test]
    async fn test_rocksdb_transaction_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let tx = Transaction::pending_topup(
            Uuid::new_v4(),
            Amount::new(dec!(100000)).unwrap(),
            PaymentMethod::Qr,
            "SW20240115103000ABCD1234",
            now,
            now,
        );
        TransactionStore::insert(&store, tx.clone()).await.unwrap();

        let found = store
            .find_by_payment_id("SW20240115103000ABCD1234")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, tx);

        let done = TransactionStore::finalize(&store, tx.id, TransactionStatus::Completed, None, now)
            .await
            .unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);

        let again = TransactionStore::finalize(&store, tx.id, TransactionStatus::Completed, None, now).await;
        assert!(matches!(again, Err(EngineError::AlreadyProcessed(_))));
    }

    #[tokio::test]
    async fn test_rocksdb_sequences_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            assert_eq!(store.next("tracking:SW20240115").await.unwrap(), 1);
            assert_eq!(store.next("tracking:SW20240115").await.unwrap(), 2);
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.next("tracking:SW20240115").await.unwrap(), 3);
    }
}
