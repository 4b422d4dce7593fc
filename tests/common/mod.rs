#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use shipway::application::engine::ShipwayEngine;
use shipway::application::webhook::{NotificationStatus, PaymentNotification};
use shipway::config::EngineConfig;
use shipway::domain::money::Amount;
use shipway::domain::order::{CreateOrderRequest, Location, VehicleType};
use shipway::domain::ports::{Clock, Stores};
use shipway::domain::transaction::{PaymentMethod, Transaction};
use shipway::domain::user::{Actor, Role, User, UserId};
use shipway::infrastructure::blob::LocalBlobStore;
use shipway::infrastructure::clock::ManualClock;
use shipway::infrastructure::in_memory::InMemoryStore;
use shipway::infrastructure::notifier::RecordingNotificationGateway;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub engine: ShipwayEngine,
    pub clock: ManualClock,
    pub notifier: RecordingNotificationGateway,
    pub uploads: TempDir,
}

pub fn start() -> DateTime<Utc> {
    "2024-01-15T03:30:00Z".parse().unwrap()
}

pub fn harness_with(config: EngineConfig) -> Harness {
    harness_with_stores(config, Stores::from_backend(InMemoryStore::new()))
}

pub fn harness_with_stores(config: EngineConfig, stores: Stores) -> Harness {
    let clock = ManualClock::new(start());
    let notifier = RecordingNotificationGateway::new();
    let uploads = tempfile::tempdir().unwrap();
    let engine = ShipwayEngine::new(
        stores,
        &config,
        Arc::new(clock.clone()),
        Arc::new(notifier.clone()),
        Arc::new(LocalBlobStore::new(uploads.path())),
    );
    Harness {
        engine,
        clock,
        notifier,
        uploads,
    }
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

impl Harness {
    /// Inserts a user directly, skipping the OTC and password hashing.
    pub async fn user(&self, phone: &str, role: Role) -> (UserId, Actor) {
        let user = User::new(phone, "Test User", "not-a-hash", role, self.clock.now());
        let id = user.id;
        self.engine.stores.users.insert(user).await.unwrap();
        (id, Actor::member(id, role))
    }

    /// Stores a pending top-up under a known payment id.
    pub async fn pending_topup(&self, user_id: UserId, payment_id: &str, amount: Decimal) -> Transaction {
        let now = self.clock.now();
        let tx = Transaction::pending_topup(
            user_id,
            Amount::new(amount).unwrap(),
            PaymentMethod::BankTransfer,
            payment_id,
            now + Duration::minutes(15),
            now,
        );
        self.engine.stores.transactions.insert(tx.clone()).await.unwrap();
        tx
    }

    /// Funds a wallet through the regular top-up and webhook path.
    pub async fn fund(&self, user_id: UserId, amount: Decimal) {
        let ticket = self
            .engine
            .topups
            .request_top_up(user_id, amount, PaymentMethod::Qr)
            .await
            .unwrap();
        self.engine
            .webhooks
            .verify_payment(success(&ticket.payment_id))
            .await
            .unwrap();
    }

    pub async fn balance(&self, user_id: UserId) -> Decimal {
        self.engine.wallet.balance(user_id).await.unwrap().value()
    }

    pub async fn assert_ledger_consistent(&self, user_id: UserId) {
        let audit = self.engine.wallet.audit(user_id).await.unwrap();
        assert!(
            audit.consistent,
            "wallet {:?} disagrees with ledger {}",
            audit.wallet, audit.ledger_balance
        );
    }
}

pub fn success(payment_id: &str) -> PaymentNotification {
    PaymentNotification {
        payment_id: payment_id.to_string(),
        status: NotificationStatus::Success,
        transaction_code: Some("FT24015123456".to_string()),
        payment_time: Some(start()),
        signature: None,
    }
}

pub fn location(address: &str, lat: f64, lng: f64) -> Location {
    Location {
        address: address.to_string(),
        lat,
        lng,
        contact_name: "Nguyen Van A".to_string(),
        contact_phone: "0912345678".to_string(),
        note: None,
    }
}

/// District 7 to Thu Duc by bike, 5.5 kg with 500,000 COD.
pub fn order_request() -> CreateOrderRequest {
    CreateOrderRequest {
        pickup: location("123 Nguyen Van Linh, Q.7", 10.7329, 106.7173),
        dropoff: location("456 Le Van Viet, Q.9", 10.8231, 106.7575),
        product_name: "Quan ao".to_string(),
        weight: dec!(5.5),
        length: None,
        width: None,
        height: None,
        vehicle_type: VehicleType::Bike,
        note: None,
        cod_amount: dec!(500000),
        images: vec![],
    }
}

/// Fee for `order_request()`: 10.95 km gives 52,850, rounded to 53,000.
pub const ORDER_TOTAL: Decimal = dec!(553000);

pub fn write_notifications_csv(path: &Path, rows: &[(&str, &str)]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["payment_id", "status", "transaction_code", "payment_time", "signature"])?;
    for (payment_id, status) in rows {
        wtr.write_record([*payment_id, *status, "", "", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
