use super::accounts::AccountService;
use super::orders::OrderLifecycle;
use super::otc::OtcGate;
use super::topup::TopUpService;
use super::tracking::TrackingCodeAllocator;
use super::wallet::WalletLedger;
use super::webhook::PaymentWebhookHandler;
use crate::config::EngineConfig;
use crate::domain::ports::{BlobStore, Clock, NotificationGateway, Stores};
use crate::infrastructure::blob::LocalBlobStore;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::notifier::LogNotificationGateway;
use std::sync::Arc;

/// The engine's components, wired to one set of stores.
///
/// Every component holds its own handles; nothing reaches for ambient
/// global state. Clones are cheap and share the backends.
#[derive(Clone)]
pub struct ShipwayEngine {
    pub stores: Stores,
    pub otc: OtcGate,
    pub accounts: AccountService,
    pub wallet: WalletLedger,
    pub orders: OrderLifecycle,
    pub topups: TopUpService,
    pub webhooks: PaymentWebhookHandler,
}

impl ShipwayEngine {
    pub fn new(
        stores: Stores,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationGateway>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let otc = OtcGate::new(stores.otcs.clone(), notifier, clock.clone(), config);
        let accounts = AccountService::new(stores.users.clone(), otc.clone(), clock.clone());
        let wallet = WalletLedger::new(stores.users.clone(), stores.transactions.clone(), clock.clone());
        let orders = OrderLifecycle::new(
            stores.users.clone(),
            stores.orders.clone(),
            wallet.clone(),
            TrackingCodeAllocator::new(stores.sequences.clone()),
            blobs,
            clock.clone(),
        );
        let topups = TopUpService::new(
            stores.users.clone(),
            stores.transactions.clone(),
            clock.clone(),
            config.topup_ttl,
        );
        let webhooks = PaymentWebhookHandler::new(stores.transactions.clone(), wallet.clone(), clock, config);

        Self {
            stores,
            otc,
            accounts,
            wallet,
            orders,
            topups,
            webhooks,
        }
    }

    /// System clock, log-only notifications and blobs under `config.upload_dir`.
    pub fn with_defaults(stores: Stores, config: &EngineConfig) -> Self {
        Self::new(
            stores,
            config,
            Arc::new(SystemClock),
            Arc::new(LogNotificationGateway),
            Arc::new(LocalBlobStore::new(config.upload_dir.clone())),
        )
    }
}
