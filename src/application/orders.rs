use super::pricing::{self, FeeBreakdown};
use super::tracking::TrackingCodeAllocator;
use super::wallet::WalletLedger;
use crate::domain::money::Amount;
use crate::domain::order::{
    CreateOrderRequest, HistoryEntry, ImageUpload, Order, OrderFilter, OrderId, OrderMutation,
    OrderPaymentMethod, OrderStatus, VehicleType,
};
use crate::domain::ports::{BlobStore, Clock, OrderStore, Page, UserStore};
use crate::domain::user::{Actor, Role, UserId};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MAX_PAGE_SIZE: usize = 50;
const TRACKING_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCreated {
    pub order: Order,
    /// The wallet could not cover `total_amount`; the order waits in `pending`.
    pub payment_required: bool,
    /// Images the blob store refused. The order is kept regardless.
    pub image_failures: Vec<String>,
}

/// The public view of an order, without contact details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingInfo {
    pub tracking_code: String,
    pub status: OrderStatus,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub vehicle_type: VehicleType,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creates orders and drives them through the delivery state machine.
#[derive(Clone)]
pub struct OrderLifecycle {
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    wallet: WalletLedger,
    tracking: TrackingCodeAllocator,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

fn is_owner(order: &Order, actor: &Actor) -> bool {
    actor.user_id().is_some_and(|id| order.is_owned_by(id))
}

/// Who may move `order` into `target`. Source-state checks come after this.
fn authorize(order: &Order, target: OrderStatus, actor: &Actor) -> Result<()> {
    let allowed = match target {
        OrderStatus::Pending => true,
        OrderStatus::Confirmed => matches!(actor, Actor::System),
        OrderStatus::Cancelled => actor.is_admin() || is_owner(order, actor),
        OrderStatus::PickingUp
        | OrderStatus::PickedUp
        | OrderStatus::InTransit
        | OrderStatus::Delivering
        | OrderStatus::Delivered
        | OrderStatus::Failed => {
            actor.is_admin()
                || (actor.is_driver() && actor.user_id().is_some_and(|id| order.is_assigned_to(id)))
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!(
            "not allowed to move order {} to {}",
            order.tracking_code, target
        )))
    }
}

fn clamp(page: Page) -> Page {
    Page::new(page.skip, page.limit.clamp(1, MAX_PAGE_SIZE))
}

impl OrderLifecycle {
    pub fn new(
        users: Arc<dyn UserStore>,
        orders: Arc<dyn OrderStore>,
        wallet: WalletLedger,
        tracking: TrackingCodeAllocator,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            orders,
            wallet,
            tracking,
            blobs,
            clock,
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order_id)))
    }

    /// Prices, stores and, when the wallet allows, pays for a new order.
    pub async fn create(&self, requester: UserId, mut request: CreateOrderRequest) -> Result<OrderCreated> {
        request.validate()?;
        let distance = pricing::distance_km(
            request.pickup.lat,
            request.pickup.lng,
            request.dropoff.lat,
            request.dropoff.lng,
        );
        let fee = pricing::quote(distance, request.weight, request.vehicle_type, request.cod_amount)?;

        let user = self
            .users
            .get(requester)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", requester)))?;
        if !user.is_active {
            return Err(EngineError::Forbidden("account is disabled".to_string()));
        }

        let images = std::mem::take(&mut request.images);
        let order = self.insert_new(requester, request, distance, &fee).await?;
        info!(
            user_id = %requester,
            order_id = %order.id,
            tracking_code = %order.tracking_code,
            amount = %order.total_amount,
            "Order created"
        );

        let (mut order, payment_required) = if user.wallet.balance.value() >= order.total_amount {
            match self.charge(order.clone()).await {
                Ok(paid) => (paid, false),
                Err(EngineError::InsufficientFunds { .. }) => (order, true),
                Err(e) => return Err(e),
            }
        } else {
            (order, true)
        };

        let mut image_failures = Vec::new();
        if !images.is_empty() {
            let (paths, failures) = self.store_images(order.id, images).await;
            image_failures = failures;
            if !paths.is_empty() {
                order = self
                    .orders
                    .apply(order.id, OrderMutation::AttachImages(paths), self.clock.now())
                    .await?;
            }
        }

        Ok(OrderCreated {
            order,
            payment_required,
            image_failures,
        })
    }

    async fn insert_new(
        &self,
        user_id: UserId,
        request: CreateOrderRequest,
        distance_km: Decimal,
        fee: &FeeBreakdown,
    ) -> Result<Order> {
        let now = self.clock.now();
        let mut order = Order {
            id: Uuid::new_v4(),
            tracking_code: String::new(),
            user_id,
            driver_id: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            product_name: request.product_name,
            images: Vec::new(),
            weight: request.weight,
            length: request.length,
            width: request.width,
            height: request.height,
            vehicle_type: request.vehicle_type,
            note: request.note,
            distance_km,
            shipping_fee: fee.shipping_fee,
            cod_amount: request.cod_amount,
            total_amount: fee.total_amount,
            payment_method: OrderPaymentMethod::Wallet,
            is_paid: false,
            status: OrderStatus::Pending,
            history: vec![HistoryEntry {
                status: OrderStatus::Pending,
                timestamp: now,
                note: Some("Order created".to_string()),
                updated_by: Some(user_id),
            }],
            created_at: now,
            updated_at: now,
        };

        // The counter can trail existing codes, e.g. after a restore; skip ahead.
        let mut last_err = None;
        for _ in 0..TRACKING_CODE_ATTEMPTS {
            order.tracking_code = self.tracking.allocate(now.date_naive()).await?;
            match self.orders.insert(order.clone()).await {
                Ok(()) => return Ok(order),
                Err(EngineError::Conflict(msg)) => {
                    warn!(tracking_code = %order.tracking_code, "Tracking code collision, retrying");
                    last_err = Some(EngineError::Conflict(msg));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::Conflict("no tracking code available".to_string())))
    }

    /// Debits the owner, then confirms. A failed confirmation is refunded.
    async fn charge(&self, order: Order) -> Result<Order> {
        let amount = Amount::new(order.total_amount)?;
        self.wallet
            .debit(
                order.user_id,
                amount,
                Some(order.id),
                format!("Payment for order {}", order.tracking_code),
            )
            .await?;

        let settle = OrderMutation::SettlePayment {
            note: "Paid from wallet".to_string(),
        };
        match self.orders.apply(order.id, settle, self.clock.now()).await {
            Ok(paid) => {
                info!(order_id = %paid.id, tracking_code = %paid.tracking_code, "Order confirmed");
                Ok(paid)
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Order changed before confirmation, refunding");
                self.wallet
                    .refund(
                        order.user_id,
                        amount,
                        order.id,
                        format!("Refund for order {}", order.tracking_code),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn store_images(&self, order_id: OrderId, images: Vec<ImageUpload>) -> (Vec<String>, Vec<String>) {
        let mut paths = Vec::new();
        let mut failures = Vec::new();
        for (index, image) in images.into_iter().enumerate() {
            let ext = image.extension().unwrap_or_default();
            let key = format!("orders/{}/{}.{}", order_id, index, ext);
            match self.blobs.put(&key, &image.bytes).await {
                Ok(path) => paths.push(path.to_string_lossy().into_owned()),
                Err(e) => {
                    warn!(order_id = %order_id, filename = %image.filename, error = %e, "Image upload failed");
                    failures.push(image.filename);
                }
            }
        }
        (paths, failures)
    }

    /// Pays a `payment_required` order from the owner's wallet.
    pub async fn pay(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self.load(order_id).await?;
        if !is_owner(&order, actor) {
            return Err(EngineError::Forbidden(
                "only the owner can pay for an order".to_string(),
            ));
        }
        if order.is_paid || order.status != OrderStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "order {} is {} and cannot take a payment",
                order.tracking_code, order.status
            )));
        }
        self.charge(order).await
    }

    /// A driver claims an unassigned, paid order.
    pub async fn accept(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let Actor::Member {
            id: driver_id,
            role: Role::Driver,
        } = *actor
        else {
            return Err(EngineError::Forbidden(
                "only drivers can accept orders".to_string(),
            ));
        };
        let order = self
            .orders
            .apply(
                order_id,
                OrderMutation::Assign {
                    driver_id,
                    note: "Driver accepted the order".to_string(),
                },
                self.clock.now(),
            )
            .await?;
        info!(order_id = %order.id, tracking_code = %order.tracking_code, driver_id = %driver_id, "Order accepted");
        Ok(order)
    }

    pub async fn update_status(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<Order> {
        if target == OrderStatus::Cancelled {
            return self.cancel(order_id, actor, note).await;
        }
        let order = self.load(order_id).await?;
        authorize(&order, target, actor)?;
        if !order.status.can_transition_to(target) {
            return Err(EngineError::InvalidState(format!(
                "cannot move order {} from {} to {}",
                order.tracking_code, order.status, target
            )));
        }
        let updated = self
            .orders
            .apply(
                order_id,
                OrderMutation::Transition {
                    expected: order.status,
                    to: target,
                    note,
                    updated_by: actor.user_id(),
                },
                self.clock.now(),
            )
            .await?;
        info!(
            order_id = %updated.id,
            tracking_code = %updated.tracking_code,
            from = %order.status,
            to = %target,
            "Order status updated"
        );
        Ok(updated)
    }

    /// Cancels from `pending` or `confirmed`, refunding a paid order.
    ///
    /// The refund lands before the status change, so a failed refund leaves
    /// the order cancellable. If the status change then loses a race, the
    /// refund is debited back.
    pub async fn cancel(&self, order_id: OrderId, actor: &Actor, reason: Option<String>) -> Result<Order> {
        let order = self.load(order_id).await?;
        authorize(&order, OrderStatus::Cancelled, actor)?;
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(EngineError::InvalidState(format!(
                "order {} is {} and can no longer be cancelled",
                order.tracking_code, order.status
            )));
        }

        let refunded = if order.is_paid {
            let amount = Amount::new(order.total_amount)?;
            self.wallet
                .refund(
                    order.user_id,
                    amount,
                    order.id,
                    format!("Refund for cancelled order {}", order.tracking_code),
                )
                .await?;
            Some(amount)
        } else {
            None
        };

        let transition = OrderMutation::Transition {
            expected: order.status,
            to: OrderStatus::Cancelled,
            note: reason.or_else(|| Some("Order cancelled".to_string())),
            updated_by: actor.user_id(),
        };
        match self.orders.apply(order_id, transition, self.clock.now()).await {
            Ok(cancelled) => {
                info!(order_id = %cancelled.id, tracking_code = %cancelled.tracking_code, "Order cancelled");
                Ok(cancelled)
            }
            Err(e) => {
                if let Some(amount) = refunded {
                    warn!(order_id = %order.id, error = %e, "Order changed before cancellation, reversing refund");
                    if let Err(reversal) = self
                        .wallet
                        .debit(
                            order.user_id,
                            amount,
                            Some(order.id),
                            format!("Reversal of refund for order {}", order.tracking_code),
                        )
                        .await
                    {
                        error!(
                            order_id = %order.id,
                            user_id = %order.user_id,
                            amount = %amount,
                            error = %reversal,
                            "Refund reversal failed"
                        );
                        return Err(reversal);
                    }
                }
                Err(e)
            }
        }
    }

    /// Owner, assigned driver or admin.
    pub async fn get(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self.load(order_id).await?;
        let visible = matches!(actor, Actor::System)
            || actor.is_admin()
            || is_owner(&order, actor)
            || actor.user_id().is_some_and(|id| order.is_assigned_to(id));
        if !visible {
            return Err(EngineError::Forbidden(format!(
                "no access to order {}",
                order.tracking_code
            )));
        }
        Ok(order)
    }

    pub async fn track(&self, tracking_code: &str) -> Result<TrackingInfo> {
        let order = self
            .orders
            .find_by_tracking_code(tracking_code)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {}", tracking_code)))?;
        Ok(TrackingInfo {
            tracking_code: order.tracking_code,
            status: order.status,
            pickup_address: order.pickup.address,
            dropoff_address: order.dropoff.address,
            vehicle_type: order.vehicle_type,
            history: order.history,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        page: Page,
    ) -> Result<(Vec<Order>, usize)> {
        let filter = OrderFilter {
            user_id: Some(user_id),
            statuses: status.into_iter().collect(),
            ..Default::default()
        };
        self.orders.query(&filter, clamp(page)).await
    }

    pub async fn list_for_driver(
        &self,
        driver_id: UserId,
        status: Option<OrderStatus>,
        page: Page,
    ) -> Result<(Vec<Order>, usize)> {
        let filter = OrderFilter {
            driver_id: Some(driver_id),
            statuses: status.into_iter().collect(),
            ..Default::default()
        };
        self.orders.query(&filter, clamp(page)).await
    }

    /// Paid, unassigned orders a driver can accept. Drivers only.
    pub async fn list_available(
        &self,
        actor: &Actor,
        vehicle_type: Option<VehicleType>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        if !actor.is_driver() {
            return Err(EngineError::Forbidden(
                "only drivers can browse available orders".to_string(),
            ));
        }
        let filter = OrderFilter {
            unassigned: true,
            statuses: vec![OrderStatus::Pending, OrderStatus::Confirmed],
            vehicle_type,
            is_paid: Some(true),
            ..Default::default()
        };
        let (orders, _) = self.orders.query(&filter, clamp(Page::new(0, limit))).await?;
        Ok(orders)
    }
}
