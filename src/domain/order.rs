use super::user::UserId;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type OrderId = Uuid;

pub const MAX_IMAGES: usize = 5;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum VehicleType {
    #[serde(rename = "bike")]
    Bike,
    #[serde(rename = "car")]
    Car,
    #[serde(rename = "van")]
    Van,
    #[serde(rename = "truck_500kg")]
    Truck500kg,
    #[serde(rename = "truck_1000kg")]
    Truck1000kg,
}

impl VehicleType {
    pub const ALL: [VehicleType; 5] = [
        VehicleType::Bike,
        VehicleType::Car,
        VehicleType::Van,
        VehicleType::Truck500kg,
        VehicleType::Truck1000kg,
    ];
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VehicleType::Bike => "bike",
            VehicleType::Car => "car",
            VehicleType::Van => "van",
            VehicleType::Truck500kg => "truck_500kg",
            VehicleType::Truck1000kg => "truck_1000kg",
        };
        f.write_str(s)
    }
}

impl FromStr for VehicleType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        VehicleType::ALL
            .into_iter()
            .find(|v| v.to_string() == s)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "Invalid vehicle type {}. Accepted: bike, car, van, truck_500kg, truck_1000kg",
                    s
                ))
            })
    }
}

/// Delivery stages.
///
/// `Pending` is initial; `Delivered`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    PickingUp,
    PickedUp,
    InTransit,
    Delivering,
    Delivered,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// States from which `self` may be entered.
    pub fn allowed_sources(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[],
            Confirmed => &[Pending],
            Cancelled => &[Pending, Confirmed],
            PickingUp => &[Pending, Confirmed],
            PickedUp => &[PickingUp],
            InTransit => &[PickedUp],
            Delivering => &[InTransit],
            Delivered => &[Delivering],
            Failed => &[Pending, Confirmed, PickingUp, PickedUp, InTransit, Delivering],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        target.allowed_sources().contains(self)
    }

    /// States only reachable once the order is paid: confirmation and
    /// driver-side progress.
    pub fn requires_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed
                | OrderStatus::PickingUp
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
                | OrderStatus::Delivering
                | OrderStatus::Delivered
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::PickingUp => "picking_up",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentMethod {
    #[default]
    Wallet,
    Cod,
    Card,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Location {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub contact_name: String,
    pub contact_phone: String,
    pub note: Option<String>,
}

impl Location {
    fn validate(&self, which: &str) -> Result<()> {
        check_len(&self.address, 5, 500, &format!("{} address", which))?;
        check_len(&self.contact_name, 2, 100, &format!("{} contact name", which))?;
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(EngineError::Validation(format!(
                "{} latitude must be within [-90, 90]",
                which
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(EngineError::Validation(format!(
                "{} longitude must be within [-180, 180]",
                which
            )));
        }
        if !is_contact_phone(&self.contact_phone) {
            return Err(EngineError::Validation(format!(
                "{} contact phone must start with 0 or +84 followed by 9-10 digits",
                which
            )));
        }
        if let Some(note) = &self.note {
            check_len(note, 0, 500, &format!("{} note", which))?;
        }
        Ok(())
    }
}

/// `^(0|\+84)[0-9]{9,10}$`
fn is_contact_phone(phone: &str) -> bool {
    let rest = phone
        .strip_prefix("+84")
        .or_else(|| phone.strip_prefix('0'));
    match rest {
        Some(rest) => (9..=10).contains(&rest.len()) && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn check_len(value: &str, min: usize, max: usize, field: &str) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(EngineError::Validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

/// An image supplied with an order, before it reaches the blob store.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    fn validate(&self) -> Result<()> {
        match self.extension() {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => {
                return Err(EngineError::Validation(format!(
                    "Unsupported image {}. Accepted: {}",
                    self.filename,
                    IMAGE_EXTENSIONS.join(", ")
                )));
            }
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(EngineError::Validation(format!(
                "Image {} exceeds 5MB",
                self.filename
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrderRequest {
    pub pickup: Location,
    pub dropoff: Location,
    pub product_name: String,
    /// Kilograms.
    pub weight: Decimal,
    /// Centimetres.
    pub length: Option<Decimal>,
    pub width: Option<Decimal>,
    pub height: Option<Decimal>,
    pub vehicle_type: VehicleType,
    pub note: Option<String>,
    pub cod_amount: Decimal,
    pub images: Vec<ImageUpload>,
}

impl CreateOrderRequest {
    /// Shape and range checks. Vehicle capacity is checked by pricing.
    pub fn validate(&self) -> Result<()> {
        self.pickup.validate("pickup")?;
        self.dropoff.validate("dropoff")?;
        check_len(&self.product_name, 2, 200, "product name")?;
        if self.weight <= Decimal::ZERO || self.weight > dec!(10000) {
            return Err(EngineError::Validation(
                "weight must be greater than 0 and at most 10000 kg".to_string(),
            ));
        }
        for (name, dim) in [
            ("length", self.length),
            ("width", self.width),
            ("height", self.height),
        ] {
            if let Some(value) = dim
                && (value <= Decimal::ZERO || value > dec!(1000))
            {
                return Err(EngineError::Validation(format!(
                    "{} must be greater than 0 and at most 1000 cm",
                    name
                )));
            }
        }
        if let Some(note) = &self.note {
            check_len(note, 0, 1000, "note")?;
        }
        if self.cod_amount < Decimal::ZERO {
            return Err(EngineError::Validation(
                "cod_amount must not be negative".to_string(),
            ));
        }
        if self.images.len() > MAX_IMAGES {
            return Err(EngineError::Validation(format!(
                "At most {} images per order",
                MAX_IMAGES
            )));
        }
        self.images.iter().try_for_each(ImageUpload::validate)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct HistoryEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
    /// `None` when the engine itself made the change.
    pub updated_by: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub tracking_code: String,
    pub user_id: UserId,
    pub driver_id: Option<UserId>,
    pub pickup: Location,
    pub dropoff: Location,
    pub product_name: String,
    pub images: Vec<String>,
    pub weight: Decimal,
    pub length: Option<Decimal>,
    pub width: Option<Decimal>,
    pub height: Option<Decimal>,
    pub vehicle_type: VehicleType,
    pub note: Option<String>,
    pub distance_km: Decimal,
    pub shipping_fee: Decimal,
    pub cod_amount: Decimal,
    pub total_amount: Decimal,
    pub payment_method: OrderPaymentMethod,
    pub is_paid: bool,
    pub status: OrderStatus,
    /// Append-only.
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Single-document updates an order store must apply atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderMutation {
    /// Set-if-match: applies only while the order is still in `expected`.
    Transition {
        expected: OrderStatus,
        to: OrderStatus,
        note: Option<String>,
        updated_by: Option<UserId>,
    },
    /// A driver claims an unassigned order and starts the pickup.
    Assign { driver_id: UserId, note: String },
    /// Wallet payment landed; the order moves to `Confirmed`.
    SettlePayment { note: String },
    AttachImages(Vec<String>),
}

impl Order {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    pub fn is_assigned_to(&self, user_id: UserId) -> bool {
        self.driver_id == Some(user_id)
    }

    fn record(&mut self, status: OrderStatus, note: Option<String>, updated_by: Option<UserId>, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        self.history.push(HistoryEntry {
            status,
            timestamp: now,
            note,
            updated_by,
        });
    }

    /// Checks preconditions and applies `mutation`, or fails leaving the order untouched.
    pub fn apply(&mut self, mutation: OrderMutation, now: DateTime<Utc>) -> Result<()> {
        match mutation {
            OrderMutation::Transition {
                expected,
                to,
                note,
                updated_by,
            } => {
                if self.status != expected {
                    return Err(EngineError::InvalidState(format!(
                        "order {} is {}, expected {}",
                        self.tracking_code, self.status, expected
                    )));
                }
                if !expected.can_transition_to(to) {
                    return Err(EngineError::InvalidState(format!(
                        "cannot move order {} from {} to {}",
                        self.tracking_code, expected, to
                    )));
                }
                if to.requires_payment() && !self.is_paid {
                    return Err(EngineError::InvalidState(format!(
                        "order {} is awaiting payment",
                        self.tracking_code
                    )));
                }
                self.record(to, note, updated_by, now);
            }
            OrderMutation::Assign { driver_id, note } => {
                if self.driver_id.is_some() {
                    return Err(EngineError::Conflict(format!(
                        "order {} already has a driver",
                        self.tracking_code
                    )));
                }
                if !self.status.can_transition_to(OrderStatus::PickingUp) {
                    return Err(EngineError::InvalidState(format!(
                        "order {} is {} and cannot be accepted",
                        self.tracking_code, self.status
                    )));
                }
                if !self.is_paid {
                    return Err(EngineError::InvalidState(format!(
                        "order {} is awaiting payment",
                        self.tracking_code
                    )));
                }
                self.driver_id = Some(driver_id);
                self.record(OrderStatus::PickingUp, Some(note), Some(driver_id), now);
            }
            OrderMutation::SettlePayment { note } => {
                if self.is_paid || self.status != OrderStatus::Pending {
                    return Err(EngineError::InvalidState(format!(
                        "order {} is {} and cannot take a payment",
                        self.tracking_code, self.status
                    )));
                }
                self.is_paid = true;
                self.payment_method = OrderPaymentMethod::Wallet;
                self.record(OrderStatus::Confirmed, Some(note), None, now);
            }
            OrderMutation::AttachImages(paths) => {
                self.images.extend(paths);
                self.updated_at = now;
            }
        }
        Ok(())
    }
}

/// Query over orders. Empty `statuses` means any status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub user_id: Option<UserId>,
    pub driver_id: Option<UserId>,
    pub unassigned: bool,
    pub statuses: Vec<OrderStatus>,
    pub vehicle_type: Option<VehicleType>,
    pub is_paid: Option<bool>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|id| order.user_id == id)
            && self.driver_id.is_none_or(|id| order.driver_id == Some(id))
            && (!self.unassigned || order.driver_id.is_none())
            && (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && self.vehicle_type.is_none_or(|v| order.vehicle_type == v)
            && self.is_paid.is_none_or(|paid| order.is_paid == paid)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn location(address: &str, lat: f64, lng: f64) -> Location {
        Location {
            address: address.to_string(),
            lat,
            lng,
            contact_name: "Nguyen Van A".to_string(),
            contact_phone: "0912345678".to_string(),
            note: None,
        }
    }

    pub(crate) fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            pickup: location("123 Nguyen Van Linh, Q.7", 10.7329, 106.7173),
            dropoff: location("456 Le Van Viet, Q.9", 10.8231, 106.7575),
            product_name: "Clothes".to_string(),
            weight: dec!(5.5),
            length: Some(dec!(50)),
            width: None,
            height: None,
            vehicle_type: VehicleType::Bike,
            note: None,
            cod_amount: dec!(500000),
            images: vec![],
        }
    }

    fn order(status: OrderStatus, is_paid: bool) -> Order {
        let now = Utc::now();
        let req = request();
        Order {
            id: Uuid::new_v4(),
            tracking_code: "SW20240115001".to_string(),
            user_id: Uuid::new_v4(),
            driver_id: None,
            pickup: req.pickup,
            dropoff: req.dropoff,
            product_name: req.product_name,
            images: vec![],
            weight: req.weight,
            length: None,
            width: None,
            height: None,
            vehicle_type: req.vehicle_type,
            note: None,
            distance_km: dec!(8.5),
            shipping_fee: dec!(46000),
            cod_amount: dec!(500000),
            total_amount: dec!(546000),
            payment_method: OrderPaymentMethod::Wallet,
            is_paid,
            status,
            history: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!PickedUp.can_transition_to(Cancelled));
        assert!(PickingUp.can_transition_to(PickedUp));
        assert!(!PickingUp.can_transition_to(InTransit));
        assert!(Delivering.can_transition_to(Delivered));
        assert!(InTransit.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Confirmed.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled, OrderStatus::Failed] {
            assert!(terminal.is_terminal());
            for target in [
                OrderStatus::Confirmed,
                OrderStatus::Cancelled,
                OrderStatus::PickingUp,
                OrderStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_transition_is_set_if_match() {
        let mut o = order(OrderStatus::Confirmed, true);
        let stale = OrderMutation::Transition {
            expected: OrderStatus::Pending,
            to: OrderStatus::Cancelled,
            note: None,
            updated_by: None,
        };
        assert!(matches!(o.apply(stale, Utc::now()), Err(EngineError::InvalidState(_))));
        assert_eq!(o.status, OrderStatus::Confirmed);
        assert!(o.history.is_empty());
    }

    #[test]
    fn test_assign_rejects_second_driver() {
        let mut o = order(OrderStatus::Confirmed, true);
        let first = Uuid::new_v4();
        o.apply(
            OrderMutation::Assign { driver_id: first, note: "on the way".into() },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(o.status, OrderStatus::PickingUp);
        assert_eq!(o.driver_id, Some(first));

        let second = o.apply(
            OrderMutation::Assign { driver_id: Uuid::new_v4(), note: "me too".into() },
            Utc::now(),
        );
        assert!(matches!(second, Err(EngineError::Conflict(_))));
        assert_eq!(o.driver_id, Some(first));
    }

    #[test]
    fn test_unpaid_order_cannot_be_accepted() {
        let mut o = order(OrderStatus::Pending, false);
        let result = o.apply(
            OrderMutation::Assign { driver_id: Uuid::new_v4(), note: "go".into() },
            Utc::now(),
        );
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert!(o.driver_id.is_none());
    }

    #[test]
    fn test_unpaid_order_cannot_be_confirmed_by_transition() {
        let mut o = order(OrderStatus::Pending, false);
        let confirm = OrderMutation::Transition {
            expected: OrderStatus::Pending,
            to: OrderStatus::Confirmed,
            note: None,
            updated_by: None,
        };
        assert!(matches!(o.apply(confirm, Utc::now()), Err(EngineError::InvalidState(_))));
        assert_eq!(o.status, OrderStatus::Pending);
        assert!(o.history.is_empty());
    }

    #[test]
    fn test_settle_payment_confirms_once() {
        let mut o = order(OrderStatus::Pending, false);
        o.apply(OrderMutation::SettlePayment { note: "paid".into() }, Utc::now())
            .unwrap();
        assert!(o.is_paid);
        assert_eq!(o.status, OrderStatus::Confirmed);
        assert_eq!(o.history.len(), 1);
        assert_eq!(o.history[0].updated_by, None);

        let again = o.apply(OrderMutation::SettlePayment { note: "paid".into() }, Utc::now());
        assert!(matches!(again, Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.pickup.lat = 91.0;
        assert!(bad.validate().is_err());

        let mut bad = request();
        bad.dropoff.contact_phone = "12345".into();
        assert!(bad.validate().is_err());

        let mut bad = request();
        bad.weight = Decimal::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = request();
        bad.cod_amount = dec!(-1);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_image_validation() {
        let mut req = request();
        req.images = vec![ImageUpload { filename: "box.PNG".into(), bytes: vec![0; 10] }];
        assert!(req.validate().is_ok());

        req.images = vec![ImageUpload { filename: "box.bmp".into(), bytes: vec![0; 10] }];
        assert!(req.validate().is_err());

        req.images = vec![ImageUpload { filename: "big.jpg".into(), bytes: vec![0; MAX_IMAGE_BYTES + 1] }];
        assert!(req.validate().is_err());

        req.images = (0..6)
            .map(|i| ImageUpload { filename: format!("{}.jpg", i), bytes: vec![1] })
            .collect();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_vehicle_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&VehicleType::Truck500kg).unwrap(),
            "\"truck_500kg\""
        );
        assert_eq!("truck_1000kg".parse::<VehicleType>().unwrap(), VehicleType::Truck1000kg);
        assert!("bus".parse::<VehicleType>().is_err());
    }

    #[test]
    fn test_filter_matches_available_orders() {
        let filter = OrderFilter {
            unassigned: true,
            statuses: vec![OrderStatus::Pending, OrderStatus::Confirmed],
            is_paid: Some(true),
            ..Default::default()
        };
        assert!(filter.matches(&order(OrderStatus::Confirmed, true)));
        assert!(!filter.matches(&order(OrderStatus::Pending, false)));
        let mut taken = order(OrderStatus::Confirmed, true);
        taken.driver_id = Some(Uuid::new_v4());
        assert!(!filter.matches(&taken));
    }
}
