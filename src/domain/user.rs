use super::money::{Amount, Balance};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Driver,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Driver => "driver",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            other => Err(EngineError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// A single atomic change to a wallet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WalletChange {
    /// Spend on a booking; rejected when the balance cannot cover it.
    Debit(Amount),
    /// Funds arriving from a settled top-up.
    Topup(Amount),
    /// Money returned for a cancelled paid order. Not counted as a top-up.
    Refund(Amount),
}

/// Denormalized wallet cached on the user document.
///
/// Invariant: `balance == total_topup - total_usage + total_refund` and `balance >= 0`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Wallet {
    pub balance: Balance,
    pub total_topup: Balance,
    pub total_usage: Balance,
    pub total_refund: Balance,
}

impl Wallet {
    /// Applies `change` in place, or leaves the wallet untouched and fails.
    pub fn apply(&mut self, change: WalletChange) -> Result<()> {
        match change {
            WalletChange::Debit(amount) => {
                let amount = Balance::from(amount);
                if self.balance < amount {
                    return Err(EngineError::InsufficientFunds {
                        balance: self.balance.value(),
                        required: amount.value(),
                    });
                }
                self.balance -= amount;
                self.total_usage += amount;
            }
            WalletChange::Topup(amount) => {
                self.balance += amount.into();
                self.total_topup += amount.into();
            }
            WalletChange::Refund(amount) => {
                self.balance += amount.into();
                self.total_refund += amount.into();
            }
        }
        Ok(())
    }

    /// Balance implied by the running totals.
    pub fn expected_balance(&self) -> Balance {
        self.total_topup - self.total_usage + self.total_refund
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.expected_balance() && !self.balance.is_negative()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct User {
    pub id: UserId,
    pub phone: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub is_phone_verified: bool,
    pub wallet: Wallet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        phone: impl Into<String>,
        name: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            name: name.into(),
            password_hash: password_hash.into(),
            role,
            is_active: true,
            is_phone_verified: false,
            wallet: Wallet::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::Member {
            id: self.id,
            role: self.role,
        }
    }
}

/// Who is performing an operation.
///
/// Identity verification happens upstream; the engine trusts the id and role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The engine itself, e.g. confirming an order after auto-payment.
    System,
    Member { id: UserId, role: Role },
}

impl Actor {
    pub fn member(id: UserId, role: Role) -> Self {
        Actor::Member { id, role }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::System => None,
            Actor::Member { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Member { role: Role::Admin, .. })
    }

    pub fn is_driver(&self) -> bool {
        matches!(self, Actor::Member { role: Role::Driver, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[test]
    fn test_wallet_topup_and_debit() {
        let mut wallet = Wallet::default();
        wallet.apply(WalletChange::Topup(amount(dec!(100000)))).unwrap();
        wallet.apply(WalletChange::Debit(amount(dec!(46000)))).unwrap();

        assert_eq!(wallet.balance, Balance::new(dec!(54000)));
        assert_eq!(wallet.total_topup, Balance::new(dec!(100000)));
        assert_eq!(wallet.total_usage, Balance::new(dec!(46000)));
        assert!(wallet.is_consistent());
    }

    #[test]
    fn test_wallet_debit_insufficient_leaves_state() {
        let mut wallet = Wallet::default();
        wallet.apply(WalletChange::Topup(amount(dec!(10000)))).unwrap();
        let before = wallet.clone();

        let result = wallet.apply(WalletChange::Debit(amount(dec!(10001))));
        assert!(matches!(result, Err(EngineError::InsufficientFunds { .. })));
        assert_eq!(wallet, before);
    }

    #[test]
    fn test_wallet_refund_excluded_from_topup() {
        let mut wallet = Wallet::default();
        wallet.apply(WalletChange::Topup(amount(dec!(50000)))).unwrap();
        wallet.apply(WalletChange::Debit(amount(dec!(50000)))).unwrap();
        wallet.apply(WalletChange::Refund(amount(dec!(50000)))).unwrap();

        assert_eq!(wallet.balance, Balance::new(dec!(50000)));
        assert_eq!(wallet.total_topup, Balance::new(dec!(50000)));
        assert_eq!(wallet.total_refund, Balance::new(dec!(50000)));
        assert!(wallet.is_consistent());
    }

    #[test]
    fn test_actor_roles() {
        let id = Uuid::new_v4();
        let admin = Actor::member(id, Role::Admin);
        assert!(admin.is_admin());
        assert_eq!(admin.user_id(), Some(id));
        assert!(!admin.is_driver());
        assert_eq!(Actor::System.user_id(), None);
    }
}
