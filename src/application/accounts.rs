use super::otc::OtcGate;
use crate::domain::otc::{OtcPurpose, validate_phone};
use crate::domain::ports::{Clock, UserStore};
use crate::domain::user::{Role, User};
use crate::error::{EngineError, Result};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::Arc;
use tracing::info;

pub const MIN_PASSWORD_LEN: usize = 6;

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| EngineError::storage(format!("password hashing failed: {}", e)))
}

fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(EngineError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Registration, password reset and login, gated by one-time codes.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserStore>,
    otc: OtcGate,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserStore>, otc: OtcGate, clock: Arc<dyn Clock>) -> Self {
        Self { users, otc, clock }
    }

    async fn consume_code(&self, phone: &str, purpose: OtcPurpose, code: &str) -> Result<()> {
        let verification = self.otc.verify(phone, purpose, code).await?;
        if verification.success {
            Ok(())
        } else {
            Err(EngineError::Validation(verification.message))
        }
    }

    pub async fn register(
        &self,
        phone: &str,
        name: &str,
        password: &str,
        code: &str,
        role: Role,
    ) -> Result<User> {
        validate_phone(phone)?;
        let name = name.trim();
        if !(2..=100).contains(&name.chars().count()) {
            return Err(EngineError::Validation(
                "Name must be between 2 and 100 characters".to_string(),
            ));
        }
        check_password(password)?;
        if role == Role::Admin {
            return Err(EngineError::Forbidden(
                "admin accounts cannot be self-registered".to_string(),
            ));
        }
        if self.users.find_by_phone(phone).await?.is_some() {
            return Err(EngineError::Conflict(format!(
                "phone {} is already registered",
                phone
            )));
        }

        self.consume_code(phone, OtcPurpose::Register, code).await?;

        let mut user = User::new(phone, name, hash_password(password)?, role, self.clock.now());
        user.is_phone_verified = true;
        self.users.insert(user.clone()).await?;
        info!(user_id = %user.id, role = %role, "User registered");
        Ok(user)
    }

    pub async fn reset_password(&self, phone: &str, code: &str, new_password: &str) -> Result<()> {
        check_password(new_password)?;
        let user = self
            .users
            .find_by_phone(phone)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user with phone {}", phone)))?;

        self.consume_code(phone, OtcPurpose::ResetPassword, code).await?;

        self.users
            .set_password(user.id, hash_password(new_password)?, self.clock.now())
            .await?;
        info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    /// Same error for an unknown phone and a wrong password.
    pub async fn authenticate(&self, phone: &str, password: &str) -> Result<User> {
        let denied = || EngineError::Forbidden("invalid phone or password".to_string());
        let user = self.users.find_by_phone(phone).await?.ok_or_else(denied)?;
        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| EngineError::storage(format!("stored password hash is malformed: {}", e)))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| denied())?;
        if !user.is_active {
            return Err(EngineError::Forbidden("account is disabled".to_string()));
        }
        Ok(user)
    }
}
