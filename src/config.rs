use crate::error::{EngineError, Result};
use chrono::Duration;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(EngineError::Config(format!(
                "SHIPWAY_ENV must be development or production, got {}",
                other
            ))),
        }
    }
}

/// Runtime settings for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub environment: Environment,
    pub otp_ttl: Duration,
    pub otp_max_attempts: u32,
    /// Payment window of a pending top-up.
    pub topup_ttl: Duration,
    pub webhook_secret: Option<String>,
    pub require_signature: bool,
    pub upload_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            otp_ttl: Duration::minutes(5),
            otp_max_attempts: 5,
            topup_ttl: Duration::minutes(15),
            webhook_secret: None,
            require_signature: false,
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

impl EngineConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let environment = match lookup("SHIPWAY_ENV") {
            Some(value) => value.parse()?,
            None => defaults.environment,
        };
        let otp_minutes: i64 = parse_var(&lookup, "OTP_EXPIRE_MINUTES", 5)?;
        let topup_minutes: i64 = parse_var(&lookup, "TOPUP_EXPIRE_MINUTES", 15)?;
        let otp_max_attempts = parse_var(&lookup, "OTP_MAX_ATTEMPTS", defaults.otp_max_attempts)?;
        let require_signature = parse_var(
            &lookup,
            "PAYMENT_REQUIRE_SIGNATURE",
            environment.is_production(),
        )?;

        let config = Self {
            environment,
            otp_ttl: minutes("OTP_EXPIRE_MINUTES", otp_minutes)?,
            otp_max_attempts,
            topup_ttl: minutes("TOPUP_EXPIRE_MINUTES", topup_minutes)?,
            webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            require_signature,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.otp_ttl <= Duration::zero() || self.topup_ttl <= Duration::zero() {
            return Err(EngineError::Config(
                "expiry windows must be positive".to_string(),
            ));
        }
        if self.otp_max_attempts == 0 {
            return Err(EngineError::Config(
                "OTP_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.require_signature && self.webhook_secret.is_none() {
            return Err(EngineError::Config(
                "PAYMENT_WEBHOOK_SECRET is required when signatures are enforced".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_required_signature(mut self, required: bool) -> Self {
        self.require_signature = required;
        self
    }

    pub fn with_otp_max_attempts(mut self, attempts: u32) -> Self {
        self.otp_max_attempts = attempts;
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EngineError::Config(format!("{} is invalid: {}", key, e))),
        None => Ok(default),
    }
}

fn minutes(key: &str, value: i64) -> Result<Duration> {
    Duration::try_minutes(value)
        .ok_or_else(|| EngineError::Config(format!("{} is out of range: {}", key, value)))
}
