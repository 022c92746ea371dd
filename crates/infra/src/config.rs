//! Process configuration from the environment.
//!
//! An optional `.env` file is loaded first. Unset variables take their
//! documented default; a variable that is set but malformed is an error
//! naming that variable.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use dormswap_core::Cents;
use dormswap_inventory::{FeeSchedule, PayoutRates};

pub const DEV_JWT_SECRET: &str = "dormswap-dev-secret-change-me";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// `None` runs against the in-memory payment provider.
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub public_base_url: String,
    pub payout_rates: PayoutRates,
    pub fees: FeeSchedule,
    pub activation_fee: Cents,
    pub lock_wait: Duration,
    pub pickup_period_default: bool,
    /// `None` disables the reconciliation sweep.
    pub sweep_interval: Option<Duration>,
    pub sweep_grace: Duration,
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, ".env file could not be loaded");
            }
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let jwt_secret = match env.string("JWT_SECRET") {
            Some(s) => s,
            None => {
                tracing::warn!("JWT_SECRET not set; using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };
        let webhook_secret = env.string("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        if webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set; every webhook will fail verification");
        }
        let sweep_secs: u64 = env.parse("RECONCILE_SWEEP_SECS", 0)?;

        Ok(Self {
            bind_addr: env.parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database_url: env.string("DATABASE_URL"),
            jwt_secret,
            stripe_secret_key: env.string("STRIPE_SECRET_KEY"),
            stripe_api_base: env
                .string("STRIPE_API_BASE")
                .unwrap_or_else(|| dormswap_payments::stripe::DEFAULT_API_BASE.to_string()),
            webhook_secret,
            webhook_tolerance_secs: env.parse(
                "WEBHOOK_TOLERANCE_SECS",
                dormswap_payments::signature::DEFAULT_TOLERANCE_SECS,
            )?,
            public_base_url: env
                .string("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            payout_rates: PayoutRates {
                online_bps: env.parse("PAYOUT_RATE_ONLINE_BPS", PayoutRates::default().online_bps)?,
                in_person_bps: env
                    .parse("PAYOUT_RATE_IN_PERSON_BPS", PayoutRates::default().in_person_bps)?,
            },
            fees: FeeSchedule {
                service_fee: Cents::new(
                    env.parse("SERVICE_FEE_CENTS", FeeSchedule::default().service_fee.get())?,
                ),
                large_item_fee: Cents::new(
                    env.parse("LARGE_ITEM_FEE_CENTS", FeeSchedule::default().large_item_fee.get())?,
                ),
            },
            activation_fee: Cents::new(env.parse("SELLER_ACTIVATION_FEE_CENTS", 1_500)?),
            lock_wait: Duration::from_millis(env.parse("LOCK_WAIT_MS", 2_000)?),
            pickup_period_default: env.parse("PICKUP_PERIOD_ACTIVE", true)?,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            sweep_grace: Duration::from_secs(env.parse("RECONCILE_GRACE_SECS", 900)?),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: core::str::FromStr,
        T::Err: core::fmt::Display,
    {
        match self.string(var) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: format!("'{raw}': {e}"),
            }),
        }
    }
}
