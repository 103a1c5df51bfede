use crate::error::{LacatError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LACAT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// Advisory fee rates. The ledger computes the authoritative fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_fee_basis_points: u32,
    pub monthly_withdraw_fee_basis_points: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee_basis_points: 35,
            monthly_withdraw_fee_basis_points: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LacatConfig {
    pub rpc_url: String,
    /// Upper bound on a single JSON-RPC request. Must not exceed either poll interval.
    pub rpc_timeout_seconds: u64,
    pub lacat_address: String,
    pub balance_poll_interval_seconds: u64,
    pub deposit_poll_interval_seconds: u64,
    pub fees: FeeSchedule,
    pub required_confirmations: u64,
    pub confirmation_poll_interval_ms: u64,
    pub confirmation_timeout_seconds: Option<u64>,
    pub max_concurrent_submissions: usize,
    pub notification_capacity: usize,
}

impl Default for LacatConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            rpc_timeout_seconds: 5,
            lacat_address: DEFAULT_LACAT_ADDRESS.to_string(),
            balance_poll_interval_seconds: 10,
            deposit_poll_interval_seconds: 10,
            fees: FeeSchedule::default(),
            required_confirmations: 1,
            confirmation_poll_interval_ms: 1000,
            confirmation_timeout_seconds: None,
            max_concurrent_submissions: 5,
            notification_capacity: 64,
        }
    }
}

impl LacatConfig {
    /// Load configuration from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            rpc_url: std::env::var("LACAT_RPC_URL").unwrap_or(defaults.rpc_url),
            rpc_timeout_seconds: parse_var("RPC_TIMEOUT_SECONDS", defaults.rpc_timeout_seconds)?,
            lacat_address: std::env::var("LACAT_ADDRESS").unwrap_or(defaults.lacat_address),
            balance_poll_interval_seconds: parse_var(
                "BALANCE_POLL_INTERVAL_SECONDS",
                defaults.balance_poll_interval_seconds,
            )?,
            deposit_poll_interval_seconds: parse_var(
                "DEPOSIT_POLL_INTERVAL_SECONDS",
                defaults.deposit_poll_interval_seconds,
            )?,
            fees: FeeSchedule {
                base_fee_basis_points: parse_var(
                    "BASE_FEE_BASIS_POINTS",
                    defaults.fees.base_fee_basis_points,
                )?,
                monthly_withdraw_fee_basis_points: parse_var(
                    "MONTHLY_WITHDRAW_FEE_BASIS_POINTS",
                    defaults.fees.monthly_withdraw_fee_basis_points,
                )?,
            },
            required_confirmations: parse_var(
                "REQUIRED_CONFIRMATIONS",
                defaults.required_confirmations,
            )?,
            confirmation_poll_interval_ms: parse_var(
                "CONFIRMATION_POLL_INTERVAL_MS",
                defaults.confirmation_poll_interval_ms,
            )?,
            confirmation_timeout_seconds: match std::env::var("CONFIRMATION_TIMEOUT_SECONDS") {
                Ok(raw) => Some(raw.parse().map_err(|_| {
                    LacatError::ConfigurationError("Invalid CONFIRMATION_TIMEOUT_SECONDS".to_string())
                })?),
                Err(_) => None,
            },
            max_concurrent_submissions: parse_var(
                "MAX_CONCURRENT_SUBMISSIONS",
                defaults.max_concurrent_submissions,
            )?,
            notification_capacity: parse_var(
                "NOTIFICATION_CAPACITY",
                defaults.notification_capacity,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.balance_poll_interval_seconds == 0 || self.deposit_poll_interval_seconds == 0 {
            return Err(LacatError::ConfigurationError(
                "Poll intervals must be at least one second".to_string(),
            ));
        }
        let shortest_poll = self
            .balance_poll_interval_seconds
            .min(self.deposit_poll_interval_seconds);
        if self.rpc_timeout_seconds == 0 || self.rpc_timeout_seconds > shortest_poll {
            return Err(LacatError::ConfigurationError(format!(
                "RPC_TIMEOUT_SECONDS must be between 1 and {} (the shortest poll interval), got {}",
                shortest_poll, self.rpc_timeout_seconds
            )));
        }
        if self.required_confirmations == 0 {
            return Err(LacatError::ConfigurationError(
                "REQUIRED_CONFIRMATIONS must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_submissions == 0 || self.notification_capacity == 0 {
            return Err(LacatError::ConfigurationError(
                "MAX_CONCURRENT_SUBMISSIONS and NOTIFICATION_CAPACITY must be positive".to_string(),
            ));
        }
        let address = self.lacat_address.trim_start_matches("0x");
        if address.len() != 40 || hex::decode(address).is_err() {
            return Err(LacatError::ConfigurationError(format!(
                "Invalid LACAT_ADDRESS: {}",
                self.lacat_address
            )));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_secs(self.balance_poll_interval_seconds)
    }

    pub fn deposit_poll_interval(&self) -> Duration {
        Duration::from_secs(self.deposit_poll_interval_seconds)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_seconds.map(Duration::from_secs)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| LacatError::ConfigurationError(format!("Invalid {}", name))),
        Err(_) => Ok(default),
    }
}
