use crate::error::{LacatError, Result};
use crate::session::WalletProvider;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Length of the rolling monthly-allowance window.
pub fn monthly_window() -> Duration {
    Duration::days(30)
}

/// One `getDepositStatus` tuple as returned by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDepositStatus {
    pub amount: u128,
    pub unlock_timestamp: u64,
    pub monthly_withdraw_amount: u128,
    /// Zero when no monthly withdrawal has happened yet.
    pub last_withdraw_timestamp: u64,
}

/// Immutable snapshot of one vault slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: u64,
    /// Remaining value in wei; zero once fully withdrawn.
    pub amount: u128,
    pub unlock_date: DateTime<Utc>,
    /// Allowance cap per window in wei; zero disables the feature.
    pub monthly_withdraw: u128,
    pub last_withdraw: Option<DateTime<Utc>>,
}

impl Deposit {
    pub fn from_raw(id: u64, raw: RawDepositStatus) -> Result<Self> {
        let unlock_date = timestamp_to_utc(raw.unlock_timestamp)?;
        let last_withdraw = match raw.last_withdraw_timestamp {
            0 => None,
            secs => Some(timestamp_to_utc(secs)?),
        };

        Ok(Self {
            id,
            amount: raw.amount,
            unlock_date,
            monthly_withdraw: raw.monthly_withdraw_amount,
            last_withdraw,
        })
    }

    pub fn is_already_withdrawn(&self) -> bool {
        self.amount == 0
    }

    pub fn monthly_withdraw_supported(&self) -> bool {
        self.monthly_withdraw > 0
    }

    pub fn can_be_unlocked(&self, now: DateTime<Utc>) -> bool {
        !self.is_already_withdrawn() && now >= self.unlock_date
    }

    pub fn can_withdraw_monthly_allowance(&self, now: DateTime<Utc>) -> bool {
        if !self.monthly_withdraw_supported() {
            return false;
        }
        match self.last_withdraw {
            None => true,
            Some(last) => now - last >= monthly_window(),
        }
    }

    /// When the next allowance window opens, if one has been consumed.
    pub fn next_monthly_withdraw_at(&self) -> Option<DateTime<Utc>> {
        if !self.monthly_withdraw_supported() {
            return None;
        }
        self.last_withdraw.map(|last| last + monthly_window())
    }

    /// Remaining lock time, `None` once unlockable or withdrawn.
    pub fn time_until_unlock(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_already_withdrawn() || now >= self.unlock_date {
            None
        } else {
            Some(self.unlock_date - now)
        }
    }

    pub fn eligibility(&self, now: DateTime<Utc>) -> Eligibility {
        Eligibility {
            deposit_id: self.id,
            evaluated_at: now,
            already_withdrawn: self.is_already_withdrawn(),
            can_be_unlocked: self.can_be_unlocked(now),
            monthly_withdraw_supported: self.monthly_withdraw_supported(),
            can_withdraw_monthly_allowance: self.can_withdraw_monthly_allowance(now),
        }
    }
}

/// Eligibility of one deposit evaluated at a single instant. Never cache past `evaluated_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub deposit_id: u64,
    pub evaluated_at: DateTime<Utc>,
    pub already_withdrawn: bool,
    pub can_be_unlocked: bool,
    pub monthly_withdraw_supported: bool,
    pub can_withdraw_monthly_allowance: bool,
}

/// Complete mirrored view of the vault, replaced wholesale on every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LacatState {
    pub deposits: Vec<Deposit>,
    pub total_locked_up: u128,
}

impl LacatState {
    pub fn from_deposits(deposits: Vec<Deposit>) -> Self {
        let total_locked_up = deposits
            .iter()
            .fold(0u128, |acc, deposit| acc.saturating_add(deposit.amount));
        Self {
            deposits,
            total_locked_up,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&Deposit> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.deposits.get(index))
            .filter(|deposit| deposit.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Deposit> {
        self.deposits.iter().filter(|d| !d.is_already_withdrawn())
    }

    pub fn unlockable(&self, now: DateTime<Utc>) -> Vec<&Deposit> {
        self.deposits.iter().filter(|d| d.can_be_unlocked(now)).collect()
    }

    pub fn monthly_allowance_available(&self, now: DateTime<Utc>) -> Vec<&Deposit> {
        self.deposits
            .iter()
            .filter(|d| d.can_withdraw_monthly_allowance(now))
            .collect()
    }
}

/// Spendable balance of the connected account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub wei: u128,
    /// `None` until the first successful fetch.
    pub observed_at: Option<DateTime<Utc>>,
}

/// Identity and signing capability, established once per process.
#[derive(Clone)]
pub struct Session {
    pub address: String,
    pub wallet: Arc<dyn WalletProvider>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Human-unit parameters of a new deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub amount_in_eth: f64,
    pub unlock_at: DateTime<Utc>,
    pub monthly_withdraw_basis_points: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
    MonthlyWithdrawal,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdrawal => "withdrawal",
            OperationKind::MonthlyWithdrawal => "monthly withdrawal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

pub(crate) fn timestamp_to_utc(secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| LacatError::ValidationError(format!("Timestamp out of range: {}", secs)))
}
