#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lacat_client::{
    LacatError, LacatLedger, LedgerConnector, RawDepositStatus, Result, Session, TxHash,
    TxReceipt, WalletProvider,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const ALICE: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
pub const ETH: u128 = 1_000_000_000_000_000_000;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub fn raw(amount: u128, unlock: u64, monthly: u128, last: u64) -> RawDepositStatus {
    RawDepositStatus {
        amount,
        unlock_timestamp: unlock,
        monthly_withdraw_amount: monthly,
        last_withdraw_timestamp: last,
    }
}

/// Wallet with a scripted balance sequence. Errors are returned while `failing` is set.
pub struct FakeWallet {
    pub address: String,
    pub balances: Mutex<VecDeque<u128>>,
    pub failing: AtomicBool,
    pub fetches: AtomicUsize,
}

impl FakeWallet {
    pub fn new(balances: &[u128]) -> Arc<Self> {
        Arc::new(Self {
            address: ALICE.to_string(),
            balances: Mutex::new(balances.iter().copied().collect()),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            address: self.address.clone(),
            wallet: self.clone(),
        }
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn request_access(&self) -> Result<()> {
        Ok(())
    }

    async fn get_address(&self) -> Result<String> {
        Ok(self.address.clone())
    }

    async fn get_spendable_balance(&self, _address: &str) -> Result<u128> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LacatError::TransientFetch("connection reset".to_string()));
        }
        let mut balances = self.balances.lock().unwrap();
        // The last scripted value repeats once the queue drains.
        if balances.len() > 1 {
            Ok(balances.pop_front().unwrap())
        } else {
            Ok(balances.front().copied().unwrap_or(0))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Deposit {
        unlock_timestamp: u64,
        monthly_withdraw_basis_points: u16,
        value: u128,
    },
    Withdraw(u64),
    WithdrawMonthlyAllowance(u64),
}

/// In-memory vault. Successful submissions take effect immediately.
pub struct FakeLedger {
    pub slots: Mutex<Vec<RawDepositStatus>>,
    pub calls: Mutex<Vec<Call>>,
    pub reads: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub reject_submissions: AtomicBool,
    pub submission_error: Mutex<Option<String>>,
    pub revert: AtomicBool,
    pub hold_confirmations: AtomicBool,
    pub release: Notify,
    /// When set, `get_num_deposits` waits on `read_gate` before answering.
    pub gate_reads: AtomicBool,
    pub read_gate: Notify,
    pub read_started: Notify,
    pub now: AtomicU64,
    next_hash: AtomicU64,
}

impl FakeLedger {
    pub fn new(slots: Vec<RawDepositStatus>) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(slots),
            calls: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            reject_submissions: AtomicBool::new(false),
            submission_error: Mutex::new(None),
            revert: AtomicBool::new(false),
            hold_confirmations: AtomicBool::new(false),
            release: Notify::new(),
            gate_reads: AtomicBool::new(false),
            read_gate: Notify::new(),
            read_started: Notify::new(),
            now: AtomicU64::new(1_700_000_000),
            next_hash: AtomicU64::new(1),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_slot(&self, index: usize, status: RawDepositStatus) {
        self.slots.lock().unwrap()[index] = status;
    }

    fn submit(&self, call: Call) -> Result<TxHash> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(LacatError::Rejected("user rejected transaction".to_string()));
        }
        if let Some(message) = self.submission_error.lock().unwrap().clone() {
            return Err(LacatError::SubmissionFailed(message));
        }

        let mut slots = self.slots.lock().unwrap();
        match &call {
            Call::Deposit {
                unlock_timestamp,
                monthly_withdraw_basis_points,
                value,
            } => slots.push(raw(
                *value,
                *unlock_timestamp,
                value * u128::from(*monthly_withdraw_basis_points) / 10_000,
                0,
            )),
            Call::Withdraw(id) => {
                if let Some(slot) = slots.get_mut(*id as usize) {
                    slot.amount = 0;
                }
            }
            Call::WithdrawMonthlyAllowance(id) => {
                if let Some(slot) = slots.get_mut(*id as usize) {
                    slot.amount = slot.amount.saturating_sub(slot.monthly_withdraw_amount);
                    slot.last_withdraw_timestamp = self.now.load(Ordering::SeqCst);
                }
            }
        }
        drop(slots);

        self.calls.lock().unwrap().push(call);
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        Ok(TxHash(format!("0x{:064x}", n)))
    }
}

#[async_trait]
impl LacatLedger for FakeLedger {
    async fn get_num_deposits(&self) -> Result<u64> {
        self.read_started.notify_one();
        if self.gate_reads.load(Ordering::SeqCst) {
            self.read_gate.notified().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LacatError::TransientFetch("rpc timeout".to_string()));
        }
        Ok(self.slots.lock().unwrap().len() as u64)
    }

    async fn get_deposit_status(&self, index: u64) -> Result<RawDepositStatus> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LacatError::TransientFetch("rpc timeout".to_string()));
        }
        self.slots
            .lock()
            .unwrap()
            .get(index as usize)
            .copied()
            .ok_or_else(|| LacatError::TransientFetch(format!("no slot {}", index)))
    }

    async fn deposit(
        &self,
        unlock_timestamp: u64,
        monthly_withdraw_basis_points: u16,
        value: u128,
    ) -> Result<TxHash> {
        self.submit(Call::Deposit {
            unlock_timestamp,
            monthly_withdraw_basis_points,
            value,
        })
    }

    async fn withdraw(&self, deposit_id: u64) -> Result<TxHash> {
        self.submit(Call::Withdraw(deposit_id))
    }

    async fn withdraw_monthly_allowance(&self, deposit_id: u64) -> Result<TxHash> {
        self.submit(Call::WithdrawMonthlyAllowance(deposit_id))
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash, _confirmations: u64) -> Result<TxReceipt> {
        if self.hold_confirmations.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(TxReceipt {
            tx_hash: tx_hash.clone(),
            block_number: 42,
            success: !self.revert.load(Ordering::SeqCst),
        })
    }
}

pub struct FakeConnector {
    pub ledger: Arc<FakeLedger>,
    pub bound_address: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn new(ledger: Arc<FakeLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            bound_address: Mutex::new(None),
        })
    }
}

#[async_trait]
impl LedgerConnector for FakeConnector {
    async fn connect(&self, _session: &Session, address: &str) -> Result<Arc<dyn LacatLedger>> {
        *self.bound_address.lock().unwrap() = Some(address.to_string());
        Ok(self.ledger.clone())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait for the next publish on a watch channel.
pub async fn next_value<T>(rx: &mut tokio::sync::watch::Receiver<T>) {
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.changed())
        .await
        .expect("no update in time")
        .expect("sender dropped");
}
