use crate::clock::{Clock, Ticker};
use crate::error::Result;
use crate::ledger::LacatLedger;
use crate::models::{Deposit, LacatState};
use crate::poller::{is_stopped, next_tick, stop_channel, PollerHandle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of a single synchronization pass.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Published(Arc<LacatState>),
    /// Another pass was still in flight.
    Skipped,
    /// The poller was stopped while the pass was fetching.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscrepancySeverity {
    Critical,
    Info,
}

/// Drift between two consecutive snapshots that the vault rules forbid or that is worth noting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SnapshotDiscrepancy {
    AmountIncreased { id: u64, previous: u128, current: u128 },
    SlotCountDecreased { previous: usize, current: usize },
    SlotAdded { id: u64 },
}

impl SnapshotDiscrepancy {
    pub fn severity(&self) -> DiscrepancySeverity {
        match self {
            SnapshotDiscrepancy::AmountIncreased { .. } => DiscrepancySeverity::Critical,
            SnapshotDiscrepancy::SlotCountDecreased { .. } => DiscrepancySeverity::Critical,
            SnapshotDiscrepancy::SlotAdded { .. } => DiscrepancySeverity::Info,
        }
    }
}

pub fn detect_discrepancies(previous: &LacatState, current: &LacatState) -> Vec<SnapshotDiscrepancy> {
    let mut discrepancies = Vec::new();

    if current.deposits.len() < previous.deposits.len() {
        discrepancies.push(SnapshotDiscrepancy::SlotCountDecreased {
            previous: previous.deposits.len(),
            current: current.deposits.len(),
        });
    }

    for deposit in &current.deposits {
        match previous.get(deposit.id) {
            Some(before) if deposit.amount > before.amount => {
                discrepancies.push(SnapshotDiscrepancy::AmountIncreased {
                    id: deposit.id,
                    previous: before.amount,
                    current: deposit.amount,
                });
            }
            Some(_) => {}
            None => discrepancies.push(SnapshotDiscrepancy::SlotAdded { id: deposit.id }),
        }
    }

    discrepancies
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub passes: u64,
    pub consecutive_failures: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Rebuilds the full [`LacatState`] from the ledger on every tick.
pub struct DepositSynchronizer {
    ledger: Arc<dyn LacatLedger>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<Arc<LacatState>>,
    in_flight: tokio::sync::Mutex<()>,
    passes: AtomicU64,
    consecutive_failures: AtomicU32,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
}

impl DepositSynchronizer {
    pub fn new(ledger: Arc<dyn LacatLedger>, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(Arc::new(LacatState::empty()));
        Self {
            ledger,
            clock,
            state,
            in_flight: tokio::sync::Mutex::new(()),
            passes: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_synced_at: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Arc<LacatState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<LacatState>> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            passes: self.passes.load(Ordering::SeqCst),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            last_synced_at: *self.last_synced_at.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Read every slot sequentially, in index order. Nothing is published.
    pub async fn fetch_state(&self) -> Result<LacatState> {
        let count = self.ledger.get_num_deposits().await?;
        let mut deposits = Vec::with_capacity(usize::try_from(count).unwrap_or(0).min(1024));

        for index in 0..count {
            let raw = self.ledger.get_deposit_status(index).await?;
            deposits.push(Deposit::from_raw(index, raw)?);
        }

        Ok(LacatState::from_deposits(deposits))
    }

    /// Run one pass now. Skipped if a pass is already running.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        self.run_pass(None).await
    }

    async fn run_pass(&self, stop: Option<&watch::Receiver<bool>>) -> Result<SyncOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Deposit sync already in flight, skipping tick");
            return Ok(SyncOutcome::Skipped);
        };

        let result = self.fetch_state().await;
        if stop.map(is_stopped).unwrap_or(false) {
            debug!("Deposit synchronizer stopped mid-pass, discarding result");
            return Ok(SyncOutcome::Discarded);
        }

        match result {
            Ok(state) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(SyncOutcome::Published(self.publish(state)))
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn publish(&self, state: LacatState) -> Arc<LacatState> {
        if self.passes.load(Ordering::SeqCst) > 0 {
            let previous = self.current();
            for discrepancy in detect_discrepancies(&previous, &state) {
                match discrepancy.severity() {
                    DiscrepancySeverity::Critical => {
                        error!("CRITICAL: ledger snapshot drift: {:?}", discrepancy)
                    }
                    DiscrepancySeverity::Info => debug!("Snapshot change: {:?}", discrepancy),
                }
            }
        }

        let state = Arc::new(state);
        self.state.send_replace(state.clone());
        self.passes.fetch_add(1, Ordering::SeqCst);
        *self.last_synced_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());

        debug!(
            "Synchronized {} deposits, total locked {} wei",
            state.deposits.len(),
            state.total_locked_up
        );
        state
    }

    /// Run the sync loop on `ticker` until the returned handle is stopped.
    pub fn spawn<T: Ticker>(self: Arc<Self>, mut ticker: T) -> PollerHandle {
        let (stop_tx, mut stop_rx) = stop_channel();
        let synchronizer = self;

        let join = tokio::spawn(async move {
            info!("Deposit synchronizer started");
            while next_tick(&mut ticker, &mut stop_rx).await {
                match synchronizer.run_pass(Some(&stop_rx)).await {
                    Ok(SyncOutcome::Discarded) => break,
                    Ok(_) => {}
                    Err(e) => warn!(
                        "Deposit sync failed ({} consecutive), keeping last snapshot: {}",
                        synchronizer.consecutive_failures.load(Ordering::SeqCst),
                        e
                    ),
                }
            }
        });

        PollerHandle::new("deposit", stop_tx, join)
    }
}
