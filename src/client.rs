use crate::balance_poller::BalancePoller;
use crate::clock::{Clock, IntervalTicker, Ticker};
use crate::config::LacatConfig;
use crate::deposit_sync::{DepositSynchronizer, SyncStats};
use crate::error::Result;
use crate::fee_calculator::FeeCalculator;
use crate::ledger::{LacatLedger, LedgerConnector};
use crate::models::{Balance, Eligibility, LacatState, Session};
use crate::notifications::{Notification, Notifier};
use crate::poller::PollerHandle;
use crate::session::{SessionManager, WalletProvider};
use crate::transaction_workflow::TransactionWorkflow;
use futures::future::join_all;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::info;

struct Running {
    balance: Arc<BalancePoller>,
    deposits: Arc<DepositSynchronizer>,
}

/// Everything the presentation layer reads from or invokes.
pub struct LacatClient {
    config: LacatConfig,
    clock: Arc<dyn Clock>,
    sessions: SessionManager,
    connector: Arc<dyn LedgerConnector>,
    target: watch::Sender<Option<Arc<dyn LacatLedger>>>,
    notifier: Notifier,
    workflow: TransactionWorkflow,
    fees: FeeCalculator,
    running: RwLock<Option<Running>>,
    handles: Mutex<Vec<PollerHandle>>,
}

impl LacatClient {
    pub fn new(
        config: LacatConfig,
        wallet: Option<Arc<dyn WalletProvider>>,
        connector: Arc<dyn LedgerConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionManager::new(wallet);
        let (target, target_rx) = watch::channel(None);
        let notifier = Notifier::new(config.notification_capacity);
        let workflow = TransactionWorkflow::new(
            sessions.subscribe(),
            target_rx,
            notifier.clone(),
            clock.clone(),
            &config,
        );
        let fees = FeeCalculator::new(config.fees);

        Self {
            config,
            clock,
            sessions,
            connector,
            target,
            notifier,
            workflow,
            fees,
            running: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Connect the wallet, bind the vault and start both pollers on their configured cadence.
    ///
    /// Returns the existing session without touching the pollers while they are running.
    pub async fn connect(&self) -> Result<Session> {
        self.connect_with_tickers(
            IntervalTicker::new(self.config.balance_poll_interval()),
            IntervalTicker::new(self.config.deposit_poll_interval()),
        )
        .await
    }

    pub async fn connect_with_tickers<B: Ticker, D: Ticker>(
        &self,
        balance_ticker: B,
        deposit_ticker: D,
    ) -> Result<Session> {
        let mut handles = self.handles.lock().await;

        let session = self.sessions.connect().await?;
        if self.is_running() {
            return Ok(session);
        }

        let ledger = self
            .connector
            .connect(&session, &self.config.lacat_address)
            .await?;
        self.target.send_replace(Some(ledger.clone()));

        let balance = Arc::new(BalancePoller::new(session.clone(), self.clock.clone()));
        let deposits = Arc::new(DepositSynchronizer::new(ledger, self.clock.clone()));

        handles.push(balance.clone().spawn(balance_ticker));
        handles.push(deposits.clone().spawn(deposit_ticker));
        *self.running.write().unwrap_or_else(|e| e.into_inner()) = Some(Running { balance, deposits });

        info!(
            "Lacat client running for {} against {}",
            session.address, self.config.lacat_address
        );
        Ok(session)
    }

    pub fn config(&self) -> &LacatConfig {
        &self.config
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.current()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn balance(&self) -> Balance {
        self.with_running(|r| r.balance.current()).unwrap_or_default()
    }

    pub fn state(&self) -> Arc<LacatState> {
        self.with_running(|r| r.deposits.current())
            .unwrap_or_else(|| Arc::new(LacatState::empty()))
    }

    /// `None` until connected.
    pub fn subscribe_balance(&self) -> Option<watch::Receiver<Balance>> {
        self.with_running(|r| r.balance.subscribe())
    }

    /// `None` until connected.
    pub fn subscribe_state(&self) -> Option<watch::Receiver<Arc<LacatState>>> {
        self.with_running(|r| r.deposits.subscribe())
    }

    pub fn sync_stats(&self) -> Option<SyncStats> {
        self.with_running(|r| r.deposits.stats())
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn workflow(&self) -> &TransactionWorkflow {
        &self.workflow
    }

    pub fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Evaluate a deposit against the current snapshot and the current time.
    pub fn eligibility(&self, deposit_id: u64) -> Option<Eligibility> {
        let now = self.clock.now();
        self.state().get(deposit_id).map(|deposit| deposit.eligibility(now))
    }

    /// Stop both pollers. Pending confirmations keep running to completion.
    ///
    /// The session survives; a later `connect` starts fresh pollers.
    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        let stopped = self
            .running
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if stopped.is_none() {
            return;
        }
        join_all(handles.drain(..).map(PollerHandle::shutdown)).await;
        info!("Lacat client stopped");
    }

    fn with_running<T>(&self, f: impl FnOnce(&Running) -> T) -> Option<T> {
        self.running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(f)
    }
}
