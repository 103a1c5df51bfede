pub mod error;
pub mod config;
pub mod models;
pub mod clock;
pub mod units;
pub mod fee_calculator;
pub mod session;
pub mod ledger;
pub mod rpc;
pub mod notifications;
pub mod poller;
pub mod balance_poller;
pub mod deposit_sync;
pub mod transaction_workflow;
pub mod client;

pub use error::{LacatError, Result};
pub use models::*;
pub use config::{FeeSchedule, LacatConfig};
pub use clock::{Clock, IntervalTicker, ManualClock, ManualTicker, SystemClock, TickTrigger, Ticker};
pub use fee_calculator::FeeCalculator;
pub use session::{SessionManager, WalletProvider};
pub use ledger::{LacatLedger, LedgerConnector};
pub use notifications::{Notification, NotificationKind, Notifier, Severity};
pub use poller::PollerHandle;
pub use balance_poller::BalancePoller;
pub use deposit_sync::{DepositSynchronizer, SnapshotDiscrepancy, SyncOutcome, SyncStats};
pub use transaction_workflow::{PendingOperation, SubmittedTransaction, TransactionWorkflow};
pub use client::LacatClient;
