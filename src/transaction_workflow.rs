use crate::clock::Clock;
use crate::config::LacatConfig;
use crate::error::{LacatError, Result};
use crate::ledger::LacatLedger;
use crate::models::{DepositRequest, OperationKind, Session, TxHash, TxReceipt};
use crate::notifications::{Notification, Notifier};
use crate::units::{eth_to_wei, validate_basis_points};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A mutating call in ledger base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerCall {
    Deposit {
        unlock_timestamp: u64,
        monthly_withdraw_basis_points: u16,
        value: u128,
    },
    Withdraw {
        deposit_id: u64,
    },
    WithdrawMonthlyAllowance {
        deposit_id: u64,
    },
}

impl LedgerCall {
    fn kind(&self) -> OperationKind {
        match self {
            LedgerCall::Deposit { .. } => OperationKind::Deposit,
            LedgerCall::Withdraw { .. } => OperationKind::Withdrawal,
            LedgerCall::WithdrawMonthlyAllowance { .. } => OperationKind::MonthlyWithdrawal,
        }
    }

    fn deposit_id(&self) -> Option<u64> {
        match self {
            LedgerCall::Deposit { .. } => None,
            LedgerCall::Withdraw { deposit_id } | LedgerCall::WithdrawMonthlyAllowance { deposit_id } => {
                Some(*deposit_id)
            }
        }
    }

    async fn submit(&self, ledger: &dyn LacatLedger) -> Result<TxHash> {
        match *self {
            LedgerCall::Deposit {
                unlock_timestamp,
                monthly_withdraw_basis_points,
                value,
            } => {
                ledger
                    .deposit(unlock_timestamp, monthly_withdraw_basis_points, value)
                    .await
            }
            LedgerCall::Withdraw { deposit_id } => ledger.withdraw(deposit_id).await,
            LedgerCall::WithdrawMonthlyAllowance { deposit_id } => {
                ledger.withdraw_monthly_allowance(deposit_id).await
            }
        }
    }
}

/// A transaction awaiting confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct PendingOperation {
    pub operation_id: Uuid,
    pub operation: OperationKind,
    pub deposit_id: Option<u64>,
    pub tx_hash: TxHash,
    pub submitted_at: DateTime<Utc>,
}

/// Returned once the ledger accepted a submission.
#[derive(Debug)]
pub struct SubmittedTransaction {
    pub operation_id: Uuid,
    pub operation: OperationKind,
    pub tx_hash: TxHash,
    /// Detached confirmation task. Dropping this handle does not cancel it.
    pub confirmation: JoinHandle<Result<TxReceipt>>,
}

/// Submit -> notify -> confirm pipeline for the three mutating vault operations.
///
/// The local mirror is never touched here; effects show up through the next
/// synchronizer and balance ticks.
pub struct TransactionWorkflow {
    session: watch::Receiver<Option<Session>>,
    target: watch::Receiver<Option<Arc<dyn LacatLedger>>>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    required_confirmations: u64,
    confirmation_timeout: Option<Duration>,
    submission_permits: Arc<Semaphore>,
    pending: Arc<RwLock<HashMap<Uuid, PendingOperation>>>,
}

impl TransactionWorkflow {
    pub fn new(
        session: watch::Receiver<Option<Session>>,
        target: watch::Receiver<Option<Arc<dyn LacatLedger>>>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: &LacatConfig,
    ) -> Self {
        Self {
            session,
            target,
            notifier,
            clock,
            required_confirmations: config.required_confirmations,
            confirmation_timeout: config.confirmation_timeout(),
            submission_permits: Arc::new(Semaphore::new(config.max_concurrent_submissions)),
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Lock `amount_in_eth` until `unlock_at`. `Ok(None)` when no session or target is available.
    pub async fn make_deposit(&self, request: &DepositRequest) -> Result<Option<SubmittedTransaction>> {
        let Some(ledger) = self.ready_target() else {
            return Ok(None);
        };

        let value = eth_to_wei(request.amount_in_eth)?;
        if value == 0 {
            return Err(LacatError::ValidationError(
                "Deposit amount must be greater than zero".to_string(),
            ));
        }
        let monthly_withdraw_basis_points =
            validate_basis_points(request.monthly_withdraw_basis_points)?;
        let unlock_timestamp = u64::try_from(request.unlock_at.timestamp()).map_err(|_| {
            LacatError::ValidationError(format!("Unlock date before epoch: {}", request.unlock_at))
        })?;

        let call = LedgerCall::Deposit {
            unlock_timestamp,
            monthly_withdraw_basis_points,
            value,
        };
        self.execute(ledger, call).await.map(Some)
    }

    pub async fn withdraw_full(&self, deposit_id: u64) -> Result<Option<SubmittedTransaction>> {
        let Some(ledger) = self.ready_target() else {
            return Ok(None);
        };
        self.execute(ledger, LedgerCall::Withdraw { deposit_id })
            .await
            .map(Some)
    }

    pub async fn withdraw_monthly_allowance(
        &self,
        deposit_id: u64,
    ) -> Result<Option<SubmittedTransaction>> {
        let Some(ledger) = self.ready_target() else {
            return Ok(None);
        };
        self.execute(ledger, LedgerCall::WithdrawMonthlyAllowance { deposit_id })
            .await
            .map(Some)
    }

    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        let pending = self.pending.read().await;
        let mut operations: Vec<_> = pending.values().cloned().collect();
        operations.sort_by_key(|op| op.submitted_at);
        operations
    }

    fn ready_target(&self) -> Option<Arc<dyn LacatLedger>> {
        if self.session.borrow().is_none() {
            debug!("No session established, ignoring request");
            return None;
        }
        let target = self.target.borrow().clone();
        if target.is_none() {
            debug!("Vault target not bound yet, ignoring request");
        }
        target
    }

    async fn execute(&self, ledger: Arc<dyn LacatLedger>, call: LedgerCall) -> Result<SubmittedTransaction> {
        let operation_id = Uuid::new_v4();
        let operation = call.kind();
        info!("Submitting {} (operation {})", operation, operation_id);

        let tx_hash = {
            let _permit = self
                .submission_permits
                .acquire()
                .await
                .map_err(|e| LacatError::InternalError(format!("Submission permits closed: {}", e)))?;

            match call.submit(ledger.as_ref()).await {
                Ok(tx_hash) => tx_hash,
                Err(e) if e.is_rejection() => {
                    warn!("{} cancelled by signer (operation {})", operation, operation_id);
                    self.notifier
                        .emit(Notification::cancelled(operation_id, operation, self.clock.now()));
                    return Err(e);
                }
                Err(e) => {
                    error!("{} submission failed (operation {}): {}", operation, operation_id, e);
                    return Err(e);
                }
            }
        };

        info!("{} submitted: {} (operation {})", operation, tx_hash, operation_id);
        self.notifier
            .emit(Notification::submitted(operation_id, operation, tx_hash.clone(), self.clock.now()));

        self.pending.write().await.insert(
            operation_id,
            PendingOperation {
                operation_id,
                operation,
                deposit_id: call.deposit_id(),
                tx_hash: tx_hash.clone(),
                submitted_at: self.clock.now(),
            },
        );

        let confirmation = self.spawn_confirmation(ledger, operation_id, operation, tx_hash.clone());

        Ok(SubmittedTransaction {
            operation_id,
            operation,
            tx_hash,
            confirmation,
        })
    }

    fn spawn_confirmation(
        &self,
        ledger: Arc<dyn LacatLedger>,
        operation_id: Uuid,
        operation: OperationKind,
        tx_hash: TxHash,
    ) -> JoinHandle<Result<TxReceipt>> {
        let notifier = self.notifier.clone();
        let clock = self.clock.clone();
        let pending = self.pending.clone();
        let confirmations = self.required_confirmations;
        let limit = self.confirmation_timeout;

        tokio::spawn(async move {
            let wait = ledger.wait_for_confirmation(&tx_hash, confirmations);
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(result) => result,
                    Err(_) => Err(LacatError::ConfirmationTimeout(tx_hash.to_string())),
                },
                None => wait.await,
            };
            let result = result.and_then(|receipt| {
                if receipt.success {
                    Ok(receipt)
                } else {
                    Err(LacatError::Reverted(tx_hash.to_string()))
                }
            });

            pending.write().await.remove(&operation_id);

            match &result {
                Ok(receipt) => {
                    info!(
                        "{} confirmed in block {}: {} (operation {})",
                        operation, receipt.block_number, tx_hash, operation_id
                    );
                    notifier.emit(Notification::confirmed(
                        operation_id,
                        operation,
                        tx_hash.clone(),
                        clock.now(),
                    ));
                }
                Err(e) => error!(
                    "{} {} did not confirm (operation {}): {}",
                    operation, tx_hash, operation_id, e
                ),
            }
            result
        })
    }
}
