use crate::error::Result;
use crate::models::{RawDepositStatus, Session, TxHash, TxReceipt};
use async_trait::async_trait;
use std::sync::Arc;

/// Contract surface of the time-release vault, bound to one signer.
#[async_trait]
pub trait LacatLedger: Send + Sync {
    async fn get_num_deposits(&self) -> Result<u64>;

    async fn get_deposit_status(&self, index: u64) -> Result<RawDepositStatus>;

    /// Lock `value` wei until `unlock_timestamp` (seconds).
    async fn deposit(
        &self,
        unlock_timestamp: u64,
        monthly_withdraw_basis_points: u16,
        value: u128,
    ) -> Result<TxHash>;

    async fn withdraw(&self, deposit_id: u64) -> Result<TxHash>;

    async fn withdraw_monthly_allowance(&self, deposit_id: u64) -> Result<TxHash>;

    /// Resolve once the transaction is included and followed by `confirmations - 1` blocks.
    async fn wait_for_confirmation(&self, tx_hash: &TxHash, confirmations: u64) -> Result<TxReceipt>;
}

/// Binds the vault at `address` to the session's signer.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self, session: &Session, address: &str) -> Result<Arc<dyn LacatLedger>>;
}
