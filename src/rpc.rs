//! Ethereum JSON-RPC backend for the wallet and vault traits.
//!
//! Targets a node that holds unlocked accounts (a local dev chain or a
//! signing proxy): access is requested with `eth_requestAccounts`, and
//! transactions are sent with `eth_sendTransaction` so the node signs them.

use crate::error::{LacatError, Result};
use crate::ledger::{LacatLedger, LedgerConnector};
use crate::models::{RawDepositStatus, Session, TxHash, TxReceipt};
use crate::session::WalletProvider;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;
const METHOD_NOT_FOUND_CODE: i64 = -32601;

pub mod abi {
    use crate::error::{LacatError, Result};

    pub const GET_NUM_DEPOSITS: [u8; 4] = [0xd3, 0x7a, 0xd4, 0xbe];
    pub const GET_DEPOSIT_STATUS: [u8; 4] = [0xad, 0x0d, 0x92, 0x14];
    pub const DEPOSIT: [u8; 4] = [0xe2, 0xbb, 0xb1, 0x58];
    pub const WITHDRAW: [u8; 4] = [0x2e, 0x1a, 0x7d, 0x4d];
    pub const WITHDRAW_MONTHLY_ALLOWANCE: [u8; 4] = [0xb2, 0xe4, 0xb0, 0x42];

    const WORD: usize = 32;

    /// Selector followed by each argument as a 32-byte big-endian word.
    pub fn encode_call(selector: [u8; 4], args: &[u128]) -> String {
        let mut data = Vec::with_capacity(4 + args.len() * WORD);
        data.extend_from_slice(&selector);
        for arg in args {
            data.extend_from_slice(&[0u8; 16]);
            data.extend_from_slice(&arg.to_be_bytes());
        }
        format!("0x{}", hex::encode(data))
    }

    pub fn decode_words(data: &str) -> Result<Vec<u128>> {
        let bytes = hex::decode(data.trim_start_matches("0x"))
            .map_err(|e| LacatError::ValidationError(format!("Invalid return data: {}", e)))?;
        if bytes.len() % WORD != 0 {
            return Err(LacatError::ValidationError(format!(
                "Return data is not word aligned: {} bytes",
                bytes.len()
            )));
        }

        bytes
            .chunks(WORD)
            .map(|word| {
                let (high, low) = word.split_at(16);
                if high.iter().any(|b| *b != 0) {
                    return Err(LacatError::ValidationError(
                        "Return value exceeds 128 bits".to_string(),
                    ));
                }
                let mut buf = [0u8; 16];
                buf.copy_from_slice(low);
                Ok(u128::from_be_bytes(buf))
            })
            .collect()
    }

    pub fn parse_quantity(quantity: &str) -> Result<u128> {
        let digits = quantity.trim_start_matches("0x");
        if digits.is_empty() {
            return Ok(0);
        }
        u128::from_str_radix(digits, 16)
            .map_err(|e| LacatError::ValidationError(format!("Invalid quantity {}: {}", quantity, e)))
    }

    pub fn format_quantity(value: u128) -> String {
        format!("{:#x}", value)
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug)]
enum RpcFailure {
    Transport(reqwest::Error),
    Node(RpcErrorObject),
    Decode(String),
}

impl RpcFailure {
    fn describe(&self) -> String {
        match self {
            RpcFailure::Transport(e) if e.is_timeout() => format!("request timed out: {}", e),
            RpcFailure::Transport(e) => format!("transport error: {}", e),
            RpcFailure::Node(e) => format!("node error {}: {}", e.code, e.message),
            RpcFailure::Decode(e) => format!("decode error: {}", e),
        }
    }

    fn is_user_rejection(&self) -> bool {
        matches!(self, RpcFailure::Node(e) if e.code == USER_REJECTED_CODE)
    }

    fn into_fetch_error(self) -> LacatError {
        LacatError::TransientFetch(self.describe())
    }

    fn into_submission_error(self) -> LacatError {
        if self.is_user_rejection() {
            LacatError::Rejected(self.describe())
        } else {
            LacatError::SubmissionFailed(self.describe())
        }
    }
}

pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Every request, connect included, fails after `timeout` so a silent node
    /// cannot stall a poll loop.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<T, RpcFailure> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method,
            params,
        };
        debug!("JSON-RPC {} #{}", method, request.id);

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(RpcFailure::Transport)?
            .error_for_status()
            .map_err(RpcFailure::Transport)?
            .json()
            .await
            .map_err(RpcFailure::Transport)?;

        if let Some(error) = response.error {
            return Err(RpcFailure::Node(error));
        }
        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| RpcFailure::Decode(e.to_string()))
    }
}

/// Wallet backed by the node's managed accounts.
pub struct JsonRpcWallet {
    client: Arc<JsonRpcClient>,
    account: RwLock<Option<String>>,
}

impl JsonRpcWallet {
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self {
            client,
            account: RwLock::new(None),
        }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    async fn request_access(&self) -> Result<()> {
        let accounts: Vec<String> = match self.client.call("eth_requestAccounts", json!([])).await {
            Ok(accounts) => accounts,
            Err(RpcFailure::Node(e)) if e.code == METHOD_NOT_FOUND_CODE => {
                debug!("eth_requestAccounts unsupported, falling back to eth_accounts");
                self.client
                    .call("eth_accounts", json!([]))
                    .await
                    .map_err(|e| LacatError::ConnectionError(e.describe()))?
            }
            Err(e) if e.is_user_rejection() => {
                return Err(LacatError::ConnectionError("Account access declined".to_string()))
            }
            Err(e) => return Err(LacatError::ConnectionError(e.describe())),
        };

        let account = accounts.into_iter().next().ok_or_else(|| {
            LacatError::ConnectionError(format!("No accounts available at {}", self.client.url()))
        })?;
        *self.account.write().unwrap_or_else(|e| e.into_inner()) = Some(account);
        Ok(())
    }

    async fn get_address(&self) -> Result<String> {
        self.account
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| LacatError::ConnectionError("Account access not granted".to_string()))
    }

    async fn get_spendable_balance(&self, address: &str) -> Result<u128> {
        let quantity: String = self
            .client
            .call("eth_getBalance", json!([address, "latest"]))
            .await
            .map_err(RpcFailure::into_fetch_error)?;
        abi::parse_quantity(&quantity)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptJson {
    block_number: Option<String>,
    status: Option<String>,
}

/// Vault contract at `address`, transacting as `from`.
pub struct JsonRpcLedger {
    client: Arc<JsonRpcClient>,
    address: String,
    from: String,
    poll_interval: Duration,
}

impl JsonRpcLedger {
    pub fn new(client: Arc<JsonRpcClient>, address: String, from: String, poll_interval: Duration) -> Self {
        Self {
            client,
            address,
            from,
            poll_interval,
        }
    }

    async fn read(&self, data: String) -> Result<Vec<u128>> {
        let output: String = self
            .client
            .call(
                "eth_call",
                json!([{ "from": self.from, "to": self.address, "data": data }, "latest"]),
            )
            .await
            .map_err(RpcFailure::into_fetch_error)?;
        abi::decode_words(&output)
    }

    async fn send(&self, data: String, value: u128) -> Result<TxHash> {
        let mut tx = json!({ "from": self.from, "to": self.address, "data": data });
        if value > 0 {
            tx["value"] = Value::String(abi::format_quantity(value));
        }
        let hash: String = self
            .client
            .call("eth_sendTransaction", json!([tx]))
            .await
            .map_err(RpcFailure::into_submission_error)?;
        Ok(TxHash(hash))
    }

    async fn block_number(&self) -> std::result::Result<u64, RpcFailure> {
        let quantity: String = self.client.call("eth_blockNumber", json!([])).await?;
        abi::parse_quantity(&quantity)
            .ok()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| RpcFailure::Decode(format!("Invalid block number {}", quantity)))
    }

    async fn poll_receipt(&self, tx_hash: &TxHash, confirmations: u64) -> std::result::Result<Option<TxReceipt>, RpcFailure> {
        let receipt: Option<ReceiptJson> = self
            .client
            .call("eth_getTransactionReceipt", json!([tx_hash.0]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(included_in) = receipt.block_number.as_deref() else {
            return Ok(None);
        };
        let included_in = abi::parse_quantity(included_in)
            .ok()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| RpcFailure::Decode(format!("Invalid receipt block {}", included_in)))?;
        let success = receipt.status.as_deref() != Some("0x0");

        if success {
            let head = self.block_number().await?;
            if head.saturating_sub(included_in) + 1 < confirmations {
                return Ok(None);
            }
        }

        Ok(Some(TxReceipt {
            tx_hash: tx_hash.clone(),
            block_number: included_in,
            success,
        }))
    }
}

fn to_u64(value: u128, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| LacatError::ValidationError(format!("{} does not fit in 64 bits: {}", field, value)))
}

#[async_trait]
impl LacatLedger for JsonRpcLedger {
    async fn get_num_deposits(&self) -> Result<u64> {
        let words = self.read(abi::encode_call(abi::GET_NUM_DEPOSITS, &[])).await?;
        let count = words
            .first()
            .copied()
            .ok_or_else(|| LacatError::ValidationError("Empty getNumDeposits result".to_string()))?;
        to_u64(count, "deposit count")
    }

    async fn get_deposit_status(&self, index: u64) -> Result<RawDepositStatus> {
        let words = self
            .read(abi::encode_call(abi::GET_DEPOSIT_STATUS, &[u128::from(index)]))
            .await?;
        let &[amount, unlock, monthly, last] = words.as_slice() else {
            return Err(LacatError::ValidationError(format!(
                "getDepositStatus returned {} words, expected 4",
                words.len()
            )));
        };
        Ok(RawDepositStatus {
            amount,
            unlock_timestamp: to_u64(unlock, "unlock timestamp")?,
            monthly_withdraw_amount: monthly,
            last_withdraw_timestamp: to_u64(last, "last withdraw timestamp")?,
        })
    }

    async fn deposit(
        &self,
        unlock_timestamp: u64,
        monthly_withdraw_basis_points: u16,
        value: u128,
    ) -> Result<TxHash> {
        let data = abi::encode_call(
            abi::DEPOSIT,
            &[u128::from(unlock_timestamp), u128::from(monthly_withdraw_basis_points)],
        );
        self.send(data, value).await
    }

    async fn withdraw(&self, deposit_id: u64) -> Result<TxHash> {
        self.send(abi::encode_call(abi::WITHDRAW, &[u128::from(deposit_id)]), 0)
            .await
    }

    async fn withdraw_monthly_allowance(&self, deposit_id: u64) -> Result<TxHash> {
        self.send(
            abi::encode_call(abi::WITHDRAW_MONTHLY_ALLOWANCE, &[u128::from(deposit_id)]),
            0,
        )
        .await
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash, confirmations: u64) -> Result<TxReceipt> {
        loop {
            match self.poll_receipt(tx_hash, confirmations).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => warn!("Receipt poll for {} failed: {}", tx_hash, e.describe()),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

pub struct JsonRpcConnector {
    client: Arc<JsonRpcClient>,
    poll_interval: Duration,
}

impl JsonRpcConnector {
    pub fn new(client: Arc<JsonRpcClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }
}

#[async_trait]
impl LedgerConnector for JsonRpcConnector {
    async fn connect(&self, session: &Session, address: &str) -> Result<Arc<dyn LacatLedger>> {
        let code: String = self
            .client
            .call("eth_getCode", json!([address, "latest"]))
            .await
            .map_err(RpcFailure::into_fetch_error)?;
        if code.trim_start_matches("0x").is_empty() {
            return Err(LacatError::ConfigurationError(format!(
                "No contract deployed at {}",
                address
            )));
        }

        info!("Bound vault {} for {}", address, session.address);
        Ok(Arc::new(JsonRpcLedger::new(
            self.client.clone(),
            address.to_string(),
            session.address.clone(),
            self.poll_interval,
        )))
    }
}
