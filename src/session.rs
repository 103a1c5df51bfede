use crate::error::{LacatError, Result};
use crate::models::Session;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Account access and signing capability exposed by the user's wallet.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user to grant account access.
    async fn request_access(&self) -> Result<()>;

    async fn get_address(&self) -> Result<String>;

    /// Spendable balance of `address`, in wei.
    async fn get_spendable_balance(&self, address: &str) -> Result<u128>;
}

/// Establishes the session once per process. There is no reconnect path.
pub struct SessionManager {
    wallet: Option<Arc<dyn WalletProvider>>,
    session: watch::Sender<Option<Session>>,
}

impl SessionManager {
    pub fn new(wallet: Option<Arc<dyn WalletProvider>>) -> Self {
        let (session, _) = watch::channel(None);
        Self { wallet, session }
    }

    /// Request access and resolve the account. Returns the existing session if already connected.
    pub async fn connect(&self) -> Result<Session> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let wallet = self.wallet.clone().ok_or_else(|| {
            LacatError::ConnectionError("No wallet provider available".to_string())
        })?;

        wallet.request_access().await.map_err(|e| {
            error!("Wallet access request failed: {}", e);
            into_connection_error(e)
        })?;

        let address = wallet.get_address().await.map_err(|e| {
            error!("Failed to resolve wallet address: {}", e);
            into_connection_error(e)
        })?;

        info!("Wallet connected: {}", address);

        let session = Session { address, wallet };
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    pub fn current(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}

fn into_connection_error(e: LacatError) -> LacatError {
    match e {
        LacatError::ConnectionError(_) => e,
        other => LacatError::ConnectionError(other.to_string()),
    }
}
