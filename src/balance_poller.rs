use crate::clock::{Clock, Ticker};
use crate::error::Result;
use crate::models::{Balance, Session};
use crate::poller::{is_stopped, next_tick, stop_channel, PollerHandle};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Keeps the connected account's spendable balance fresh.
///
/// Fetch failures are logged and swallowed; the last observed balance stays
/// published until a later tick succeeds.
pub struct BalancePoller {
    session: Session,
    clock: Arc<dyn Clock>,
    balance: watch::Sender<Balance>,
}

impl BalancePoller {
    pub fn new(session: Session, clock: Arc<dyn Clock>) -> Self {
        let (balance, _) = watch::channel(Balance::default());
        Self {
            session,
            clock,
            balance,
        }
    }

    pub fn current(&self) -> Balance {
        *self.balance.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Balance> {
        self.balance.subscribe()
    }

    /// Fetch without publishing.
    pub async fn fetch(&self) -> Result<Balance> {
        let wei = self
            .session
            .wallet
            .get_spendable_balance(&self.session.address)
            .await?;
        Ok(Balance {
            wei,
            observed_at: Some(self.clock.now()),
        })
    }

    /// Fetch and publish once. On failure the previous balance is kept.
    pub async fn refresh(&self) -> Result<Balance> {
        let balance = self.fetch().await?;
        self.publish(balance);
        Ok(balance)
    }

    fn publish(&self, balance: Balance) {
        let previous = self.balance.send_replace(balance);
        if previous.wei != balance.wei {
            debug!(
                "Balance of {} changed: {} -> {} wei",
                self.session.address, previous.wei, balance.wei
            );
        }
    }

    /// Run the poll loop on `ticker` until the returned handle is stopped.
    pub fn spawn<T: Ticker>(self: Arc<Self>, mut ticker: T) -> PollerHandle {
        let (stop_tx, mut stop_rx) = stop_channel();
        let poller = self;

        let join = tokio::spawn(async move {
            info!("Balance poller started for {}", poller.session.address);
            while next_tick(&mut ticker, &mut stop_rx).await {
                let result = poller.fetch().await;
                if is_stopped(&stop_rx) {
                    debug!("Balance poller stopped mid-fetch, discarding result");
                    break;
                }
                match result {
                    Ok(balance) => poller.publish(balance),
                    Err(e) => warn!("Balance fetch failed, keeping last value: {}", e),
                }
            }
        });

        PollerHandle::new("balance", stop_tx, join)
    }
}
