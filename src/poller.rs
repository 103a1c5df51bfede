use crate::clock::Ticker;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Handle to a running poll loop. Dropping it leaves the loop running.
pub struct PollerHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub(crate) fn new(name: &'static str, stop: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self { name, stop, join }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop to stop. A fetch already in flight completes but its result is discarded.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.join.await {
            error!("{} poller task failed: {}", self.name, e);
        } else {
            info!("{} poller stopped", self.name);
        }
    }
}

pub(crate) fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Wait for the next tick. Returns false once a stop has been signalled.
pub(crate) async fn next_tick<T: Ticker>(ticker: &mut T, stop: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *stop.borrow() {
            return false;
        }
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    // Handle dropped without a stop request.
                    ticker.tick().await;
                    return true;
                }
            }
            _ = ticker.tick() => return true,
        }
    }
}

pub(crate) fn is_stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}
