use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use lacat_client::rpc::{JsonRpcClient, JsonRpcConnector, JsonRpcWallet};
use lacat_client::units::format_ether;
use lacat_client::{DepositRequest, LacatClient, LacatConfig, SubmittedTransaction, SystemClock};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lacat", about = "Time-release vault client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow balance, deposits and notifications until Ctrl-C
    Watch,

    /// Lock funds until a date
    Deposit {
        /// Amount in ETH
        amount: f64,
        /// Unlock date (RFC 3339)
        unlock_at: DateTime<Utc>,
        /// Monthly allowance in basis points (0 disables it)
        #[arg(default_value_t = 0)]
        monthly_withdraw_basis_points: u32,
    },

    /// Withdraw an unlocked deposit in full
    Withdraw { deposit_id: u64 },

    /// Withdraw the monthly allowance of a deposit
    WithdrawMonthly { deposit_id: u64 },

    /// Show the advisory fee for a deposit
    Fee {
        amount: f64,
        #[arg(default_value_t = 0)]
        monthly_withdraw_basis_points: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = LacatConfig::from_env().context("loading configuration")?;

    if let Commands::Fee {
        amount,
        monthly_withdraw_basis_points,
    } = cli.command
    {
        let fees = lacat_client::FeeCalculator::new(config.fees);
        println!("fee:     {} ETH", fees.fee(amount, monthly_withdraw_basis_points));
        println!("monthly: {} ETH", fees.monthly_withdrawal(amount, monthly_withdraw_basis_points));
        return Ok(());
    }

    let rpc = Arc::new(
        JsonRpcClient::new(config.rpc_url.clone(), config.rpc_timeout())
            .context("building JSON-RPC client")?,
    );
    info!("Using JSON-RPC endpoint {}", rpc.url());
    let wallet = Arc::new(JsonRpcWallet::new(rpc.clone()));
    let connector = Arc::new(JsonRpcConnector::new(rpc, config.confirmation_poll_interval()));
    let client = LacatClient::new(config, Some(wallet), connector, Arc::new(SystemClock));

    let session = client.connect().await.context("connecting wallet")?;
    info!("Connected as {}", session.address);

    run_to_completion(&client, cli.command).await
}

/// Run one command, then stop the pollers whatever the outcome.
async fn run_to_completion(client: &LacatClient, command: Commands) -> anyhow::Result<()> {
    let result = execute(client, command).await;
    client.shutdown().await;
    result
}

async fn execute(client: &LacatClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Watch => watch(client).await,
        Commands::Deposit {
            amount,
            unlock_at,
            monthly_withdraw_basis_points,
        } => {
            let request = DepositRequest {
                amount_in_eth: amount,
                unlock_at,
                monthly_withdraw_basis_points,
            };
            let submitted = client.workflow().make_deposit(&request).await?;
            await_confirmation(submitted).await
        }
        Commands::Withdraw { deposit_id } => {
            if let Some(eligibility) = client.eligibility(deposit_id) {
                if !eligibility.can_be_unlocked {
                    warn!("Deposit {} does not look unlockable yet", deposit_id);
                }
            }
            let submitted = client.workflow().withdraw_full(deposit_id).await?;
            await_confirmation(submitted).await
        }
        Commands::WithdrawMonthly { deposit_id } => {
            let submitted = client.workflow().withdraw_monthly_allowance(deposit_id).await?;
            await_confirmation(submitted).await
        }
        Commands::Fee { .. } => Ok(()),
    }
}

async fn watch(client: &LacatClient) -> anyhow::Result<()> {
    let mut notifications = client.notifications();
    let Some(mut state) = client.subscribe_state() else {
        bail!("client is not running");
    };
    let Some(mut balance) = client.subscribe_balance() else {
        bail!("client is not running");
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
            changed = balance.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = *balance.borrow();
                info!("Balance: {} ETH", format_ether(current.wei));
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = state.borrow().clone();
                let now = Utc::now();
                info!(
                    "{} deposits, {} ETH locked up",
                    snapshot.deposits.len(),
                    format_ether(snapshot.total_locked_up)
                );
                for deposit in &snapshot.deposits {
                    let eligibility = deposit.eligibility(now);
                    info!(
                        "  #{} {} ETH unlocks {} withdrawn={} unlockable={} monthly={}",
                        deposit.id,
                        format_ether(deposit.amount),
                        deposit.unlock_date,
                        eligibility.already_withdrawn,
                        eligibility.can_be_unlocked,
                        eligibility.can_withdraw_monthly_allowance
                    );
                }
            }
            received = notifications.recv() => match received {
                Ok(notification) => info!("[{:?}] {}", notification.severity, notification.message),
                Err(e) => warn!("Notification stream: {}", e),
            }
        }
    }
}

async fn await_confirmation(submitted: Option<SubmittedTransaction>) -> anyhow::Result<()> {
    let Some(submitted) = submitted else {
        bail!("no session or vault target available");
    };
    info!("Submitted {}: {}", submitted.operation, submitted.tx_hash);

    match submitted.confirmation.await {
        Ok(Ok(receipt)) => {
            info!("Confirmed in block {}", receipt.block_number);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("{} failed: {}", submitted.operation, e);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
