use crate::models::{OperationKind, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Cancelled,
    Submitted,
    ConfirmedDeposit,
    ConfirmedWithdrawal,
    ConfirmedMonthlyWithdrawal,
}

impl NotificationKind {
    pub fn confirmed(operation: OperationKind) -> Self {
        match operation {
            OperationKind::Deposit => NotificationKind::ConfirmedDeposit,
            OperationKind::Withdrawal => NotificationKind::ConfirmedWithdrawal,
            OperationKind::MonthlyWithdrawal => NotificationKind::ConfirmedMonthlyWithdrawal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub operation_id: Uuid,
    pub operation: OperationKind,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub message: String,
    pub tx_hash: Option<TxHash>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn cancelled(operation_id: Uuid, operation: OperationKind, created_at: DateTime<Utc>) -> Self {
        Self {
            operation_id,
            operation,
            kind: NotificationKind::Cancelled,
            severity: Severity::Warning,
            message: format!("Cancelled: the {} was not signed", operation),
            tx_hash: None,
            created_at,
        }
    }

    pub fn submitted(
        operation_id: Uuid,
        operation: OperationKind,
        tx_hash: TxHash,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_id,
            operation,
            kind: NotificationKind::Submitted,
            severity: Severity::Info,
            message: format!("Transaction sent: waiting for the {} to be confirmed", operation),
            tx_hash: Some(tx_hash),
            created_at,
        }
    }

    pub fn confirmed(
        operation_id: Uuid,
        operation: OperationKind,
        tx_hash: TxHash,
        created_at: DateTime<Utc>,
    ) -> Self {
        let message = match operation {
            OperationKind::Deposit => "Deposit confirmed: your funds are locked",
            OperationKind::Withdrawal => "Withdrawal confirmed: funds returned to your account",
            OperationKind::MonthlyWithdrawal => {
                "Monthly withdrawal confirmed: allowance sent to your account"
            }
        };
        Self {
            operation_id,
            operation,
            kind: NotificationKind::confirmed(operation),
            severity: Severity::Success,
            message: message.to_string(),
            tx_hash: Some(tx_hash),
            created_at,
        }
    }
}

/// Fan-out sink consumed by the presentation layer.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        debug!(
            "Notification {:?} for operation {}: {}",
            notification.kind, notification.operation_id, notification.message
        );
        // No subscribers is not an error.
        let _ = self.tx.send(notification);
    }
}
