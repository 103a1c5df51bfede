mod common;

use chrono::Duration;
use common::{at, raw, Call, FakeLedger, FakeWallet, ETH};
use lacat_client::{
    DepositRequest, DepositSynchronizer, LacatConfig, LacatError, LacatLedger, ManualClock,
    Notification, NotificationKind, Notifier, OperationKind, Session, Severity,
    TransactionWorkflow,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tokio_test::{assert_err, assert_ok};

const NOW: i64 = 1_700_000_000;

struct Harness {
    ledger: Arc<FakeLedger>,
    workflow: TransactionWorkflow,
    notifications: broadcast::Receiver<Notification>,
    sync: DepositSynchronizer,
    clock: Arc<ManualClock>,
    _session: watch::Sender<Option<Session>>,
    _target: watch::Sender<Option<Arc<dyn LacatLedger>>>,
}

impl Harness {
    fn new(config: LacatConfig, connected: bool, bound: bool) -> Self {
        let ledger = FakeLedger::new(vec![
            raw(2 * ETH, (NOW - 100) as u64, 0, 0),
            raw(0, (NOW - 100) as u64, 0, 0),
            raw(ETH, (NOW + 86_400) as u64, ETH / 10, 0),
        ]);
        ledger.now.store(NOW as u64, Ordering::SeqCst);

        let clock = Arc::new(ManualClock::new(at(NOW)));
        let wallet = FakeWallet::new(&[10 * ETH]);
        let (session, session_rx) = watch::channel(connected.then(|| wallet.session()));
        let target_ledger: Option<Arc<dyn LacatLedger>> = if bound {
            Some(ledger.clone())
        } else {
            None
        };
        let (target, target_rx) = watch::channel(target_ledger);

        let notifier = Notifier::new(config.notification_capacity);
        let notifications = notifier.subscribe();
        let workflow = TransactionWorkflow::new(session_rx, target_rx, notifier, clock.clone(), &config);
        let sync = DepositSynchronizer::new(ledger.clone(), clock.clone());

        Self {
            ledger,
            workflow,
            notifications,
            sync,
            clock,
            _session: session,
            _target: target,
        }
    }

    fn ready() -> Self {
        Self::new(LacatConfig::default(), true, true)
    }

    fn next_notification(&mut self) -> Notification {
        self.notifications.try_recv().expect("expected a notification")
    }

    fn assert_no_notification(&mut self) {
        assert!(matches!(self.notifications.try_recv(), Err(TryRecvError::Empty)));
    }
}

fn deposit_request(amount_in_eth: f64, monthly_withdraw_basis_points: u32) -> DepositRequest {
    DepositRequest {
        amount_in_eth,
        unlock_at: at(NOW) + Duration::days(30),
        monthly_withdraw_basis_points,
    }
}

#[cfg(test)]
mod precondition_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_session_is_a_no_op() {
        let mut harness = Harness::new(LacatConfig::default(), false, true);

        assert!(assert_ok!(harness.workflow.make_deposit(&deposit_request(1.0, 0)).await).is_none());
        assert!(assert_ok!(harness.workflow.withdraw_full(0).await).is_none());
        assert!(assert_ok!(harness.workflow.withdraw_monthly_allowance(2).await).is_none());

        assert!(harness.ledger.calls().is_empty());
        harness.assert_no_notification();
    }

    #[tokio::test]
    async fn test_unbound_target_is_a_no_op() {
        let mut harness = Harness::new(LacatConfig::default(), true, false);

        assert!(assert_ok!(harness.workflow.withdraw_full(0).await).is_none());
        assert!(harness.ledger.calls().is_empty());
        harness.assert_no_notification();
    }

    #[tokio::test]
    async fn test_invalid_deposit_requests_rejected_before_submission() {
        let mut harness = Harness::ready();

        for request in [
            deposit_request(0.0, 0),
            deposit_request(-1.0, 0),
            deposit_request(f64::NAN, 0),
            deposit_request(1.0, 10_001),
            DepositRequest {
                amount_in_eth: 1.0,
                unlock_at: at(-1),
                monthly_withdraw_basis_points: 0,
            },
        ] {
            let err = assert_err!(harness.workflow.make_deposit(&request).await);
            assert!(matches!(err, LacatError::ValidationError(_)), "{:?}", request);
        }

        assert!(harness.ledger.calls().is_empty());
        harness.assert_no_notification();
    }
}

#[cfg(test)]
mod submission_tests {
    use super::*;

    #[tokio::test]
    async fn test_deposit_submits_converted_amounts() {
        let mut harness = Harness::ready();

        let submitted = assert_ok!(harness.workflow.make_deposit(&deposit_request(1.5, 500)).await)
            .expect("ready workflow submits");
        assert_eq!(submitted.operation, OperationKind::Deposit);

        assert_eq!(
            harness.ledger.calls(),
            vec![Call::Deposit {
                unlock_timestamp: (NOW + 30 * 86_400) as u64,
                monthly_withdraw_basis_points: 500,
                value: 3 * ETH / 2,
            }]
        );

        let sent = harness.next_notification();
        assert_eq!(sent.kind, NotificationKind::Submitted);
        assert_eq!(sent.severity, Severity::Info);
        assert_eq!(sent.operation_id, submitted.operation_id);
        assert_eq!(sent.tx_hash.as_ref(), Some(&submitted.tx_hash));

        let receipt = assert_ok!(submitted.confirmation.await.unwrap());
        assert!(receipt.success);

        let confirmed = harness.next_notification();
        assert_eq!(confirmed.kind, NotificationKind::ConfirmedDeposit);
        assert_eq!(confirmed.severity, Severity::Success);
        assert_eq!(confirmed.operation_id, sent.operation_id);
        harness.assert_no_notification();

        // The mirror only learns about the deposit on the next pass.
        assert!(harness.sync.current().deposits.is_empty());
        harness.sync.sync_once().await.unwrap();
        let state = harness.sync.current();
        let deposit = state.get(3).expect("new deposit mirrored");
        assert_eq!(deposit.amount, 3 * ETH / 2);
        assert_eq!(deposit.monthly_withdraw, 3 * ETH / 2 * 500 / 10_000);
        assert_eq!(deposit.unlock_date, at(NOW + 30 * 86_400));
    }

    #[tokio::test]
    async fn test_withdraw_full_confirms_withdrawal() {
        let mut harness = Harness::ready();

        let submitted = assert_ok!(harness.workflow.withdraw_full(0).await).unwrap();
        assert_eq!(harness.ledger.calls(), vec![Call::Withdraw(0)]);
        assert_ok!(submitted.confirmation.await.unwrap());

        assert_eq!(harness.next_notification().kind, NotificationKind::Submitted);
        assert_eq!(
            harness.next_notification().kind,
            NotificationKind::ConfirmedWithdrawal
        );

        harness.sync.sync_once().await.unwrap();
        assert!(harness.sync.current().deposits[0].is_already_withdrawn());
    }

    #[tokio::test]
    async fn test_monthly_allowance_confirms_monthly_withdrawal() {
        let mut harness = Harness::ready();

        let submitted = assert_ok!(harness.workflow.withdraw_monthly_allowance(2).await).unwrap();
        assert_eq!(submitted.operation, OperationKind::MonthlyWithdrawal);
        assert_ok!(submitted.confirmation.await.unwrap());

        assert_eq!(harness.next_notification().kind, NotificationKind::Submitted);
        assert_eq!(
            harness.next_notification().kind,
            NotificationKind::ConfirmedMonthlyWithdrawal
        );

        harness.sync.sync_once().await.unwrap();
        let state = harness.sync.current();
        let deposit = state.get(2).unwrap();
        assert_eq!(deposit.amount, ETH - ETH / 10);
        assert_eq!(deposit.last_withdraw, Some(at(NOW)));
        assert!(!deposit.can_withdraw_monthly_allowance(at(NOW)));
    }

    #[tokio::test]
    async fn test_rejected_signature_emits_single_cancellation() {
        let mut harness = Harness::ready();
        harness.sync.sync_once().await.unwrap();
        let before = harness.sync.current();
        harness.ledger.reject_submissions.store(true, Ordering::SeqCst);

        let err = assert_err!(harness.workflow.withdraw_full(0).await);
        assert!(err.is_rejection());

        let cancelled = harness.next_notification();
        assert_eq!(cancelled.kind, NotificationKind::Cancelled);
        assert_eq!(cancelled.severity, Severity::Warning);
        assert_eq!(cancelled.operation, OperationKind::Withdrawal);
        assert!(cancelled.tx_hash.is_none());
        assert_eq!(cancelled.created_at, at(NOW));
        harness.assert_no_notification();

        assert!(harness.workflow.pending_operations().await.is_empty());
        harness.sync.sync_once().await.unwrap();
        assert_eq!(*harness.sync.current(), *before);
    }

    #[tokio::test]
    async fn test_other_submission_failure_emits_nothing() {
        let mut harness = Harness::ready();
        *harness.ledger.submission_error.lock().unwrap() = Some("insufficient funds".to_string());

        let err = assert_err!(harness.workflow.make_deposit(&deposit_request(1.0, 0)).await);
        assert!(matches!(err, LacatError::SubmissionFailed(_)));
        harness.assert_no_notification();
        assert!(harness.workflow.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_operations() {
        let harness = Harness::ready();

        let (a, b) = tokio::join!(
            harness.workflow.withdraw_full(0),
            harness.workflow.withdraw_monthly_allowance(2)
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert_ne!(a.operation_id, b.operation_id);
        assert_ne!(a.tx_hash, b.tx_hash);
        assert_eq!(harness.ledger.calls().len(), 2);
    }
}

#[cfg(test)]
mod confirmation_tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_operation_tracked_until_confirmed() {
        let mut harness = Harness::ready();
        harness.ledger.hold_confirmations.store(true, Ordering::SeqCst);

        let submitted = assert_ok!(harness.workflow.withdraw_full(0).await).unwrap();
        let pending = harness.workflow.pending_operations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation_id, submitted.operation_id);
        assert_eq!(pending[0].operation, OperationKind::Withdrawal);
        assert_eq!(pending[0].deposit_id, Some(0));
        assert_eq!(pending[0].submitted_at, at(NOW));

        assert_eq!(harness.next_notification().kind, NotificationKind::Submitted);
        harness.assert_no_notification();

        harness.ledger.release.notify_one();
        assert_ok!(submitted.confirmation.await.unwrap());
        assert!(harness.workflow.pending_operations().await.is_empty());
        assert_eq!(
            harness.next_notification().kind,
            NotificationKind::ConfirmedWithdrawal
        );
    }

    #[tokio::test]
    async fn test_notifications_stamped_by_injected_clock() {
        let mut harness = Harness::ready();
        harness.ledger.hold_confirmations.store(true, Ordering::SeqCst);

        let submitted = assert_ok!(harness.workflow.withdraw_full(0).await).unwrap();
        harness.clock.advance(Duration::minutes(1));
        harness.ledger.release.notify_one();
        assert_ok!(submitted.confirmation.await.unwrap());

        let sent = harness.next_notification();
        assert_eq!(sent.kind, NotificationKind::Submitted);
        assert_eq!(sent.created_at, at(NOW));

        let confirmed = harness.next_notification();
        assert_eq!(confirmed.kind, NotificationKind::ConfirmedWithdrawal);
        assert_eq!(confirmed.created_at, at(NOW + 60));
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_not_confirmed() {
        let mut harness = Harness::ready();
        harness.ledger.revert.store(true, Ordering::SeqCst);

        let submitted = assert_ok!(harness.workflow.withdraw_full(0).await).unwrap();
        let err = assert_err!(submitted.confirmation.await.unwrap());
        assert!(matches!(err, LacatError::Reverted(_)));

        assert_eq!(harness.next_notification().kind, NotificationKind::Submitted);
        harness.assert_no_notification();
        assert!(harness.workflow.pending_operations().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout() {
        let config = LacatConfig {
            confirmation_timeout_seconds: Some(30),
            ..LacatConfig::default()
        };
        let mut harness = Harness::new(config, true, true);
        harness.ledger.hold_confirmations.store(true, Ordering::SeqCst);

        let submitted = assert_ok!(harness.workflow.make_deposit(&deposit_request(1.0, 0)).await).unwrap();
        let err = assert_err!(submitted.confirmation.await.unwrap());
        assert!(matches!(err, LacatError::ConfirmationTimeout(_)));

        assert_eq!(harness.next_notification().kind, NotificationKind::Submitted);
        harness.assert_no_notification();
        assert!(harness.workflow.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_handle_still_confirms() {
        let mut harness = Harness::ready();
        let submitted = assert_ok!(harness.workflow.withdraw_full(0).await).unwrap();
        drop(submitted);

        assert_eq!(harness.next_notification().kind, NotificationKind::Submitted);
        let confirmed = tokio::time::timeout(std::time::Duration::from_secs(2), harness.notifications.recv())
            .await
            .expect("confirmation notification")
            .unwrap();
        assert_eq!(confirmed.kind, NotificationKind::ConfirmedWithdrawal);
    }
}
