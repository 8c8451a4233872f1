//! Withdrawal engine: hold, fee split, admin approval and rejection,
//! automatic payout and the payout webhook.

mod common;

use common::{fixture, fixture_with, major, payout_callback, Fixture};
use invest_ledger_core::{
    config::PlatformConfig,
    error::LedgerError,
    gateway::GatewayError,
    reconciliation_subsystem::WebhookOutcome,
    types::{
        BankAccountId, CatalogStatus, EntryKind, EntryStatus, PayoutState, UserId,
        WithdrawalStatus,
    },
};

fn auto_payout_fixture(tag: &str) -> Fixture {
    let mut config = PlatformConfig::default_test();
    config.withdrawal.auto_payout = true;
    fixture_with(tag, config)
}

fn funded_user(f: &Fixture, balance: i64) -> (UserId, BankAccountId) {
    let user = f.real_user("wulan", balance);
    let account = f.bank_account(user);
    (user, account)
}

// ─────────────────────────────────────────────────────────────────────────────
// Hold and release
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn withdrawal_holds_full_amount_and_splits_fee() {
    let f = fixture("wd-hold");
    let (user, account) = funded_user(&f, 100_000);

    let receipt = f
        .platform
        .withdrawals
        .create_withdrawal(user, major(20_000), account)
        .unwrap();

    assert_eq!(receipt.charge, major(2_000));
    assert_eq!(receipt.net_amount, major(18_000));
    assert_eq!(receipt.status, WithdrawalStatus::Pending);
    assert_eq!(receipt.account_number, "1234****7890");
    assert_eq!(f.balance(user), major(80_000));
    f.assert_conserved(user);
}

#[test]
fn rejection_refunds_the_full_amount_exactly_once() {
    let f = fixture("wd-reject");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();

    wd.reject_withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(f.balance(user), major(100_000), "refund is 20,000, not 18,000");

    let err = wd.reject_withdrawal(receipt.withdrawal_id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(f.balance(user), major(100_000));

    let w = wd.withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(w.status, WithdrawalStatus::Failed);

    let entries = f.platform.entries_for_user(user).unwrap();
    let refunds: Vec<_> = entries.iter().filter(|e| e.kind == EntryKind::Refund).collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].order_id, format!("{}-REFUND", receipt.order_id));
    let hold = entries
        .iter()
        .find(|e| e.order_id == receipt.order_id)
        .unwrap();
    assert_eq!(hold.status, EntryStatus::Failed);
    f.assert_conserved(user);
}

#[test]
fn approval_finalises_without_moving_balance() {
    let f = fixture("wd-approve");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();

    wd.approve_withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().status,
        WithdrawalStatus::Success
    );
    assert_eq!(f.balance(user), major(80_000));

    let err = wd.reject_withdrawal(receipt.withdrawal_id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(f.balance(user), major(80_000));
    assert!(f.gateway.payouts().is_empty());
}

#[test]
fn promotor_withdrawal_succeeds_immediately() {
    let f = fixture("wd-promotor");
    let user = f.promotor("house", 100_000);
    let account = f.bank_account(user);

    let receipt = f
        .platform
        .withdrawals
        .create_withdrawal(user, major(20_000), account)
        .unwrap();

    assert_eq!(receipt.status, WithdrawalStatus::Success);
    assert_eq!(f.balance(user), major(80_000));
    assert!(f.gateway.payouts().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn one_withdrawal_per_local_day() {
    let f = fixture("wd-daily-limit");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;

    let first = wd.create_withdrawal(user, major(10_000), account).unwrap();
    let err = wd.create_withdrawal(user, major(10_000), account).unwrap_err();
    assert!(matches!(err, LedgerError::DailyWithdrawalLimit { .. }));

    // A rejected withdrawal still used up the day.
    wd.reject_withdrawal(first.withdrawal_id).unwrap();
    let err = wd.create_withdrawal(user, major(10_000), account).unwrap_err();
    assert!(matches!(err, LedgerError::DailyWithdrawalLimit { .. }));

    f.advance_days(1);
    wd.create_withdrawal(user, major(10_000), account).unwrap();
}

#[test]
fn window_amount_and_balance_checks() {
    let f = fixture("wd-validation");
    let (user, account) = funded_user(&f, 15_000);
    let wd = &f.platform.withdrawals;

    let err = wd.create_withdrawal(user, major(5_000), account).unwrap_err();
    assert!(matches!(err, LedgerError::AmountOutOfRange { .. }));

    let err = wd.create_withdrawal(user, major(20_000), account).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(err.user_message(), "Insufficient balance");

    // 2025-03-04 10:00 local + 8h = 18:00, after closing.
    f.clock.advance_hours(8);
    let err = wd.create_withdrawal(user, major(10_000), account).unwrap_err();
    assert!(matches!(err, LedgerError::OutsideWithdrawalWindow));

    // Sunday is closed all day.
    f.clock.advance_hours(5 * 24 - 8);
    let err = wd.create_withdrawal(user, major(10_000), account).unwrap_err();
    assert!(matches!(err, LedgerError::OutsideWithdrawalWindow));

    assert_eq!(f.balance(user), major(15_000));
    assert!(wd.withdrawals_for_user(user).unwrap().is_empty());
}

#[test]
fn account_and_bank_checks() {
    let f = fixture("wd-account");
    let (user, _) = funded_user(&f, 100_000);
    let stranger = f.real_user("other", 0);
    let foreign = f.bank_account(stranger);
    let wd = &f.platform.withdrawals;

    let err = wd.create_withdrawal(user, major(10_000), foreign).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));

    let own = f.bank_account(user);
    f.platform.set_bank_status(f.bank, CatalogStatus::Inactive).unwrap();
    let err = wd.create_withdrawal(user, major(10_000), own).unwrap_err();
    assert!(matches!(err, LedgerError::BankUnavailable { .. }));

    f.platform.set_bank_status(f.bank, CatalogStatus::Active).unwrap();
    f.platform
        .set_user_status(user, invest_ledger_core::types::AccountStatus::Suspended)
        .unwrap();
    let err = wd.create_withdrawal(user, major(10_000), own).unwrap_err();
    assert!(matches!(err, LedgerError::AccountInactive { .. }));
    assert_eq!(f.balance(user), major(100_000));
}

// ─────────────────────────────────────────────────────────────────────────────
// Automatic payout
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn auto_payout_sends_net_amount_and_webhook_finalises() {
    let f = auto_payout_fixture("wd-auto-success");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;

    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();
    let payouts = f.gateway.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, major(18_000));
    assert_eq!(payouts[0].order_id, receipt.order_id);
    assert_eq!(payouts[0].code, "014");

    let w = wd.withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(w.status, WithdrawalStatus::Pending);
    assert_eq!(w.payout_state, PayoutState::Dispatched);

    let reply = f
        .platform
        .reconciliation
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "00"))
        .unwrap();
    assert_eq!(reply.outcome, WebhookOutcome::Applied);
    assert_eq!(reply.ack.response_code, "2004400");
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().status,
        WithdrawalStatus::Success
    );

    let again = f
        .platform
        .reconciliation
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "00"))
        .unwrap();
    assert_eq!(again.outcome, WebhookOutcome::Duplicate);
    assert_eq!(f.balance(user), major(80_000));
    f.assert_conserved(user);
}

#[test]
fn dispatched_payout_cannot_be_rejected() {
    let f = auto_payout_fixture("wd-auto-no-reject");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();

    let err = wd.reject_withdrawal(receipt.withdrawal_id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(f.balance(user), major(80_000));
}

#[test]
fn failed_payout_is_held_for_review_not_refunded() {
    let f = auto_payout_fixture("wd-auto-failed");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    let recon = &f.platform.reconciliation;
    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();

    let reply = recon
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "06"))
        .unwrap();
    assert_eq!(reply.outcome, WebhookOutcome::Applied);

    let w = wd.withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(w.status, WithdrawalStatus::Pending);
    assert_eq!(w.payout_state, PayoutState::GatewayFailed);
    assert_eq!(f.balance(user), major(80_000), "no automatic refund");

    // Retry through approval re-dispatches.
    wd.approve_withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(f.gateway.payouts().len(), 2);
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().payout_state,
        PayoutState::Dispatched
    );
}

#[test]
fn success_after_refund_is_reported_as_conflict() {
    let f = auto_payout_fixture("wd-auto-conflict");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    let recon = &f.platform.reconciliation;
    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();

    recon
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "06"))
        .unwrap();
    wd.reject_withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(f.balance(user), major(100_000));

    let reply = recon
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "00"))
        .unwrap();
    assert_eq!(reply.outcome, WebhookOutcome::Conflict);
    assert_eq!(f.platform.events("payout_conflict").unwrap().len(), 1);
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().status,
        WithdrawalStatus::Failed
    );
    assert_eq!(f.balance(user), major(100_000));
}

#[test]
fn payout_timeout_keeps_the_hold_in_flight() {
    let f = auto_payout_fixture("wd-auto-timeout");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    let recon = &f.platform.reconciliation;
    f.gateway.fail_next(GatewayError::Timeout);

    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();
    assert_eq!(receipt.status, WithdrawalStatus::Pending);
    assert_eq!(f.balance(user), major(80_000));
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().payout_state,
        PayoutState::Dispatched
    );
    assert_eq!(f.platform.events("payout_outcome_unknown").unwrap().len(), 1);

    // The transfer may have gone out, so no refund yet.
    let err = wd.reject_withdrawal(receipt.withdrawal_id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(f.balance(user), major(80_000));

    let reply = recon
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "00"))
        .unwrap();
    assert_eq!(reply.outcome, WebhookOutcome::Applied);
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().status,
        WithdrawalStatus::Success
    );
    assert_eq!(f.balance(user), major(80_000));
    assert!(f.platform.events("payout_conflict").unwrap().is_empty());
    f.assert_conserved(user);
}

#[test]
fn payout_timeout_then_reported_failure_allows_refund() {
    let f = auto_payout_fixture("wd-auto-timeout-06");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    f.gateway.fail_next(GatewayError::Transport("connection reset".into()));

    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();
    f.platform
        .reconciliation
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "06"))
        .unwrap();
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().payout_state,
        PayoutState::GatewayFailed
    );

    wd.reject_withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(f.balance(user), major(100_000));
    f.assert_conserved(user);
}

#[test]
fn rejected_payout_request_allows_review() {
    let f = auto_payout_fixture("wd-auto-rejected");
    let (user, account) = funded_user(&f, 100_000);
    let wd = &f.platform.withdrawals;
    f.gateway.fail_next(GatewayError::Rejected {
        code: "4034402".into(),
        message: "Invalid account".into(),
    });

    let receipt = wd.create_withdrawal(user, major(20_000), account).unwrap();
    assert_eq!(receipt.status, WithdrawalStatus::Pending);
    assert_eq!(
        wd.withdrawal(receipt.withdrawal_id).unwrap().payout_state,
        PayoutState::GatewayFailed
    );
    assert_eq!(f.platform.events("payout_dispatch_failed").unwrap().len(), 1);

    wd.reject_withdrawal(receipt.withdrawal_id).unwrap();
    assert_eq!(f.balance(user), major(100_000));
    f.assert_conserved(user);
}

#[test]
fn unknown_and_malformed_payout_callbacks_are_acknowledged() {
    let f = fixture("wd-payout-junk");
    let recon = &f.platform.reconciliation;

    let unknown = recon
        .handle_payout_webhook("8.8.8.8", &payout_callback("WD-NOPE", "00"))
        .unwrap();
    assert_eq!(unknown.outcome, WebhookOutcome::UnknownOrder);

    let junk = recon.handle_payout_webhook("8.8.8.8", "{}").unwrap();
    assert_eq!(junk.outcome, WebhookOutcome::Malformed);
    assert_eq!(junk.ack.response_code, "2004400");
}

#[test]
fn pending_payout_status_is_ignored() {
    let f = auto_payout_fixture("wd-payout-pending");
    let (user, account) = funded_user(&f, 100_000);
    let receipt = f
        .platform
        .withdrawals
        .create_withdrawal(user, major(20_000), account)
        .unwrap();

    let reply = f
        .platform
        .reconciliation
        .handle_payout_webhook("8.8.8.8", &payout_callback(&receipt.order_id, "03"))
        .unwrap();
    assert_eq!(reply.outcome, WebhookOutcome::Ignored);
    assert_eq!(
        f.platform
            .withdrawals
            .withdrawal(receipt.withdrawal_id)
            .unwrap()
            .status,
        WithdrawalStatus::Pending
    );
}
