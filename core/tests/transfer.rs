//! Balance transfers between users.

mod common;

use common::{fixture, fixture_with, major};
use invest_ledger_core::{
    config::PlatformConfig,
    error::LedgerError,
    types::{AccountStatus, EntryKind, Flow},
};

fn open_transfers(tag: &str) -> common::Fixture {
    let mut config = PlatformConfig::default_test();
    config.transfer.required_vip_level = 0;
    fixture_with(tag, config)
}

#[test]
fn transfer_moves_balance_with_paired_entries() {
    let f = open_transfers("trf-basic");
    let sender = f.real_user("sam", 100_000);
    let receiver = f.real_user("rio", 0);

    let receipt = f
        .platform
        .transfers
        .transfer(sender, receiver, major(30_000))
        .unwrap();

    assert_eq!(receipt.recipient, "rio");
    assert_eq!(receipt.sender_balance, major(70_000));
    assert_eq!(f.balance(sender), major(70_000));
    assert_eq!(f.balance(receiver), major(30_000));

    let out = &f.platform.entries_for_user(sender).unwrap()[0];
    assert_eq!(out.kind, EntryKind::Transfer);
    assert_eq!(out.flow, Flow::Outbound);
    let inbound = &f.platform.entries_for_user(receiver).unwrap()[0];
    assert_eq!(inbound.kind, EntryKind::Receive);
    assert_eq!(inbound.order_id, format!("{}-IN", receipt.order_id));

    f.assert_conserved(sender);
    f.assert_conserved(receiver);
}

#[test]
fn transfer_rules() {
    let f = open_transfers("trf-rules");
    let sender = f.real_user("sam", 20_000);
    let receiver = f.real_user("rio", 0);
    let t = &f.platform.transfers;

    let err = t.transfer(sender, receiver, major(5_000)).unwrap_err();
    assert!(matches!(err, LedgerError::AmountOutOfRange { .. }));

    let err = t.transfer(sender, sender, major(10_000)).unwrap_err();
    assert!(matches!(err, LedgerError::TransferNotAllowed { .. }));

    let err = t.transfer(sender, receiver, major(30_000)).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

    f.platform
        .set_user_status(receiver, AccountStatus::Suspended)
        .unwrap();
    let err = t.transfer(sender, receiver, major(10_000)).unwrap_err();
    assert!(matches!(err, LedgerError::TransferNotAllowed { .. }));

    assert_eq!(f.balance(sender), major(20_000));
}

#[test]
fn transfer_requires_vip_level() {
    let f = fixture("trf-vip");
    let sender = f.real_user("sam", 100_000);
    let receiver = f.real_user("rio", 0);

    let err = f
        .platform
        .transfers
        .transfer(sender, receiver, major(10_000))
        .unwrap_err();
    assert!(matches!(err, LedgerError::VipLevelTooLow { required: 3, current: 0 }));
    assert_eq!(f.platform.events("balance_transferred").unwrap().len(), 0);
}
