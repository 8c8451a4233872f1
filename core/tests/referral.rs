//! Referral bonus cascade and VIP level tracking at settlement.

mod common;

use common::{fixture, major, va_callback};
use invest_ledger_core::{
    event::LedgerEvent,
    types::{EntryKind, PaymentMethod, ProductId, UserId},
};

fn buy_and_settle(f: &common::Fixture, user: UserId, product: ProductId) -> String {
    let receipt = f
        .platform
        .investments
        .create_contract(user, product, PaymentMethod::Qris, None)
        .unwrap();
    f.platform
        .reconciliation
        .handle_payment_webhook("9.9.9.9", &va_callback(&receipt.order_id, "00"))
        .unwrap();
    receipt.order_id
}

#[test]
fn locked_purchase_pays_referrer_thirty_percent_and_a_spin_ticket() {
    let f = fixture("ref-locked-large");
    let product = f.product(f.locked, 200_000, 5_000, 30);
    let referrer = f.real_user("rina", 0);
    let investor = f.referred_user("eko", 0, referrer);

    let order_id = buy_and_settle(&f, investor, product);

    let r = f.platform.user(referrer).unwrap();
    assert_eq!(r.balance, major(60_000));
    assert_eq!(r.spin_tickets, 1);

    let entries = f.platform.entries_for_user(referrer).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::TeamBonus);
    assert_eq!(entries[0].order_id, format!("{order_id}-REF"));
    f.assert_conserved(referrer);
}

#[test]
fn small_locked_purchase_pays_commission_without_ticket() {
    let f = fixture("ref-locked-small");
    let product = f.product(f.locked, 50_000, 1_000, 30);
    let referrer = f.real_user("rina", 0);
    let investor = f.referred_user("eko", 0, referrer);

    buy_and_settle(&f, investor, product);

    let r = f.platform.user(referrer).unwrap();
    assert_eq!(r.balance, major(15_000));
    assert_eq!(r.spin_tickets, 0);
}

#[test]
fn tickets_accumulate_across_contracts() {
    let f = fixture("ref-tickets");
    let product = f.product(f.locked, 100_000, 1_000, 30);
    let referrer = f.real_user("rina", 0);
    let investor = f.referred_user("eko", 0, referrer);

    buy_and_settle(&f, investor, product);
    buy_and_settle(&f, investor, product);

    let r = f.platform.user(referrer).unwrap();
    assert_eq!(r.spin_tickets, 2);
    assert_eq!(r.balance, major(60_000));
}

#[test]
fn unlocked_purchase_pays_no_bonus() {
    let f = fixture("ref-unlocked");
    let product = f.product(f.unlocked, 200_000, 5_000, 30);
    let referrer = f.real_user("rina", 0);
    let investor = f.referred_user("eko", 0, referrer);

    buy_and_settle(&f, investor, product);

    assert_eq!(f.balance(referrer), major(0));
    assert!(f.platform.events("referral_bonus_paid").unwrap().is_empty());
}

#[test]
fn only_the_direct_referrer_is_paid() {
    let f = fixture("ref-one-level");
    let product = f.product(f.locked, 100_000, 1_000, 30);
    let grandparent = f.real_user("gp", 0);
    let parent = f.referred_user("p", 0, grandparent);
    let child = f.referred_user("c", 0, parent);

    buy_and_settle(&f, child, product);

    assert_eq!(f.balance(parent), major(30_000));
    assert_eq!(f.balance(grandparent), major(0));
}

#[test]
fn locked_investment_raises_vip_level() {
    let f = fixture("ref-vip");
    let locked = f.product(f.locked, 1_200_000, 1_000, 30);
    let unlocked = f.product(f.unlocked, 5_000_000, 1_000, 30);
    let user = f.real_user("vera", 0);

    buy_and_settle(&f, user, unlocked);
    let u = f.platform.user(user).unwrap();
    assert_eq!(u.vip_level, 0, "unlocked contracts do not count toward VIP");
    assert_eq!(u.total_invested, major(5_000_000));
    assert_eq!(u.total_invested_vip, major(0));

    buy_and_settle(&f, user, locked);
    let u = f.platform.user(user).unwrap();
    assert_eq!(u.vip_level, 2);
    assert_eq!(u.total_invested_vip, major(1_200_000));

    let changes = f.platform.events("vip_level_changed").unwrap();
    assert_eq!(
        changes,
        vec![LedgerEvent::VipLevelChanged {
            user_id: user,
            from: 0,
            to: 2
        }]
    );
}

#[test]
fn promotor_purchase_pays_no_referral() {
    let f = fixture("ref-promotor");
    let product = f.product(f.locked, 200_000, 1_000, 30);
    let referrer = f.real_user("rina", 0);
    let house = f
        .platform
        .create_user(
            &invest_ledger_core::store::NewUser::promotor("house", major(200_000))
                .referred_by(referrer),
        )
        .unwrap();

    f.platform
        .investments
        .create_contract(house, product, PaymentMethod::Qris, None)
        .unwrap();

    assert_eq!(f.balance(referrer), major(0));
    assert_eq!(f.platform.user(house).unwrap().vip_level, 1);
}
