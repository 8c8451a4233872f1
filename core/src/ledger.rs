//! Balance ledger primitive.
//!
//! RULE: `apply_ledger_mutation` is the only code path that changes a
//! user's balance. It writes the new balance and exactly one ledger entry
//! inside the caller's unit of work, so neither can exist without the other.

use crate::{
    error::{LedgerError, LedgerResult},
    money::Money,
    store::{LedgerEntryRow, NewEntry, UnitOfWork},
    types::{EntryKind, EntryStatus, Flow, UserId},
};
use chrono::{DateTime, Utc};

/// Apply a signed balance change and record it under `order_id`.
///
/// Fails with `DuplicateOrder` if `order_id` was already applied and with
/// `InsufficientBalance` if the balance would go negative. Either failure
/// leaves the unit of work untouched.
pub fn apply_ledger_mutation(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    delta: Money,
    kind: EntryKind,
    order_id: &str,
    note: &str,
    now: DateTime<Utc>,
) -> LedgerResult<(Money, LedgerEntryRow)> {
    if uow.entry_exists(order_id)? {
        return Err(LedgerError::DuplicateOrder {
            order_id: order_id.to_string(),
        });
    }

    let user = uow.lock_user(user_id)?;
    let new_balance = user.balance + delta;
    if new_balance.is_negative() {
        return Err(LedgerError::InsufficientBalance {
            available: user.balance,
            required: delta.abs(),
        });
    }

    let entry = uow.insert_entry(
        &NewEntry {
            user_id,
            order_id,
            amount: delta.abs(),
            flow: if delta.is_negative() { Flow::Outbound } else { Flow::Inbound },
            kind,
            balance_delta: delta,
            status: EntryStatus::Success,
            note,
        },
        now,
    )?;
    uow.set_balance(user_id, new_balance)?;

    log::debug!(
        "ledger: user={user_id} {kind} {delta} -> {new_balance} ({order_id})"
    );
    Ok((new_balance, entry))
}

/// Like `apply_ledger_mutation`, but an already-applied `order_id` is a
/// no-op returning `None`.
pub fn apply_once(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    delta: Money,
    kind: EntryKind,
    order_id: &str,
    note: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Option<(Money, LedgerEntryRow)>> {
    match apply_ledger_mutation(uow, user_id, delta, kind, order_id, note, now) {
        Ok(applied) => Ok(Some(applied)),
        Err(LedgerError::DuplicateOrder { order_id }) => {
            log::warn!("ledger: order {order_id} already applied, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Record an entry that moves no balance, such as a purchase paid
/// directly through the gateway. Its status follows the payment.
#[allow(clippy::too_many_arguments)]
pub fn record_entry(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    amount: Money,
    flow: Flow,
    kind: EntryKind,
    order_id: &str,
    note: &str,
    now: DateTime<Utc>,
) -> LedgerResult<LedgerEntryRow> {
    uow.insert_entry(
        &NewEntry {
            user_id,
            order_id,
            amount,
            flow,
            kind,
            balance_delta: Money::ZERO,
            status: EntryStatus::Pending,
            note,
        },
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{LedgerStore, NewUser};

    fn setup(balance: i64) -> (LedgerStore, UserId, DateTime<Utc>) {
        let store = LedgerStore::in_memory().unwrap();
        store.migrate().unwrap();
        let now = ManualClock::default_start().now();
        let id = store
            .unit_of_work(|uow| uow.insert_user(&NewUser::real("u", Money::from_major(balance)), now))
            .unwrap();
        (store, id, now)
    }

    #[test]
    fn debit_and_credit_write_one_entry_each() {
        let (store, id, now) = setup(100);
        let (balance, entry) = store
            .unit_of_work(|uow| {
                apply_ledger_mutation(uow, id, Money::from_major(-40), EntryKind::Withdrawal, "A", "", now)
            })
            .unwrap();
        assert_eq!(balance, Money::from_major(60));
        assert_eq!(entry.flow, Flow::Outbound);
        assert_eq!(entry.amount, Money::from_major(40));

        store
            .unit_of_work(|uow| {
                apply_ledger_mutation(uow, id, Money::from_major(5), EntryKind::Return, "B", "", now)
            })
            .unwrap();
        let (user, sum) = store
            .read(|uow| Ok((uow.user(id)?, uow.sum_balance_deltas(id)?)))
            .unwrap();
        assert_eq!(user.balance, Money::from_major(65));
        assert_eq!(user.opening_balance + sum, user.balance);
    }

    #[test]
    fn overdraft_is_rejected_without_side_effects() {
        let (store, id, now) = setup(10);
        let err = store
            .unit_of_work(|uow| {
                apply_ledger_mutation(uow, id, Money::from_major(-11), EntryKind::Withdrawal, "A", "", now)
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        let exists = store.read(|uow| uow.entry_exists("A")).unwrap();
        assert!(!exists);
    }

    #[test]
    fn replayed_order_id_is_not_applied_twice() {
        let (store, id, now) = setup(0);
        for _ in 0..3 {
            store
                .unit_of_work(|uow| {
                    apply_once(uow, id, Money::from_major(7), EntryKind::TeamBonus, "X-REF", "", now)
                })
                .unwrap();
        }
        let user = store.read(|uow| uow.user(id)).unwrap();
        assert_eq!(user.balance, Money::from_major(7));
    }
}
