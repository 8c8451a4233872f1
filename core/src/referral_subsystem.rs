//! Referral bonus cascade.
//!
//! Runs once per contract, inside the settlement unit of work. Only the
//! direct referrer is paid; there is no second level.

use crate::{
    config::ReferralConfig,
    error::LedgerResult,
    event::LedgerEvent,
    ledger::apply_once,
    money::Money,
    order_id,
    store::{ContractRow, UnitOfWork, UserRow},
    types::{EntryKind, ProfitType},
};
use chrono::{DateTime, Utc};

/// Pay the investor's referrer for a locked-category contract. Returns the
/// commission paid, or `None` when nothing was due or it was already paid.
pub fn pay_referral_bonus(
    uow: &UnitOfWork<'_>,
    config: &ReferralConfig,
    contract: &ContractRow,
    investor: &UserRow,
    now: DateTime<Utc>,
) -> LedgerResult<Option<Money>> {
    if contract.profit_type != ProfitType::Locked {
        return Ok(None);
    }
    let Some(referrer_id) = investor.referrer_id else {
        return Ok(None);
    };

    let bonus = contract.amount.percent_bps(config.commission_bps);
    if !bonus.is_positive() {
        return Ok(None);
    }
    let applied = apply_once(
        uow,
        referrer_id,
        bonus,
        EntryKind::TeamBonus,
        &order_id::referral_bonus(&contract.order_id),
        &format!("Referral bonus from {}", investor.name),
        now,
    )?;
    if applied.is_none() {
        return Ok(None);
    }

    let spin_ticket = contract.amount >= config.spin_ticket_threshold;
    if spin_ticket {
        uow.add_spin_tickets(referrer_id, 1)?;
    }
    uow.append_event(
        "referral",
        now,
        &LedgerEvent::ReferralBonusPaid {
            referrer_id,
            investor_id: investor.id,
            contract_id: contract.id,
            amount: bonus,
            spin_ticket,
        },
    )?;
    log::info!(
        "referral: user {referrer_id} earned {bonus} from contract {}{}",
        contract.id,
        if spin_ticket { " (+1 spin ticket)" } else { "" }
    );
    Ok(Some(bonus))
}
