//! Withdrawal engine.
//!
//! States: pending → {success, failed}. The requested amount is held at
//! creation by a ledger debit. From there it is either paid out (success)
//! or refunded exactly once through a deterministic `-REFUND` entry
//! (failed). A payout in flight blocks rejection, so a withdrawal can
//! never be both paid and refunded.
//!
//! `payout_state` tracks the gateway side independently of `status`:
//!   not_sent → dispatched → (webhook success) | gateway_failed → dispatched …

use crate::{
    clock::Clock,
    config::{PlatformConfig, WithdrawalWindow},
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    gateway::{PaymentGateway, PayoutRequest},
    ledger::apply_ledger_mutation,
    money::Money,
    order_id,
    store::{LedgerStore, NewWithdrawal, UnitOfWork, WithdrawalRow},
    types::{
        AccountStatus, BankAccountId, CatalogStatus, EntryKind, EntryStatus, OrderId,
        PayoutState, UserId, WithdrawalId, WithdrawalStatus,
    },
};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;

const SOURCE: &str = "withdrawal";

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal_id: WithdrawalId,
    pub order_id: OrderId,
    pub amount: Money,
    pub charge: Money,
    pub net_amount: Money,
    pub bank_name: String,
    pub account_name: String,
    /// Masked for display.
    pub account_number: String,
    pub status: WithdrawalStatus,
}

/// What a payout webhook did to its withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutOutcome {
    UnknownOrder,
    Succeeded,
    /// Gateway reported failure; the withdrawal stays Pending for review.
    ReturnedForReview,
    AlreadyFinal,
    /// Success reported for a withdrawal that was already refunded.
    Conflict,
    Ignored,
}

pub struct WithdrawalSubsystem {
    store: LedgerStore,
    config: Arc<PlatformConfig>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl WithdrawalSubsystem {
    pub fn new(
        store: LedgerStore,
        config: Arc<PlatformConfig>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            gateway,
            clock,
        }
    }

    // ── Request ───────────────────────────────────────────────────

    pub fn create_withdrawal(
        &self,
        user_id: UserId,
        amount: Money,
        bank_account_id: BankAccountId,
    ) -> LedgerResult<WithdrawalReceipt> {
        let now = self.clock.now();
        let cfg = &self.config.withdrawal;
        if amount < cfg.min_amount || amount > cfg.max_amount {
            return Err(LedgerError::AmountOutOfRange {
                amount,
                min: cfg.min_amount,
                max: cfg.max_amount,
            });
        }
        if !within_window(&cfg.window, now) {
            return Err(LedgerError::OutsideWithdrawalWindow);
        }

        let (receipt, promotor) = self.store.unit_of_work(|uow| {
            let user = uow.lock_user(user_id)?;
            if user.status != AccountStatus::Active {
                return Err(LedgerError::AccountInactive { user_id });
            }
            let account = uow.bank_account(bank_account_id)?;
            if account.user_id != user_id {
                return Err(LedgerError::not_found("bank account", bank_account_id));
            }
            let bank = uow.bank(account.bank_id)?;
            if bank.status != CatalogStatus::Active {
                return Err(LedgerError::BankUnavailable { bank: bank.name });
            }
            let (day_start, day_end) = local_day_bounds(&cfg.window, now);
            if uow.count_withdrawals_between(user_id, day_start, day_end)? > 0 {
                return Err(LedgerError::DailyWithdrawalLimit { user_id });
            }
            if user.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    available: user.balance,
                    required: amount,
                });
            }

            let charge = amount.percent_bps(cfg.fee_bps);
            let net_amount = amount - charge;
            let order_id = order_id::generate(order_id::WITHDRAWAL_PREFIX);
            let masked = mask_account_number(&account.account_number);
            let withdrawal_id = uow.insert_withdrawal(
                &NewWithdrawal {
                    user_id,
                    bank_account_id,
                    amount,
                    charge,
                    net_amount,
                    order_id: order_id.clone(),
                },
                now,
            )?;
            apply_ledger_mutation(
                uow,
                user_id,
                -amount,
                EntryKind::Withdrawal,
                &order_id,
                &format!("Withdrawal to {} {masked}", bank.name),
                now,
            )?;
            uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::WithdrawalRequested {
                    withdrawal_id,
                    user_id,
                    order_id: order_id.clone(),
                    amount,
                    charge,
                },
            )?;

            let status = if user.is_promotor() {
                uow.finish_withdrawal(withdrawal_id, WithdrawalStatus::Success, now)?;
                WithdrawalStatus::Success
            } else {
                uow.set_entry_status(&order_id, EntryStatus::Pending)?;
                WithdrawalStatus::Pending
            };
            log::info!("withdrawal {order_id}: {amount} held for user {user_id} ({status})");

            Ok((
                WithdrawalReceipt {
                    withdrawal_id,
                    order_id,
                    amount,
                    charge,
                    net_amount,
                    bank_name: bank.name,
                    account_name: account.account_name,
                    account_number: masked,
                    status,
                },
                user.is_promotor(),
            ))
        })?;

        if !promotor && cfg.auto_payout {
            // The hold stands whatever the gateway says.
            if let Err(e) = self.dispatch_payout(receipt.withdrawal_id) {
                log::warn!("withdrawal {}: automatic payout failed: {e}", receipt.order_id);
            }
        }
        Ok(receipt)
    }

    // ── Administration ────────────────────────────────────────────

    /// With automatic payout disabled, finalises a Pending withdrawal as
    /// Success. With it enabled, sends (or re-sends) the gateway payout and
    /// leaves finalisation to the payout webhook.
    pub fn approve_withdrawal(&self, withdrawal_id: WithdrawalId) -> LedgerResult<()> {
        if self.config.withdrawal.auto_payout {
            return self.dispatch_payout(withdrawal_id);
        }
        let now = self.clock.now();
        self.store.unit_of_work(|uow| {
            let w = uow.withdrawal(withdrawal_id)?;
            if !uow.finish_withdrawal(withdrawal_id, WithdrawalStatus::Success, now)? {
                return Err(invalid_transition(&w, WithdrawalStatus::Success));
            }
            mark_paid(uow, &w, now)
        })
    }

    /// Refund the full held amount and mark Failed. Refused once final, and
    /// while a payout is in flight.
    pub fn reject_withdrawal(&self, withdrawal_id: WithdrawalId) -> LedgerResult<()> {
        let now = self.clock.now();
        self.store.unit_of_work(|uow| {
            let w = uow.withdrawal(withdrawal_id)?;
            if w.payout_state == PayoutState::Dispatched {
                return Err(LedgerError::InvalidTransition {
                    entity: "withdrawal",
                    key: w.order_id.clone(),
                    from: PayoutState::Dispatched.to_string(),
                    to: WithdrawalStatus::Failed.to_string(),
                });
            }
            if !uow.finish_withdrawal(withdrawal_id, WithdrawalStatus::Failed, now)? {
                return Err(invalid_transition(&w, WithdrawalStatus::Failed));
            }
            uow.set_entry_status(&w.order_id, EntryStatus::Failed)?;
            apply_ledger_mutation(
                uow,
                w.user_id,
                w.amount,
                EntryKind::Refund,
                &order_id::refund(&w.order_id),
                "Withdrawal rejected, funds returned",
                now,
            )?;
            uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::WithdrawalRejected {
                    withdrawal_id,
                    order_id: w.order_id.clone(),
                    refunded: w.amount,
                },
            )?;
            log::info!("withdrawal {}: rejected, {} refunded", w.order_id, w.amount);
            Ok(())
        })
    }

    /// Claim the payout, call the gateway with no lock held, then record
    /// the outcome. The claim (`dispatched`) happens first so a concurrent
    /// rejection cannot refund money that is already on its way.
    fn dispatch_payout(&self, withdrawal_id: WithdrawalId) -> LedgerResult<()> {
        let now = self.clock.now();
        let request = self.store.unit_of_work(|uow| {
            let w = uow.withdrawal(withdrawal_id)?;
            if w.status != WithdrawalStatus::Pending {
                return Err(invalid_transition(&w, WithdrawalStatus::Success));
            }
            if w.payout_state == PayoutState::Dispatched {
                return Ok(None);
            }
            let account = uow.bank_account(w.bank_account_id)?;
            let bank = uow.bank(account.bank_id)?;
            uow.set_payout_state(withdrawal_id, PayoutState::Dispatched, now)?;
            Ok(Some(PayoutRequest {
                order_id: w.order_id,
                destination_account: account.account_number,
                code: bank.code,
                rail: bank.kind,
                amount: w.net_amount,
                callback_url: self.config.withdrawal.payout_callback_url.clone(),
            }))
        })?;
        let Some(request) = request else {
            log::debug!("withdrawal {withdrawal_id}: payout already in flight");
            return Ok(());
        };

        let sent = self
            .gateway
            .access_token()
            .and_then(|token| self.gateway.payout(&token, &request));

        self.store.unit_of_work(|uow| match &sent {
            Ok(_) => uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::PayoutDispatched {
                    withdrawal_id,
                    order_id: request.order_id.clone(),
                    net_amount: request.amount,
                },
            ),
            Err(e) if e.is_definitive() => {
                uow.set_payout_state(withdrawal_id, PayoutState::GatewayFailed, now)?;
                uow.append_event(
                    SOURCE,
                    now,
                    &LedgerEvent::PayoutDispatchFailed {
                        withdrawal_id,
                        order_id: request.order_id.clone(),
                    },
                )
            }
            // The transfer may have gone through. Stay `dispatched` until the
            // payout webhook settles it either way.
            Err(_) => uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::PayoutOutcomeUnknown {
                    withdrawal_id,
                    order_id: request.order_id.clone(),
                },
            ),
        })?;

        match sent {
            Ok(_) => {
                log::info!("withdrawal {}: payout of {} sent", request.order_id, request.amount);
                Ok(())
            }
            Err(e) => {
                log::warn!("withdrawal {}: payout call failed: {e}", request.order_id);
                Err(e.into())
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn withdrawal(&self, withdrawal_id: WithdrawalId) -> LedgerResult<WithdrawalRow> {
        self.store.read(|uow| uow.withdrawal(withdrawal_id))
    }

    pub fn withdrawals_for_user(&self, user_id: UserId) -> LedgerResult<Vec<WithdrawalRow>> {
        self.store.read(|uow| uow.withdrawals_for_user(user_id))
    }
}

/// Apply a payout status code inside `uow`: "00" = success, "06" = failed,
/// anything else is ignored. A failure report never refunds by itself.
pub fn apply_payout_status(
    uow: &UnitOfWork<'_>,
    order_id: &str,
    status_code: &str,
    now: DateTime<Utc>,
) -> LedgerResult<PayoutOutcome> {
    let Some(w) = uow.withdrawal_by_order(order_id)? else {
        return Ok(PayoutOutcome::UnknownOrder);
    };
    match (status_code, w.status) {
        ("00", WithdrawalStatus::Pending) => {
            uow.finish_withdrawal(w.id, WithdrawalStatus::Success, now)?;
            uow.set_payout_state(w.id, PayoutState::Dispatched, now)?;
            mark_paid(uow, &w, now)?;
            Ok(PayoutOutcome::Succeeded)
        }
        ("00", WithdrawalStatus::Failed) => {
            uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::PayoutConflict {
                    withdrawal_id: w.id,
                    order_id: w.order_id.clone(),
                    status: w.status.to_string(),
                },
            )?;
            log::error!("withdrawal {order_id}: gateway reports success after refund");
            Ok(PayoutOutcome::Conflict)
        }
        ("06", WithdrawalStatus::Pending) => {
            uow.set_payout_state(w.id, PayoutState::GatewayFailed, now)?;
            uow.append_event(
                SOURCE,
                now,
                &LedgerEvent::PayoutReportedFailed {
                    withdrawal_id: w.id,
                    order_id: w.order_id.clone(),
                },
            )?;
            log::warn!("withdrawal {order_id}: payout failed, held for review");
            Ok(PayoutOutcome::ReturnedForReview)
        }
        ("00" | "06", _) => Ok(PayoutOutcome::AlreadyFinal),
        _ => Ok(PayoutOutcome::Ignored),
    }
}

fn mark_paid(uow: &UnitOfWork<'_>, w: &WithdrawalRow, now: DateTime<Utc>) -> LedgerResult<()> {
    uow.set_entry_status(&w.order_id, EntryStatus::Success)?;
    uow.append_event(
        SOURCE,
        now,
        &LedgerEvent::WithdrawalApproved {
            withdrawal_id: w.id,
            order_id: w.order_id.clone(),
        },
    )?;
    log::info!("withdrawal {}: paid out {}", w.order_id, w.net_amount);
    Ok(())
}

fn invalid_transition(w: &WithdrawalRow, to: WithdrawalStatus) -> LedgerError {
    LedgerError::InvalidTransition {
        entity: "withdrawal",
        key: w.order_id.clone(),
        from: w.status.to_string(),
        to: to.to_string(),
    }
}

fn platform_offset(window: &WithdrawalWindow) -> FixedOffset {
    FixedOffset::east_opt(window.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// True when `now`, in platform local time, falls on an allowed weekday
/// inside `[start_hour, end_hour)`.
pub fn within_window(window: &WithdrawalWindow, now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&platform_offset(window));
    window.weekdays.contains(&local.weekday())
        && (window.start_hour..window.end_hour).contains(&local.hour())
}

/// The platform-local calendar day containing `now`, as a UTC range.
pub fn local_day_bounds(window: &WithdrawalWindow, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = platform_offset(window);
    let local_midnight = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    let start = local_midnight.and_utc() - Duration::seconds(i64::from(offset.local_minus_utc()));
    (start, start + Duration::days(1))
}

/// First four and last four characters; short numbers are shown as-is.
pub fn mask_account_number(account_number: &str) -> String {
    let chars: Vec<char> = account_number.chars().collect();
    if chars.len() <= 6 {
        return account_number.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
