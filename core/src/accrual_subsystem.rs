//! Daily accrual scheduler.
//!
//! Each due contract is advanced by exactly one period in its own unit of
//! work. `process_contract` re-reads the contract under the write lock and
//! does nothing unless it is still due, so the step is safe to re-enter
//! from overlapping triggers.
//!
//!   unlocked: one `return` entry per period, paid immediately.
//!   locked:   nothing per period; the whole `daily_profit × duration` is
//!             paid in one entry on the final period.
//!   both:     on the final period the contract completes and the
//!             principal comes back as a `capital_return` entry.

use crate::{
    clock::Clock,
    config::PlatformConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    ledger::apply_once,
    money::Money,
    order_id,
    store::{ContractRow, LedgerStore, UnitOfWork},
    subsystem::{BatchJob, JobReport},
    types::{ContractId, ContractStatus, EntryKind, ProfitType},
};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

pub const JOB_NAME: &str = "daily-returns";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// Not Running, not yet due, or already fully paid.
    NotDue,
    Accrued { period: u32, profit_paid: Money },
    Completed { period: u32, profit_paid: Money },
}

pub struct AccrualSubsystem {
    store: LedgerStore,
    config: Arc<PlatformConfig>,
    clock: Arc<dyn Clock>,
}

impl AccrualSubsystem {
    pub fn new(store: LedgerStore, config: Arc<PlatformConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Advance one contract if it is due now.
    pub fn process_one(&self, contract_id: ContractId) -> LedgerResult<AccrualOutcome> {
        let now = self.clock.now();
        self.store
            .unit_of_work(|uow| process_contract(uow, &self.config, contract_id, now))
    }
}

impl BatchJob for AccrualSubsystem {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    fn run(&self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        let mut report = JobReport::new(JOB_NAME);
        let due = self.store.read(|uow| uow.due_contract_ids(now))?;
        log::debug!("accrual: {} contracts due", due.len());

        for contract_id in due {
            let step = self
                .store
                .unit_of_work(|uow| process_contract(uow, &self.config, contract_id, now));
            match step {
                Ok(AccrualOutcome::NotDue) => report.skipped += 1,
                Ok(_) => report.processed += 1,
                Err(e) => {
                    log::error!("accrual: contract {contract_id} rolled back: {e}");
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "accrual: processed={} skipped={} failed={}",
            report.processed,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Apply the next accrual period of one contract.
pub fn process_contract(
    uow: &UnitOfWork<'_>,
    config: &PlatformConfig,
    contract_id: ContractId,
    now: DateTime<Utc>,
) -> LedgerResult<AccrualOutcome> {
    let c = uow.contract(contract_id)?;
    let due = c.status == ContractStatus::Running
        && c.periods_paid < c.duration
        && c.next_accrual_at.is_some_and(|at| at <= now);
    if !due {
        return Ok(AccrualOutcome::NotDue);
    }

    uow.lock_user(c.user_id)?;
    let period = c.periods_paid + 1;
    let is_final = period == c.duration;
    let profit_paid = pay_period_profit(uow, &c, period, is_final, now)?;
    // Earned profit, whether or not a locked contract has paid it out yet.
    let total_returned = c.total_returned + c.daily_profit;

    if !uow.record_accrual(
        contract_id,
        c.periods_paid,
        total_returned,
        now,
        now + config.accrual_period(),
    )? {
        return Err(LedgerError::InvalidTransition {
            entity: "contract",
            key: contract_id.to_string(),
            from: format!("period {}", c.periods_paid),
            to: format!("period {period}"),
        });
    }
    uow.append_event(
        "accrual",
        now,
        &LedgerEvent::AccrualApplied {
            contract_id,
            period,
            profit_paid,
        },
    )?;

    if !is_final {
        log::debug!("accrual: contract {contract_id} period {period}/{}", c.duration);
        return Ok(AccrualOutcome::Accrued { period, profit_paid });
    }

    uow.transition_contract(contract_id, ContractStatus::Running, ContractStatus::Completed)?;
    apply_once(
        uow,
        c.user_id,
        c.amount,
        EntryKind::CapitalReturn,
        &order_id::capital_return(&c.order_id),
        "Capital return",
        now,
    )?;
    uow.append_event(
        "accrual",
        now,
        &LedgerEvent::ContractCompleted {
            contract_id,
            capital_returned: c.amount,
            total_profit: total_returned,
        },
    )?;
    log::info!("accrual: contract {contract_id} completed, capital {} returned", c.amount);
    Ok(AccrualOutcome::Completed { period, profit_paid })
}

fn pay_period_profit(
    uow: &UnitOfWork<'_>,
    c: &ContractRow,
    period: u32,
    is_final: bool,
    now: DateTime<Utc>,
) -> LedgerResult<Money> {
    let (amount, entry_order, note) = match c.profit_type {
        ProfitType::Unlocked => (
            c.daily_profit,
            order_id::period_return(&c.order_id, period),
            format!("Return {period}/{}", c.duration),
        ),
        ProfitType::Locked if is_final => (
            c.daily_profit * i64::from(c.duration),
            order_id::locked_profit(&c.order_id),
            format!("Profit for {} periods", c.duration),
        ),
        ProfitType::Locked => return Ok(Money::ZERO),
    };
    if !amount.is_positive() {
        return Ok(Money::ZERO);
    }
    let applied = apply_once(uow, c.user_id, amount, EntryKind::Return, &entry_order, &note, now)?;
    Ok(applied.map_or(Money::ZERO, |_| amount))
}
