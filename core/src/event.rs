//! Audit events.
//!
//! Every state change appends one `LedgerEvent` to `event_log` inside the
//! same unit of work, so the audit trail commits or rolls back together
//! with the change it describes.

use crate::{
    money::Money,
    types::{ContractId, OrderId, UserId, WithdrawalId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ── Contracts ─────────────────────────────────
    ContractCreated {
        contract_id: ContractId,
        user_id: UserId,
        order_id: OrderId,
        amount: Money,
        synchronous: bool,
    },
    ContractSettled {
        contract_id: ContractId,
        order_id: OrderId,
        source: SettlementSource,
    },
    ContractCancelled {
        contract_id: ContractId,
        order_id: OrderId,
        reason: String,
    },
    ContractSuspended {
        contract_id: ContractId,
    },
    ContractResumed {
        contract_id: ContractId,
    },
    AccrualApplied {
        contract_id: ContractId,
        period: u32,
        profit_paid: Money,
    },
    ContractCompleted {
        contract_id: ContractId,
        capital_returned: Money,
        total_profit: Money,
    },
    VipLevelChanged {
        user_id: UserId,
        from: u8,
        to: u8,
    },

    // ── Referral ─────────────────────────────────
    ReferralBonusPaid {
        referrer_id: UserId,
        investor_id: UserId,
        contract_id: ContractId,
        amount: Money,
        spin_ticket: bool,
    },

    // ── Withdrawals ──────────────────────────────
    WithdrawalRequested {
        withdrawal_id: WithdrawalId,
        user_id: UserId,
        order_id: OrderId,
        amount: Money,
        charge: Money,
    },
    PayoutDispatched {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
        net_amount: Money,
    },
    PayoutDispatchFailed {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
    },
    PayoutOutcomeUnknown {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
    },
    PayoutReportedFailed {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
    },
    PayoutConflict {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
        status: String,
    },
    WithdrawalApproved {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
    },
    WithdrawalRejected {
        withdrawal_id: WithdrawalId,
        order_id: OrderId,
        refunded: Money,
    },

    // ── Transfers ────────────────────────────────
    BalanceTransferred {
        sender_id: UserId,
        receiver_id: UserId,
        order_id: OrderId,
        amount: Money,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementSource {
    Synchronous,
    Webhook,
    Inquiry,
    Admin,
}

impl LedgerEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            LedgerEvent::ContractCreated { .. } => "contract_created",
            LedgerEvent::ContractSettled { .. } => "contract_settled",
            LedgerEvent::ContractCancelled { .. } => "contract_cancelled",
            LedgerEvent::ContractSuspended { .. } => "contract_suspended",
            LedgerEvent::ContractResumed { .. } => "contract_resumed",
            LedgerEvent::AccrualApplied { .. } => "accrual_applied",
            LedgerEvent::ContractCompleted { .. } => "contract_completed",
            LedgerEvent::VipLevelChanged { .. } => "vip_level_changed",
            LedgerEvent::ReferralBonusPaid { .. } => "referral_bonus_paid",
            LedgerEvent::WithdrawalRequested { .. } => "withdrawal_requested",
            LedgerEvent::PayoutDispatched { .. } => "payout_dispatched",
            LedgerEvent::PayoutDispatchFailed { .. } => "payout_dispatch_failed",
            LedgerEvent::PayoutOutcomeUnknown { .. } => "payout_outcome_unknown",
            LedgerEvent::PayoutReportedFailed { .. } => "payout_reported_failed",
            LedgerEvent::PayoutConflict { .. } => "payout_conflict",
            LedgerEvent::WithdrawalApproved { .. } => "withdrawal_approved",
            LedgerEvent::WithdrawalRejected { .. } => "withdrawal_rejected",
            LedgerEvent::BalanceTransferred { .. } => "balance_transferred",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub source: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized LedgerEvent
}
