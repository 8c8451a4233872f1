//! Investment-contract ledger core.
//!
//! A balance ledger with investment contracts settled through a payment
//! gateway, withdrawals, daily accrual, referral bonuses and webhook /
//! inquiry reconciliation. `engine::Platform` wires everything together.

pub mod accrual_subsystem;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod expiry_subsystem;
pub mod gateway;
pub mod investment_subsystem;
pub mod ledger;
pub mod money;
pub mod order_id;
pub mod rate_limit;
pub mod reconciliation_subsystem;
pub mod referral_subsystem;
pub mod store;
pub mod subsystem;
pub mod transfer_subsystem;
pub mod types;
pub mod vip;
pub mod withdrawal_subsystem;
