//! Order identifiers.
//!
//! Fresh ids carry a type prefix and a random UUID. Entries derived from an
//! existing order use fixed suffixes, so replaying the same step produces
//! the same id and collides on the ledger's uniqueness constraint.

use uuid::Uuid;

pub const INVESTMENT_PREFIX: &str = "INV";
pub const WITHDRAWAL_PREFIX: &str = "WD";
pub const TRANSFER_PREFIX: &str = "TRF";

pub fn generate(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple()).to_uppercase()
}

/// Per-period profit of an unlocked contract.
pub fn period_return(order_id: &str, period: u32) -> String {
    format!("{order_id}-R{period}")
}

/// Lump-sum profit of a locked contract.
pub fn locked_profit(order_id: &str) -> String {
    format!("{order_id}-PROFIT")
}

pub fn capital_return(order_id: &str) -> String {
    format!("{order_id}-CAPITAL")
}

pub fn referral_bonus(order_id: &str) -> String {
    format!("{order_id}-REF")
}

pub fn refund(order_id: &str) -> String {
    format!("{order_id}-REFUND")
}

/// Receiver side of a transfer.
pub fn transfer_receipt(order_id: &str) -> String {
    format!("{order_id}-IN")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = generate(INVESTMENT_PREFIX);
        let b = generate(INVESTMENT_PREFIX);
        assert!(a.starts_with("INV-"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn derived_ids_are_stable() {
        assert_eq!(period_return("INV-1", 3), "INV-1-R3");
        assert_eq!(capital_return("INV-1"), capital_return("INV-1"));
    }
}
