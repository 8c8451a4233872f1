//! Fixed-point money.
//!
//! Amounts are whole minor units (1/100 of the currency unit) held in an
//! `i64`. Percentages are basis points. Nothing in a money path touches
//! floating point, so thousands of accrual steps cannot drift.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

pub const MINOR_PER_MAJOR: i64 = 100;

/// Basis points: 10_000 = 100%.
pub type Bps = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    pub const fn from_major(major: i64) -> Self {
        Money(major * MINOR_PER_MAJOR)
    }

    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Whole major units, truncated toward zero. Gateways take integer
    /// currency amounts.
    pub const fn whole_major(&self) -> i64 {
        self.0 / MINOR_PER_MAJOR
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    /// `self × bps / 10_000`, rounded down in minor units.
    pub fn percent_bps(&self, bps: Bps) -> Money {
        let scaled = (self.0 as i128 * bps as i128) / 10_000;
        Money(scaled as i64)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Money;
    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:02}",
            abs / MINOR_PER_MAJOR as u64,
            abs % MINOR_PER_MAJOR as u64
        )
    }
}

impl ToSql for Money {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Money {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(Money)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_down_in_minor_units() {
        assert_eq!(Money::from_major(20_000).percent_bps(1_000), Money::from_major(2_000));
        assert_eq!(Money::from_minor(999).percent_bps(1_000), Money::from_minor(99));
        assert_eq!(Money::from_major(200_000).percent_bps(3_000), Money::from_major(60_000));
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Money::from_minor(123_456).to_string(), "1234.56");
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
    }

    #[test]
    fn repeated_accrual_does_not_drift() {
        let daily = Money::from_minor(33_333);
        let total: Money = std::iter::repeat(daily).take(3_650).sum();
        assert_eq!(total, daily * 3_650);
    }
}
