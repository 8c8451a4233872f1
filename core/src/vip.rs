use crate::money::Money;

/// VIP level for a cumulative VIP-qualifying amount: the number of
/// thresholds reached. `thresholds` must be strictly increasing.
pub fn level_for(total_invested_vip: Money, thresholds: &[Money]) -> u8 {
    thresholds
        .iter()
        .take_while(|t| total_invested_vip >= **t)
        .count() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;

    fn level(major: i64) -> u8 {
        level_for(
            Money::from_major(major),
            &PlatformConfig::default_test().vip.thresholds,
        )
    }

    #[test]
    fn table_boundaries() {
        assert_eq!(level(0), 0);
        assert_eq!(level(49_999), 0);
        assert_eq!(level(50_000), 1);
        assert_eq!(level(1_199_999), 1);
        assert_eq!(level(1_200_000), 2);
        assert_eq!(level(10_000_000), 3);
        assert_eq!(level(30_000_000), 4);
        assert_eq!(level(150_000_000), 5);
        assert_eq!(level(900_000_000), 5);
    }

    #[test]
    fn just_below_a_threshold_in_minor_units() {
        let t = PlatformConfig::default_test().vip.thresholds;
        assert_eq!(level_for(Money::from_major(50_000) - Money::from_minor(1), &t), 0);
    }
}
