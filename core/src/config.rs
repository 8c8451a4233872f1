use crate::money::{Bps, Money};
use chrono::{Duration, Weekday};
use serde::{Deserialize, Serialize};

// ── Payment (purchase) ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// QR payments above this are refused by the gateway.
    pub qris_max_amount: Money,
    /// Virtual-account payments below this are refused by the gateway.
    pub bank_min_amount: Money,
    /// Upper-case VA channel codes accepted for bank transfer.
    pub va_channels: Vec<VaChannel>,
    /// Used when the gateway does not report an expiry.
    pub payment_ttl_hours: i64,
    /// Appended to the customer name on virtual accounts.
    pub merchant_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaChannel {
    pub channel: String,
    pub bank_code: String,
}

// ── Withdrawal ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    pub min_amount: Money,
    pub max_amount: Money,
    pub fee_bps: Bps,
    pub auto_payout: bool,
    pub window: WithdrawalWindow,
    pub payout_callback_url: String,
}

/// Local-time window in which withdrawals are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalWindow {
    pub weekdays: Vec<Weekday>,
    /// Inclusive.
    pub start_hour: u32,
    /// Exclusive.
    pub end_hour: u32,
    /// Platform timezone as a fixed offset from UTC.
    pub utc_offset_minutes: i32,
}

// ── Referral / VIP / transfer ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    pub commission_bps: Bps,
    pub spin_ticket_threshold: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipConfig {
    /// `thresholds[i]` is the minimum cumulative amount for level `i + 1`.
    pub thresholds: Vec<Money>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub min_amount: Money,
    pub max_amount: Money,
    pub required_vip_level: u8,
}

// ── Triggers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub cron_key: String,
    pub accrual_period_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub max_requests_per_window: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub payment: PaymentConfig,
    pub withdrawal: WithdrawalConfig,
    pub referral: ReferralConfig,
    pub vip: VipConfig,
    pub transfer: TransferConfig,
    pub scheduler: SchedulerConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
}

impl PlatformConfig {
    /// Load from a JSON file.
    /// In tests, use PlatformConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PlatformConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let w = &self.withdrawal;
        if w.min_amount > w.max_amount {
            anyhow::bail!("withdrawal.min_amount exceeds withdrawal.max_amount");
        }
        if w.fee_bps > 10_000 {
            anyhow::bail!("withdrawal.fee_bps must be at most 10000");
        }
        if w.window.start_hour >= w.window.end_hour || w.window.end_hour > 24 {
            anyhow::bail!("withdrawal.window hours must satisfy start < end <= 24");
        }
        if self
            .vip
            .thresholds
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            anyhow::bail!("vip.thresholds must be strictly increasing");
        }
        if self.vip.thresholds.len() > u8::MAX as usize {
            anyhow::bail!("vip.thresholds has too many levels");
        }
        if self.scheduler.cron_key.trim().is_empty() {
            anyhow::bail!("scheduler.cron_key must not be empty");
        }
        if self.scheduler.accrual_period_hours <= 0 {
            anyhow::bail!("scheduler.accrual_period_hours must be positive");
        }
        if self.webhook.window_secs == 0 || self.webhook.window_secs > 86_400 {
            anyhow::bail!("webhook.window_secs must be between 1 and 86400");
        }
        if w.window.utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!("withdrawal.window.utc_offset_minutes out of range");
        }
        if self.gateway.timeout_secs == 0 {
            anyhow::bail!("gateway.timeout_secs must be positive");
        }
        if self.transfer.min_amount > self.transfer.max_amount {
            anyhow::bail!("transfer.min_amount exceeds transfer.max_amount");
        }
        Ok(())
    }

    pub fn accrual_period(&self) -> Duration {
        Duration::hours(self.scheduler.accrual_period_hours)
    }

    /// Budget for a single outbound gateway call.
    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway.timeout_secs)
    }

    pub fn va_bank_code(&self, channel: &str) -> Option<&str> {
        self.payment
            .va_channels
            .iter()
            .find(|c| c.channel.eq_ignore_ascii_case(channel))
            .map(|c| c.bank_code.as_str())
    }

    /// Deterministic configuration for tests.
    pub fn default_test() -> Self {
        let channels = [
            ("BCA", "014"),
            ("BNI", "009"),
            ("BRI", "002"),
            ("BSI", "451"),
            ("CIMB", "022"),
            ("DANAMON", "011"),
            ("MANDIRI", "008"),
            ("BMI", "147"),
            ("BNC", "490"),
            ("OCBC", "028"),
            ("PERMATA", "013"),
            ("SINARMAS", "153"),
        ];
        Self {
            payment: PaymentConfig {
                qris_max_amount: Money::from_major(10_000_000),
                bank_min_amount: Money::from_major(10_000),
                va_channels: channels
                    .iter()
                    .map(|(channel, code)| VaChannel {
                        channel: (*channel).into(),
                        bank_code: (*code).into(),
                    })
                    .collect(),
                payment_ttl_hours: 24,
                merchant_label: "Ledger".into(),
            },
            withdrawal: WithdrawalConfig {
                min_amount: Money::from_major(10_000),
                max_amount: Money::from_major(10_000_000),
                fee_bps: 1_000,
                auto_payout: false,
                window: WithdrawalWindow {
                    weekdays: vec![
                        Weekday::Mon,
                        Weekday::Tue,
                        Weekday::Wed,
                        Weekday::Thu,
                        Weekday::Fri,
                        Weekday::Sat,
                    ],
                    start_hour: 9,
                    end_hour: 17,
                    utc_offset_minutes: 7 * 60,
                },
                payout_callback_url: "https://example.invalid/callback/payouts".into(),
            },
            referral: ReferralConfig {
                commission_bps: 3_000,
                spin_ticket_threshold: Money::from_major(100_000),
            },
            vip: VipConfig {
                thresholds: vec![
                    Money::from_major(50_000),
                    Money::from_major(1_200_000),
                    Money::from_major(10_000_000),
                    Money::from_major(30_000_000),
                    Money::from_major(150_000_000),
                ],
            },
            transfer: TransferConfig {
                min_amount: Money::from_major(10_000),
                max_amount: Money::from_major(50_000_000),
                required_vip_level: 3,
            },
            scheduler: SchedulerConfig {
                cron_key: "test-cron-key".into(),
                accrual_period_hours: 24,
            },
            gateway: GatewayConfig { timeout_secs: 30 },
            webhook: WebhookConfig {
                max_requests_per_window: 60,
                window_secs: 60,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_test_config_is_valid() {
        PlatformConfig::default_test().validate().unwrap();
    }

    #[test]
    fn non_increasing_vip_table_is_rejected() {
        let mut cfg = PlatformConfig::default_test();
        cfg.vip.thresholds.swap(0, 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn channel_lookup_ignores_case() {
        let cfg = PlatformConfig::default_test();
        assert_eq!(cfg.va_bank_code("bca"), Some("014"));
        assert_eq!(cfg.va_bank_code("XYZ"), None);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = PlatformConfig::default_test();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PlatformConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.withdrawal.fee_bps, cfg.withdrawal.fee_bps);
        assert_eq!(back.withdrawal.window.weekdays.len(), 6);
    }

    #[test]
    fn shipped_sample_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../data/platform.json");
        let cfg = PlatformConfig::load(path).unwrap();
        assert_eq!(cfg.va_bank_code("MANDIRI"), Some("008"));
        assert_eq!(cfg.accrual_period(), Duration::hours(24));
        assert_eq!(cfg.gateway_timeout(), std::time::Duration::from_secs(30));
    }

    #[test]
    fn zero_gateway_timeout_is_rejected() {
        let mut cfg = PlatformConfig::default_test();
        cfg.gateway.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
