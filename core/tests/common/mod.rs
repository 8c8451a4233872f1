//! Shared fixture for the integration tests: a wired platform on a
//! shared in-memory database, with a small catalog and one bank.

#![allow(dead_code)]

use invest_ledger_core::{
    clock::{Clock, ManualClock},
    config::PlatformConfig,
    engine::Platform,
    gateway::ScriptedGateway,
    money::Money,
    store::{NewProduct, NewUser},
    subsystem::JobReport,
    types::{BankAccountId, BankId, BankKind, CategoryId, ProductId, ProfitType, UserId},
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub const CRON_KEY: &str = "test-cron-key";

pub struct Fixture {
    pub platform: Platform,
    pub gateway: Arc<ScriptedGateway>,
    pub clock: Arc<ManualClock>,
    pub unlocked: CategoryId,
    pub locked: CategoryId,
    pub bank: BankId,
}

pub fn fixture(tag: &str) -> Fixture {
    fixture_with(tag, PlatformConfig::default_test())
}

pub fn fixture_with(tag: &str, config: PlatformConfig) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let (platform, gateway, clock) =
        Platform::build_test_with(tag, config).expect("build_test failed");
    let unlocked = platform
        .add_category("Daily", ProfitType::Unlocked)
        .unwrap();
    let locked = platform.add_category("Vault", ProfitType::Locked).unwrap();
    let bank = platform.add_bank("BCA", "014", BankKind::Bank).unwrap();
    Fixture {
        platform,
        gateway,
        clock,
        unlocked,
        locked,
        bank,
    }
}

impl Fixture {
    /// Product priced in major units.
    pub fn product(&self, category: CategoryId, amount: i64, daily: i64, duration: u32) -> ProductId {
        self.platform
            .add_product(&NewProduct {
                category_id: category,
                name: format!("Plan {amount}"),
                amount: Money::from_major(amount),
                daily_profit: Money::from_major(daily),
                duration,
                required_vip: 0,
                purchase_limit: 0,
            })
            .unwrap()
    }

    pub fn real_user(&self, name: &str, balance: i64) -> UserId {
        self.platform
            .create_user(&NewUser::real(name, Money::from_major(balance)))
            .unwrap()
    }

    pub fn promotor(&self, name: &str, balance: i64) -> UserId {
        self.platform
            .create_user(&NewUser::promotor(name, Money::from_major(balance)))
            .unwrap()
    }

    pub fn referred_user(&self, name: &str, balance: i64, referrer: UserId) -> UserId {
        self.platform
            .create_user(&NewUser::real(name, Money::from_major(balance)).referred_by(referrer))
            .unwrap()
    }

    pub fn bank_account(&self, user: UserId) -> BankAccountId {
        self.platform
            .add_bank_account(user, self.bank, "Account Holder", "1234567890")
            .unwrap()
    }

    pub fn balance(&self, user: UserId) -> Money {
        self.platform.user(user).unwrap().balance
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::hours(24 * days));
    }

    pub fn run_accrual(&self) -> JobReport {
        self.platform.trigger(CRON_KEY, "daily-returns").unwrap()
    }

    pub fn run_expiry(&self) -> JobReport {
        self.platform.trigger(CRON_KEY, "expire-payments").unwrap()
    }

    pub fn assert_conserved(&self, user: UserId) {
        let audit = self.platform.balance_audit(user).unwrap();
        assert!(audit.consistent, "ledger does not add up: {audit:?}");
    }
}

pub fn major(amount: i64) -> Money {
    Money::from_major(amount)
}

/// Virtual-account style callback: fields nested under `transactionData`.
pub fn va_callback(order_id: &str, status: &str) -> String {
    serde_json::json!({
        "transactionData": {
            "partnerReferenceNo": order_id,
            "callbackType": "payment",
            "paymentFlagStatus": status,
        }
    })
    .to_string()
}

/// QR style callback: fields at the root.
pub fn qr_callback(order_id: &str, callback_type: &str, status: &str) -> String {
    serde_json::json!({
        "originalPartnerReferenceNo": order_id,
        "callbackType": callback_type,
        "latestTransactionStatus": status,
    })
    .to_string()
}

pub fn payout_callback(order_id: &str, status: &str) -> String {
    serde_json::json!({
        "transactionData": {
            "partnerReferenceNo": order_id,
            "paymentFlagStatus": status,
        }
    })
    .to_string()
}
