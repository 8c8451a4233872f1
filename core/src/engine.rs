//! Platform wiring.
//!
//! RULES:
//!   - Every component owns its own connection to the same database.
//!   - Components never call each other's methods; shared steps
//!     (settlement, payout status) are free functions taking a unit of work.
//!   - Batch jobs run in registration order when triggered together,
//!     and only with the scheduler key.

use crate::{
    accrual_subsystem::{self, AccrualSubsystem},
    clock::{Clock, ManualClock, SystemClock},
    config::PlatformConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    expiry_subsystem::{self, ExpirySubsystem},
    gateway::{OfflineGateway, PaymentGateway, ScriptedGateway, TimeoutGateway},
    investment_subsystem::InvestmentSubsystem,
    money::Money,
    reconciliation_subsystem::ReconciliationSubsystem,
    store::{LedgerEntryRow, LedgerStore, NewProduct, NewUser, UserRow},
    subsystem::{BatchJob, JobReport},
    transfer_subsystem::TransferSubsystem,
    types::{
        AccountStatus, BankAccountId, BankId, BankKind, CatalogStatus, CategoryId, ProductId,
        ProfitType, UserId,
    },
    withdrawal_subsystem::WithdrawalSubsystem,
};
use serde::Serialize;
use std::sync::Arc;

/// Result of checking one user against the conservation property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceAudit {
    pub user_id: UserId,
    pub opening_balance: Money,
    pub applied_deltas: Money,
    pub balance: Money,
    pub consistent: bool,
}

pub struct Platform {
    pub store: LedgerStore,
    pub config: Arc<PlatformConfig>,
    pub investments: InvestmentSubsystem,
    pub withdrawals: WithdrawalSubsystem,
    pub transfers: TransferSubsystem,
    pub reconciliation: ReconciliationSubsystem,
    jobs: Vec<Box<dyn BatchJob>>,
    clock: Arc<dyn Clock>,
}

impl Platform {
    /// Wire every component against the database behind `store`.
    /// The schema must already be migrated.
    pub fn build(
        store: LedgerStore,
        config: Arc<PlatformConfig>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        config
            .validate()
            .map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(TimeoutGateway::new(gateway, config.gateway_timeout()));

        let mut platform = Self {
            investments: InvestmentSubsystem::new(
                store.reopen()?,
                config.clone(),
                gateway.clone(),
                clock.clone(),
            ),
            withdrawals: WithdrawalSubsystem::new(
                store.reopen()?,
                config.clone(),
                gateway.clone(),
                clock.clone(),
            ),
            transfers: TransferSubsystem::new(store.reopen()?, config.clone(), clock.clone()),
            reconciliation: ReconciliationSubsystem::new(
                store.reopen()?,
                config.clone(),
                gateway,
                clock.clone(),
            ),
            jobs: Vec::new(),
            store,
            config,
            clock,
        };

        // Job order: accrual first, then expiry.
        let accrual = AccrualSubsystem::new(
            platform.store.reopen()?,
            platform.config.clone(),
            platform.clock.clone(),
        );
        let expiry = ExpirySubsystem::new(platform.store.reopen()?, platform.clock.clone());
        platform.register(Box::new(accrual));
        platform.register(Box::new(expiry));
        Ok(platform)
    }

    /// Production wiring for a database file: migrates, then builds with
    /// the system clock.
    pub fn open(
        path: &str,
        config: PlatformConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> LedgerResult<Self> {
        let store = LedgerStore::open(path)?;
        store.migrate()?;
        Self::build(store, Arc::new(config), gateway, Arc::new(SystemClock))
    }

    /// Fully wired platform on a shared in-memory database named `tag`,
    /// with the test config, a scripted gateway and a manual clock.
    pub fn build_test(tag: &str) -> LedgerResult<(Self, Arc<ScriptedGateway>, Arc<ManualClock>)> {
        Self::build_test_with(tag, PlatformConfig::default_test())
    }

    pub fn build_test_with(
        tag: &str,
        config: PlatformConfig,
    ) -> LedgerResult<(Self, Arc<ScriptedGateway>, Arc<ManualClock>)> {
        let store = LedgerStore::shared_memory(tag)?;
        store.migrate()?;
        let gateway = Arc::new(ScriptedGateway::new());
        let clock = Arc::new(ManualClock::default_start());
        let platform = Self::build(store, Arc::new(config), gateway.clone(), clock.clone())?;
        Ok((platform, gateway, clock))
    }

    /// Platform on an existing database with no outbound gateway.
    pub fn offline(store: LedgerStore, config: PlatformConfig) -> LedgerResult<Self> {
        Self::build(store, Arc::new(config), Arc::new(OfflineGateway), Arc::new(SystemClock))
    }

    pub fn register(&mut self, job: Box<dyn BatchJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    // ── Scheduler trigger ─────────────────────────────────────────

    /// Run the job called `job_name` once, authenticated by the shared
    /// scheduler key. Re-running is harmless: items already handled are no
    /// longer due.
    pub fn trigger(&self, key: &str, job_name: &str) -> LedgerResult<JobReport> {
        if !keys_match(key, &self.config.scheduler.cron_key) {
            log::warn!("trigger '{job_name}' refused: bad scheduler key");
            return Err(LedgerError::Unauthorized);
        }
        let job = self
            .jobs
            .iter()
            .find(|j| j.name() == job_name)
            .ok_or_else(|| LedgerError::not_found("job", job_name))?;
        let now = self.clock.now();
        log::info!("trigger '{job_name}' at {now}");
        job.run(now)
    }

    /// Run every registered job in order.
    pub fn trigger_all(&self, key: &str) -> LedgerResult<Vec<JobReport>> {
        if !keys_match(key, &self.config.scheduler.cron_key) {
            return Err(LedgerError::Unauthorized);
        }
        let now = self.clock.now();
        self.jobs.iter().map(|job| job.run(now)).collect()
    }

    /// The accrual job, for stepping a single contract.
    pub fn accrual(&self) -> Option<&AccrualSubsystem> {
        self.find_job(accrual_subsystem::JOB_NAME)
            .and_then(|j| j.as_any().downcast_ref::<AccrualSubsystem>())
    }

    pub fn expiry(&self) -> Option<&ExpirySubsystem> {
        self.find_job(expiry_subsystem::JOB_NAME)
            .and_then(|j| j.as_any().downcast_ref::<ExpirySubsystem>())
    }

    fn find_job(&self, name: &str) -> Option<&dyn BatchJob> {
        self.jobs.iter().find(|j| j.name() == name).map(|j| j.as_ref())
    }

    // ── Accounts and catalog ──────────────────────────────────────

    pub fn create_user(&self, user: &NewUser) -> LedgerResult<UserId> {
        let now = self.clock.now();
        self.store.unit_of_work(|uow| {
            if let Some(referrer) = user.referrer_id {
                uow.user(referrer)?;
            }
            uow.insert_user(user, now)
        })
    }

    pub fn user(&self, user_id: UserId) -> LedgerResult<UserRow> {
        self.store.read(|uow| uow.user(user_id))
    }

    pub fn set_user_status(&self, user_id: UserId, status: AccountStatus) -> LedgerResult<()> {
        self.store.unit_of_work(|uow| uow.set_user_status(user_id, status))
    }

    pub fn add_category(&self, name: &str, profit_type: ProfitType) -> LedgerResult<CategoryId> {
        self.store
            .unit_of_work(|uow| uow.insert_category(name, profit_type))
    }

    pub fn add_product(&self, product: &NewProduct) -> LedgerResult<ProductId> {
        self.store.unit_of_work(|uow| {
            uow.category(product.category_id)?;
            uow.insert_product(product)
        })
    }

    pub fn set_product_status(&self, product_id: ProductId, status: CatalogStatus) -> LedgerResult<()> {
        self.store
            .unit_of_work(|uow| uow.set_product_status(product_id, status))
    }

    pub fn add_bank(&self, name: &str, code: &str, kind: BankKind) -> LedgerResult<BankId> {
        self.store.unit_of_work(|uow| uow.insert_bank(name, code, kind))
    }

    pub fn set_bank_status(&self, bank_id: BankId, status: CatalogStatus) -> LedgerResult<()> {
        self.store.unit_of_work(|uow| uow.set_bank_status(bank_id, status))
    }

    pub fn add_bank_account(
        &self,
        user_id: UserId,
        bank_id: BankId,
        account_name: &str,
        account_number: &str,
    ) -> LedgerResult<BankAccountId> {
        self.store.unit_of_work(|uow| {
            uow.user(user_id)?;
            uow.bank(bank_id)?;
            uow.insert_bank_account(user_id, bank_id, account_name, account_number)
        })
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn entries_for_user(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntryRow>> {
        self.store.read(|uow| uow.entries_for_user(user_id))
    }

    /// opening balance + Σ applied deltas must equal the stored balance.
    pub fn balance_audit(&self, user_id: UserId) -> LedgerResult<BalanceAudit> {
        self.store.read(|uow| {
            let user = uow.user(user_id)?;
            let applied_deltas = uow.sum_balance_deltas(user_id)?;
            Ok(BalanceAudit {
                user_id,
                opening_balance: user.opening_balance,
                applied_deltas,
                balance: user.balance,
                consistent: user.opening_balance + applied_deltas == user.balance,
            })
        })
    }

    /// Every event of `event_type`, oldest first.
    pub fn events(&self, event_type: &str) -> LedgerResult<Vec<LedgerEvent>> {
        self.store.read(|uow| uow.decoded_events(event_type))
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn keys_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secreT", "secret"));
        assert!(!keys_match("secret-longer", "secret"));
        assert!(!keys_match("", "secret"));
    }
}
