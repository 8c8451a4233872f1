//! Payment expiry sweep: cancels Pending contracts whose payment window
//! has passed. Races with a late webhook are resolved by the Pending
//! guard in `cancel_pending_contract`/`settle_contract`: whichever unit
//! of work commits first wins and the other becomes a no-op.

use crate::{
    clock::Clock,
    error::LedgerResult,
    investment_subsystem::expire_payment,
    store::LedgerStore,
    subsystem::{BatchJob, JobReport},
};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

pub const JOB_NAME: &str = "expire-payments";

pub struct ExpirySubsystem {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
}

impl ExpirySubsystem {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn expire_one(&self, order_id: &str) -> LedgerResult<bool> {
        let now = self.clock.now();
        self.store.unit_of_work(|uow| expire_payment(uow, order_id, now))
    }
}

impl BatchJob for ExpirySubsystem {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    fn run(&self, now: DateTime<Utc>) -> LedgerResult<JobReport> {
        let mut report = JobReport::new(JOB_NAME);
        let expired = self.store.read(|uow| uow.expired_payment_orders(now))?;

        for order_id in expired {
            match self.store.unit_of_work(|uow| expire_payment(uow, &order_id, now)) {
                Ok(true) => report.processed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    log::error!("expiry: {order_id} rolled back: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.processed > 0 {
            log::info!("expiry: {} payments expired", report.processed);
        }
        Ok(report)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
