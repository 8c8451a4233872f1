use super::{opt_ts, ContractRow, NewContract, UnitOfWork};
use crate::{
    clock::{from_millis, to_millis},
    error::{LedgerError, LedgerResult},
    money::Money,
    types::{ContractId, ContractStatus, ProductId, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const CONTRACT_COLUMNS: &str = "id, user_id, product_id, category_id, profit_type, amount,
     daily_profit, duration, periods_paid, total_returned, last_accrual_at, next_accrual_at,
     order_id, status, created_at";

fn contract_from_row(row: &Row<'_>) -> rusqlite::Result<ContractRow> {
    Ok(ContractRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        category_id: row.get(3)?,
        profit_type: row.get(4)?,
        amount: row.get(5)?,
        daily_profit: row.get(6)?,
        duration: row.get(7)?,
        periods_paid: row.get(8)?,
        total_returned: row.get(9)?,
        last_accrual_at: opt_ts(row.get(10)?),
        next_accrual_at: opt_ts(row.get(11)?),
        order_id: row.get(12)?,
        status: row.get(13)?,
        created_at: from_millis(row.get(14)?),
    })
}

impl UnitOfWork<'_> {
    // ── Contracts ─────────────────────────────────────────────────

    pub fn insert_contract(&self, c: &NewContract, now: DateTime<Utc>) -> LedgerResult<ContractId> {
        self.tx.execute(
            "INSERT INTO contracts
                 (user_id, product_id, category_id, profit_type, amount, daily_profit,
                  duration, order_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)",
            params![
                c.user_id,
                c.product_id,
                c.category_id,
                c.profit_type,
                c.amount,
                c.daily_profit,
                c.duration,
                c.order_id,
                to_millis(now),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn contract(&self, contract_id: ContractId) -> LedgerResult<ContractRow> {
        self.tx
            .query_row(
                &format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = ?1"),
                params![contract_id],
                contract_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("contract", contract_id))
    }

    pub fn contract_by_order(&self, order_id: &str) -> LedgerResult<Option<ContractRow>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE order_id = ?1"),
                params![order_id],
                contract_from_row,
            )
            .optional()?)
    }

    /// Purchases that count toward a product's purchase limit: every
    /// contract that was actually paid for.
    pub fn count_paid_purchases(&self, user_id: UserId, product_id: ProductId) -> LedgerResult<u32> {
        Ok(self.tx.query_row(
            "SELECT COUNT(*) FROM contracts
             WHERE user_id = ?1 AND product_id = ?2
               AND status IN ('running', 'completed', 'suspended')",
            params![user_id, product_id],
            |row| row.get(0),
        )?)
    }

    /// Pending → Running. Returns false if the contract was not Pending.
    pub fn start_contract(
        &self,
        contract_id: ContractId,
        next_accrual_at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE contracts
             SET status = 'running', last_accrual_at = NULL, next_accrual_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![to_millis(next_accrual_at), contract_id],
        )?;
        Ok(n == 1)
    }

    /// Conditional status change. Returns false if the contract was not in `from`.
    pub fn transition_contract(
        &self,
        contract_id: ContractId,
        from: ContractStatus,
        to: ContractStatus,
    ) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE contracts SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to, contract_id, from],
        )?;
        Ok(n == 1)
    }

    pub fn set_next_accrual(
        &self,
        contract_id: ContractId,
        next_accrual_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE contracts SET next_accrual_at = ?1 WHERE id = ?2",
            params![to_millis(next_accrual_at), contract_id],
        )?;
        Ok(())
    }

    /// Persist one applied accrual period. Guarded on the previous
    /// `periods_paid` so a stale caller can never apply a period twice.
    pub fn record_accrual(
        &self,
        contract_id: ContractId,
        expected_periods_paid: u32,
        total_returned: Money,
        at: DateTime<Utc>,
        next_accrual_at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE contracts
             SET periods_paid = periods_paid + 1, total_returned = ?1,
                 last_accrual_at = ?2, next_accrual_at = ?3
             WHERE id = ?4 AND status = 'running' AND periods_paid = ?5",
            params![
                total_returned,
                to_millis(at),
                to_millis(next_accrual_at),
                contract_id,
                expected_periods_paid,
            ],
        )?;
        Ok(n == 1)
    }

    /// Running contracts with a passed accrual deadline and periods left.
    pub fn due_contract_ids(&self, now: DateTime<Utc>) -> LedgerResult<Vec<ContractId>> {
        let mut stmt = self.tx.prepare(
            "SELECT id FROM contracts
             WHERE status = 'running' AND next_accrual_at IS NOT NULL
               AND next_accrual_at <= ?1 AND periods_paid < duration
             ORDER BY next_accrual_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![to_millis(now)], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn contracts_for_user(
        &self,
        user_id: UserId,
        status: Option<ContractStatus>,
    ) -> LedgerResult<Vec<ContractRow>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id, status], contract_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
