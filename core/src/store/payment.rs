use super::{opt_ts, PaymentRow, UnitOfWork};
use crate::{
    clock::{from_millis, to_millis},
    error::LedgerResult,
    types::{ContractId, OrderId, PaymentMethod, PaymentStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl UnitOfWork<'_> {
    // ── Payments ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn insert_payment(
        &self,
        contract_id: ContractId,
        order_id: &str,
        method: PaymentMethod,
        channel: Option<&str>,
        status: PaymentStatus,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO payments
                 (contract_id, order_id, method, channel, expires_at, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                contract_id,
                order_id,
                method,
                channel,
                expires_at.map(to_millis),
                status,
                to_millis(now),
            ],
        )?;
        Ok(())
    }

    pub fn payment_by_order(&self, order_id: &str) -> LedgerResult<Option<PaymentRow>> {
        Ok(self
            .tx
            .query_row(
                "SELECT id, contract_id, order_id, method, channel, code, expires_at,
                        status, created_at, updated_at
                 FROM payments WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok(PaymentRow {
                        id: row.get(0)?,
                        contract_id: row.get(1)?,
                        order_id: row.get(2)?,
                        method: row.get(3)?,
                        channel: row.get(4)?,
                        code: row.get(5)?,
                        expires_at: opt_ts(row.get(6)?),
                        status: row.get(7)?,
                        created_at: from_millis(row.get(8)?),
                        updated_at: from_millis(row.get(9)?),
                    })
                },
            )
            .optional()?)
    }

    /// Store the gateway-issued code. Only while the payment is still Pending.
    pub fn attach_payment_code(
        &self,
        order_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE payments SET code = ?1, expires_at = ?2, updated_at = ?3
             WHERE order_id = ?4 AND status = 'pending'",
            params![code, to_millis(expires_at), to_millis(now), order_id],
        )?;
        Ok(n == 1)
    }

    /// Pending → `to`. Returns false when the payment already left Pending,
    /// which keeps terminal states terminal.
    pub fn finish_payment(
        &self,
        order_id: &str,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE payments SET status = ?1, updated_at = ?2
             WHERE order_id = ?3 AND status = 'pending'",
            params![to, to_millis(now), order_id],
        )?;
        Ok(n == 1)
    }

    pub fn expired_payment_orders(&self, now: DateTime<Utc>) -> LedgerResult<Vec<OrderId>> {
        let mut stmt = self.tx.prepare(
            "SELECT order_id FROM payments
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < ?1
             ORDER BY expires_at ASC",
        )?;
        let rows = stmt.query_map(params![to_millis(now)], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
