use super::{NewWithdrawal, UnitOfWork, WithdrawalRow};
use crate::{
    clock::{from_millis, to_millis},
    error::{LedgerError, LedgerResult},
    types::{PayoutState, UserId, WithdrawalId, WithdrawalStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const WITHDRAWAL_COLUMNS: &str = "id, user_id, bank_account_id, amount, charge, net_amount,
     order_id, status, payout_state, created_at, updated_at";

fn withdrawal_from_row(row: &Row<'_>) -> rusqlite::Result<WithdrawalRow> {
    Ok(WithdrawalRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        bank_account_id: row.get(2)?,
        amount: row.get(3)?,
        charge: row.get(4)?,
        net_amount: row.get(5)?,
        order_id: row.get(6)?,
        status: row.get(7)?,
        payout_state: row.get(8)?,
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

impl UnitOfWork<'_> {
    // ── Withdrawals ───────────────────────────────────────────────

    pub fn insert_withdrawal(
        &self,
        w: &NewWithdrawal,
        now: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalId> {
        self.tx.execute(
            "INSERT INTO withdrawals
                 (user_id, bank_account_id, amount, charge, net_amount, order_id,
                  status, payout_state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 'not_sent', ?7, ?7)",
            params![
                w.user_id,
                w.bank_account_id,
                w.amount,
                w.charge,
                w.net_amount,
                w.order_id,
                to_millis(now),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn withdrawal(&self, id: WithdrawalId) -> LedgerResult<WithdrawalRow> {
        self.tx
            .query_row(
                &format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1"),
                params![id],
                withdrawal_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("withdrawal", id))
    }

    pub fn withdrawal_by_order(&self, order_id: &str) -> LedgerResult<Option<WithdrawalRow>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE order_id = ?1"),
                params![order_id],
                withdrawal_from_row,
            )
            .optional()?)
    }

    /// Pending → `to`. Returns false if the withdrawal already left Pending.
    pub fn finish_withdrawal(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE withdrawals SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![to, to_millis(now), id],
        )?;
        Ok(n == 1)
    }

    pub fn set_payout_state(
        &self,
        id: WithdrawalId,
        state: PayoutState,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE withdrawals SET payout_state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state, to_millis(now), id],
        )?;
        Ok(())
    }

    /// Withdrawals of any status created in `[from, to)`.
    pub fn count_withdrawals_between(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<u32> {
        Ok(self.tx.query_row(
            "SELECT COUNT(*) FROM withdrawals
             WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3",
            params![user_id, to_millis(from), to_millis(to)],
            |row| row.get(0),
        )?)
    }

    pub fn withdrawals_for_user(&self, user_id: UserId) -> LedgerResult<Vec<WithdrawalRow>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE user_id = ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], withdrawal_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
