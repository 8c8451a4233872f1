use super::{LedgerEntryRow, NewEntry, UnitOfWork};
use crate::{
    clock::{from_millis, to_millis},
    error::{LedgerError, LedgerResult},
    money::Money,
    types::{EntryStatus, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const ENTRY_COLUMNS: &str =
    "id, user_id, order_id, amount, flow, kind, balance_delta, status, note, created_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntryRow> {
    Ok(LedgerEntryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        order_id: row.get(2)?,
        amount: row.get(3)?,
        flow: row.get(4)?,
        kind: row.get(5)?,
        balance_delta: row.get(6)?,
        status: row.get(7)?,
        note: row.get(8)?,
        created_at: from_millis(row.get(9)?),
    })
}

impl UnitOfWork<'_> {
    // ── Ledger entries ────────────────────────────────────────────

    pub fn entry_exists(&self, order_id: &str) -> LedgerResult<bool> {
        Ok(self.tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE order_id = ?1)",
            params![order_id],
            |row| row.get(0),
        )?)
    }

    /// Insert an entry. A UNIQUE violation on `order_id` surfaces as
    /// `DuplicateOrder` so callers can treat a replay as already applied.
    pub(crate) fn insert_entry(
        &self,
        entry: &NewEntry<'_>,
        now: DateTime<Utc>,
    ) -> LedgerResult<LedgerEntryRow> {
        let inserted = self.tx.execute(
            "INSERT INTO ledger_entries
                 (user_id, order_id, amount, flow, kind, balance_delta, status, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.user_id,
                entry.order_id,
                entry.amount,
                entry.flow,
                entry.kind,
                entry.balance_delta,
                entry.status,
                entry.note,
                to_millis(now),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(LedgerError::DuplicateOrder {
                    order_id: entry.order_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        Ok(LedgerEntryRow {
            id: self.tx.last_insert_rowid(),
            user_id: entry.user_id,
            order_id: entry.order_id.to_string(),
            amount: entry.amount,
            flow: entry.flow,
            kind: entry.kind,
            balance_delta: entry.balance_delta,
            status: entry.status,
            note: entry.note.to_string(),
            created_at: now,
        })
    }

    pub fn entry_by_order(&self, order_id: &str) -> LedgerResult<Option<LedgerEntryRow>> {
        Ok(self
            .tx
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE order_id = ?1"),
                params![order_id],
                entry_from_row,
            )
            .optional()?)
    }

    /// Status only; the applied `balance_delta` of an entry never changes.
    pub fn set_entry_status(&self, order_id: &str, status: EntryStatus) -> LedgerResult<bool> {
        let n = self.tx.execute(
            "UPDATE ledger_entries SET status = ?1 WHERE order_id = ?2",
            params![status, order_id],
        )?;
        Ok(n == 1)
    }

    pub fn entries_for_user(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntryRow>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id], entry_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn sum_balance_deltas(&self, user_id: UserId) -> LedgerResult<Money> {
        Ok(self.tx.query_row(
            "SELECT COALESCE(SUM(balance_delta), 0) FROM ledger_entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?)
    }

    /// Entries whose order id matches a SQL LIKE pattern.
    pub fn count_entries_like(&self, pattern: &str) -> LedgerResult<u32> {
        Ok(self.tx.query_row(
            "SELECT COUNT(*) FROM ledger_entries WHERE order_id LIKE ?1",
            params![pattern],
            |row| row.get(0),
        )?)
    }
}
