use super::{UnitOfWork, NewUser, UserRow};
use crate::{
    clock::{from_millis, to_millis},
    error::{LedgerError, LedgerResult},
    money::Money,
    types::{AccountStatus, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, name, mode, status, opening_balance, balance, vip_level,
     total_invested, total_invested_vip, referrer_id, spin_tickets, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        mode: row.get(2)?,
        status: row.get(3)?,
        opening_balance: row.get(4)?,
        balance: row.get(5)?,
        vip_level: row.get(6)?,
        total_invested: row.get(7)?,
        total_invested_vip: row.get(8)?,
        referrer_id: row.get(9)?,
        spin_tickets: row.get(10)?,
        created_at: from_millis(row.get(11)?),
    })
}

impl UnitOfWork<'_> {
    // ── Users ─────────────────────────────────────────────────────

    pub fn insert_user(&self, user: &NewUser, now: DateTime<Utc>) -> LedgerResult<UserId> {
        self.tx.execute(
            "INSERT INTO users (name, mode, status, opening_balance, balance, referrer_id, created_at)
             VALUES (?1, ?2, 'active', ?3, ?3, ?4, ?5)",
            params![
                user.name,
                user.mode,
                user.opening_balance,
                user.referrer_id,
                to_millis(now)
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn user(&self, user_id: UserId) -> LedgerResult<UserRow> {
        self.tx
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("user", user_id))
    }

    /// Read a user row whose balance is about to be written.
    ///
    /// A unit of work holds the database write lock from its first
    /// statement, so the returned row cannot change underneath the caller
    /// until commit. Must not be used from `LedgerStore::read`.
    pub fn lock_user(&self, user_id: UserId) -> LedgerResult<UserRow> {
        self.user(user_id)
    }

    pub fn user_count(&self) -> LedgerResult<i64> {
        Ok(self
            .tx
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    /// Only the ledger primitive calls this.
    pub(crate) fn set_balance(&self, user_id: UserId, balance: Money) -> LedgerResult<()> {
        let n = self.tx.execute(
            "UPDATE users SET balance = ?1 WHERE id = ?2",
            params![balance, user_id],
        )?;
        if n == 0 {
            return Err(LedgerError::not_found("user", user_id));
        }
        Ok(())
    }

    pub fn set_user_status(&self, user_id: UserId, status: AccountStatus) -> LedgerResult<()> {
        let n = self.tx.execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status, user_id],
        )?;
        if n == 0 {
            return Err(LedgerError::not_found("user", user_id));
        }
        Ok(())
    }

    /// Add a settled principal to the user's cumulative totals. The
    /// VIP-qualifying total only grows for locked-category contracts.
    pub fn add_invested(
        &self,
        user_id: UserId,
        amount: Money,
        counts_for_vip: bool,
    ) -> LedgerResult<()> {
        let vip_amount = if counts_for_vip { amount } else { Money::ZERO };
        self.tx.execute(
            "UPDATE users
             SET total_invested = total_invested + ?1,
                 total_invested_vip = total_invested_vip + ?2
             WHERE id = ?3",
            params![amount, vip_amount, user_id],
        )?;
        Ok(())
    }

    pub fn set_vip_level(&self, user_id: UserId, level: u8) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE users SET vip_level = ?1 WHERE id = ?2",
            params![level, user_id],
        )?;
        Ok(())
    }

    pub fn add_spin_tickets(&self, user_id: UserId, tickets: u32) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE users SET spin_tickets = spin_tickets + ?1 WHERE id = ?2",
            params![tickets, user_id],
        )?;
        Ok(())
    }
}
