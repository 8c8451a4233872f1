//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Subsystems open a unit of work and call its methods. They never
//! execute SQL directly.

use crate::{
    clock::{from_millis, to_millis},
    error::{LedgerError, LedgerResult},
    event::{EventLogEntry, LedgerEvent},
    money::Money,
    types::{
        AccountStatus, BankAccountId, BankId, BankKind, CatalogStatus, CategoryId,
        ContractId, ContractStatus, EntryKind, EntryStatus, Flow, OrderId, PaymentMethod,
        PaymentStatus, PayoutState, ProductId, ProfitType, UserId, UserMode, WithdrawalId,
        WithdrawalStatus,
    },
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;

mod catalog;
mod contract;
mod entry;
mod payment;
mod user;
mod withdrawal;

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for a private :memory: database
}

impl LedgerStore {
    /// Open (or create) a database file. Accepts `file:` URIs, which is how
    /// shared-cache in-memory databases are addressed.
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Private in-memory database. `reopen()` on it yields a new, empty one.
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// In-memory database shared by every connection opened with the same
    /// tag in this process. Lives while at least one connection is open.
    pub fn shared_memory(tag: &str) -> LedgerResult<Self> {
        Self::open(&format!("file:{tag}?mode=memory&cache=shared"))
    }

    /// Open another connection to the same database.
    pub fn reopen(&self) -> LedgerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    /// Run `f` with exclusive write access to the database.
    ///
    /// The transaction begins IMMEDIATE, so the write lock is taken before
    /// the first read: every row read inside `f` stays valid until commit.
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    pub fn unit_of_work<T>(
        &self,
        f: impl FnOnce(&UnitOfWork<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let uow = UnitOfWork {
            tx: Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?,
        };
        let out = f(&uow)?;
        uow.tx.commit()?;
        Ok(out)
    }

    /// Run read-only queries against one consistent snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&UnitOfWork<'_>) -> LedgerResult<T>) -> LedgerResult<T> {
        let uow = UnitOfWork {
            tx: Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?,
        };
        let out = f(&uow)?;
        uow.tx.rollback()?;
        Ok(out)
    }
}

/// An open transaction. All queries and mutations go through here.
pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
}

impl UnitOfWork<'_> {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(
        &self,
        source: &str,
        at: DateTime<Utc>,
        event: &LedgerEvent,
    ) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO event_log (occurred_at, source, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                to_millis(at),
                source,
                event.type_name(),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(())
    }

    pub fn events_of_type(&self, event_type: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, occurred_at, source, event_type, payload
             FROM event_log WHERE event_type = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![event_type], |row| {
            Ok(EventLogEntry {
                id: Some(row.get(0)?),
                occurred_at: from_millis(row.get(1)?),
                source: row.get(2)?,
                event_type: row.get(3)?,
                payload: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Decoded events of one type, oldest first.
    pub fn decoded_events(&self, event_type: &str) -> LedgerResult<Vec<LedgerEvent>> {
        self.events_of_type(event_type)?
            .iter()
            .map(|e| serde_json::from_str(&e.payload).map_err(LedgerError::from))
            .collect()
    }
}

fn opt_ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

// ── Row types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: UserId,
    pub name: String,
    pub mode: UserMode,
    pub status: AccountStatus,
    pub opening_balance: Money,
    pub balance: Money,
    pub vip_level: u8,
    pub total_invested: Money,
    pub total_invested_vip: Money,
    pub referrer_id: Option<UserId>,
    pub spin_tickets: u32,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn is_promotor(&self) -> bool {
        self.mode == UserMode::Promotor
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub mode: UserMode,
    pub opening_balance: Money,
    pub referrer_id: Option<UserId>,
}

impl NewUser {
    pub fn real(name: &str, opening_balance: Money) -> Self {
        Self {
            name: name.to_string(),
            mode: UserMode::Real,
            opening_balance,
            referrer_id: None,
        }
    }

    pub fn promotor(name: &str, opening_balance: Money) -> Self {
        Self {
            mode: UserMode::Promotor,
            ..Self::real(name, opening_balance)
        }
    }

    pub fn referred_by(mut self, referrer_id: UserId) -> Self {
        self.referrer_id = Some(referrer_id);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRow {
    pub id: CategoryId,
    pub name: String,
    pub profit_type: ProfitType,
    pub status: CatalogStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductRow {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    pub amount: Money,
    pub daily_profit: Money,
    pub duration: u32,
    pub required_vip: u8,
    /// 0 = unlimited.
    pub purchase_limit: u32,
    pub status: CatalogStatus,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub category_id: CategoryId,
    pub name: String,
    pub amount: Money,
    pub daily_profit: Money,
    pub duration: u32,
    pub required_vip: u8,
    pub purchase_limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankRow {
    pub id: BankId,
    pub name: String,
    pub code: String,
    pub kind: BankKind,
    pub status: CatalogStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankAccountRow {
    pub id: BankAccountId,
    pub user_id: UserId,
    pub bank_id: BankId,
    pub account_name: String,
    pub account_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractRow {
    pub id: ContractId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub category_id: CategoryId,
    pub profit_type: ProfitType,
    pub amount: Money,
    pub daily_profit: Money,
    pub duration: u32,
    pub periods_paid: u32,
    pub total_returned: Money,
    pub last_accrual_at: Option<DateTime<Utc>>,
    pub next_accrual_at: Option<DateTime<Utc>>,
    pub order_id: OrderId,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContract {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub category_id: CategoryId,
    pub profit_type: ProfitType,
    pub amount: Money,
    pub daily_profit: Money,
    pub duration: u32,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRow {
    pub id: i64,
    pub contract_id: ContractId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub channel: Option<String>,
    pub code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalRow {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub bank_account_id: BankAccountId,
    pub amount: Money,
    pub charge: Money,
    pub net_amount: Money,
    pub order_id: OrderId,
    pub status: WithdrawalStatus,
    pub payout_state: PayoutState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: UserId,
    pub bank_account_id: BankAccountId,
    pub amount: Money,
    pub charge: Money,
    pub net_amount: Money,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub user_id: UserId,
    pub order_id: OrderId,
    /// Unsigned magnitude; direction is `flow`.
    pub amount: Money,
    pub flow: Flow,
    pub kind: EntryKind,
    /// Signed change applied to the user's balance.
    pub balance_delta: Money,
    pub status: EntryStatus,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub user_id: UserId,
    pub order_id: &'a str,
    pub amount: Money,
    pub flow: Flow,
    pub kind: EntryKind,
    pub balance_delta: Money,
    pub status: EntryStatus,
    pub note: &'a str,
}
