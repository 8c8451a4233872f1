use super::{BankAccountRow, BankRow, CategoryRow, NewProduct, ProductRow, UnitOfWork};
use crate::{
    error::{LedgerError, LedgerResult},
    types::{
        BankAccountId, BankId, BankKind, CatalogStatus, CategoryId, ProductId, ProfitType,
        UserId,
    },
};
use rusqlite::{params, OptionalExtension};

impl UnitOfWork<'_> {
    // ── Categories & products ─────────────────────────────────────

    pub fn insert_category(&self, name: &str, profit_type: ProfitType) -> LedgerResult<CategoryId> {
        self.tx.execute(
            "INSERT INTO categories (name, profit_type, status) VALUES (?1, ?2, 'active')",
            params![name, profit_type],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn category(&self, category_id: CategoryId) -> LedgerResult<CategoryRow> {
        self.tx
            .query_row(
                "SELECT id, name, profit_type, status FROM categories WHERE id = ?1",
                params![category_id],
                |row| {
                    Ok(CategoryRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        profit_type: row.get(2)?,
                        status: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("category", category_id))
    }

    pub fn insert_product(&self, product: &NewProduct) -> LedgerResult<ProductId> {
        self.tx.execute(
            "INSERT INTO products
                 (category_id, name, amount, daily_profit, duration, required_vip, purchase_limit, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active')",
            params![
                product.category_id,
                product.name,
                product.amount,
                product.daily_profit,
                product.duration,
                product.required_vip,
                product.purchase_limit,
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn product(&self, product_id: ProductId) -> LedgerResult<ProductRow> {
        self.tx
            .query_row(
                "SELECT id, category_id, name, amount, daily_profit, duration,
                        required_vip, purchase_limit, status
                 FROM products WHERE id = ?1",
                params![product_id],
                |row| {
                    Ok(ProductRow {
                        id: row.get(0)?,
                        category_id: row.get(1)?,
                        name: row.get(2)?,
                        amount: row.get(3)?,
                        daily_profit: row.get(4)?,
                        duration: row.get(5)?,
                        required_vip: row.get(6)?,
                        purchase_limit: row.get(7)?,
                        status: row.get(8)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("product", product_id))
    }

    pub fn set_product_status(&self, product_id: ProductId, status: CatalogStatus) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE products SET status = ?1 WHERE id = ?2",
            params![status, product_id],
        )?;
        Ok(())
    }

    // ── Banks ─────────────────────────────────────────────────────

    pub fn insert_bank(&self, name: &str, code: &str, kind: BankKind) -> LedgerResult<BankId> {
        self.tx.execute(
            "INSERT INTO banks (name, code, kind, status) VALUES (?1, ?2, ?3, 'active')",
            params![name, code, kind],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn bank(&self, bank_id: BankId) -> LedgerResult<BankRow> {
        self.tx
            .query_row(
                "SELECT id, name, code, kind, status FROM banks WHERE id = ?1",
                params![bank_id],
                |row| {
                    Ok(BankRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        kind: row.get(3)?,
                        status: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("bank", bank_id))
    }

    pub fn set_bank_status(&self, bank_id: BankId, status: CatalogStatus) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE banks SET status = ?1 WHERE id = ?2",
            params![status, bank_id],
        )?;
        Ok(())
    }

    pub fn insert_bank_account(
        &self,
        user_id: UserId,
        bank_id: BankId,
        account_name: &str,
        account_number: &str,
    ) -> LedgerResult<BankAccountId> {
        self.tx.execute(
            "INSERT INTO bank_accounts (user_id, bank_id, account_name, account_number)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, bank_id, account_name, account_number],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn bank_account(&self, id: BankAccountId) -> LedgerResult<BankAccountRow> {
        self.tx
            .query_row(
                "SELECT id, user_id, bank_id, account_name, account_number
                 FROM bank_accounts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(BankAccountRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        bank_id: row.get(2)?,
                        account_name: row.get(3)?,
                        account_number: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("bank account", id))
    }
}
