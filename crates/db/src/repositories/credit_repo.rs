//! Repository for the `credit_balances` table.

use batchforge_core::types::DbId;
use sqlx::PgPool;

pub struct CreditRepo;

impl CreditRepo {
    /// Subtract `amount` if the balance covers it.
    ///
    /// Returns the remaining balance, or `None` when the balance is short
    /// (or the owner has no row). Check and subtraction are one statement.
    pub async fn debit_if_sufficient(
        pool: &PgPool,
        owner_id: DbId,
        amount: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE credit_balances SET balance = balance - $2 \
             WHERE owner_id = $1 AND balance >= $2 \
             RETURNING balance",
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(balance,)| balance))
    }

    /// Current balance; owners without a row have zero.
    pub async fn balance(pool: &PgPool, owner_id: DbId) -> Result<i64, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM credit_balances WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map_or(0, |(balance,)| balance))
    }

    /// Set an owner's balance, creating the row if needed.
    pub async fn set_balance(pool: &PgPool, owner_id: DbId, balance: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO credit_balances (owner_id, balance) VALUES ($1, $2) \
             ON CONFLICT (owner_id) DO UPDATE SET balance = EXCLUDED.balance",
        )
        .bind(owner_id)
        .bind(balance)
        .execute(pool)
        .await?;
        Ok(())
    }
}
