//! User persistence. Tier lives on the user row and drives budgets and
//! request quotas.

use sqlx::SqlitePool;

use crate::models::User;

pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (username, password_hash, email, tier, is_active) \
             VALUES (?, ?, ?, 'free', TRUE)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .execute(&self.pool)
        .await?;

        self.get_by_username(username)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_tier(&self, id: i64, tier: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE users SET tier = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(tier)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}
