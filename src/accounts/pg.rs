use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{NewUser, StoreError, TokenField, User, UserStore};

const USER_COLUMNS: &str = "id, username, email, password_hash, is_activated, \
     activation_token, activation_expires_at, reset_token, reset_expires_at, created_at";

/// `UserStore` backed by Postgres. Token consumption is a single conditional
/// UPDATE, so the row-level lock makes the token single-use even under
/// concurrent requests.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, activation_token, activation_expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.activation_token)
        .bind(new.activation_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return StoreError::DuplicateIdentity;
                }
            }
            StoreError::Other(e.into())
        })?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = LOWER($1) OR username = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_live_token(
        &self,
        field: TokenField,
        token: &str,
    ) -> anyhow::Result<Option<User>> {
        let query = match field {
            TokenField::Activation => format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE activation_token = $1 AND activation_expires_at > NOW()"
            ),
            TokenField::Reset => format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE reset_token = $1 AND reset_expires_at > NOW()"
            ),
        };
        let user = sqlx::query_as::<_, User>(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, is_activated = $5,
                activation_token = $6, activation_expires_at = $7,
                reset_token = $8, reset_expires_at = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_activated)
        .bind(&user.activation_token)
        .bind(user.activation_expires_at)
        .bind(&user.reset_token)
        .bind(user.reset_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activate(&self, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET is_activated = TRUE, activation_token = NULL, activation_expires_at = NULL
            WHERE activation_token = $1 AND activation_expires_at > NOW()
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn reset_password(
        &self,
        token: &str,
        new_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $2, reset_token = NULL, reset_expires_at = NULL
            WHERE reset_token = $1 AND reset_expires_at > NOW()
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(token)
        .bind(new_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
