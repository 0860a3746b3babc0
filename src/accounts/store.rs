use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record as persisted. Hash and token fields never serialize to JSON.
///
/// Token/expiry pairs are set and cleared together; a pair is "live" while
/// the token is present and the expiry is in the future.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_activated: bool,
    #[serde(skip_serializing)]
    pub activation_token: Option<String>,
    #[serde(skip_serializing)]
    pub activation_expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Fields for a new, unactivated user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub activation_token: String,
    pub activation_expires_at: OffsetDateTime,
}

/// Which token/expiry pair a live-token lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    Activation,
    Reset,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("username or email already registered")]
    DuplicateIdentity,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Record-store access for user accounts.
///
/// `activate` and `reset_password` are conditional updates: they clear the
/// token pair only while it still equals the presented token and is live, so
/// of two concurrent consumers exactly one observes `Some(user)`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Matches the identifier against email or username.
    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Lookup by a live token pair. Expired or absent tokens yield no match,
    /// indistinguishable from a wrong token.
    async fn find_by_live_token(
        &self,
        field: TokenField,
        token: &str,
    ) -> anyhow::Result<Option<User>>;

    /// Full-record update, atomic per record.
    async fn save(&self, user: &User) -> anyhow::Result<()>;

    /// Consume a live activation token: flip `is_activated`, clear the pair.
    /// `None` when the token is absent, expired, or already consumed.
    async fn activate(&self, token: &str) -> anyhow::Result<Option<User>>;

    /// Consume a live reset token: replace the password hash, clear the pair.
    /// `None` when the token is absent, expired, or already consumed.
    async fn reset_password(&self, token: &str, new_hash: &str)
        -> anyhow::Result<Option<User>>;
}
