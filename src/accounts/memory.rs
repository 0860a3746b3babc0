use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{NewUser, StoreError, TokenField, User, UserStore};
use super::token;

/// In-memory `UserStore` used by tests and local development. The single
/// mutex makes every operation atomic, matching the per-record atomicity the
/// Postgres store gets from conditional updates.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<Mutex<HashMap<Uuid, User>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn live_token_matches(
    stored: &Option<String>,
    expires_at: &Option<OffsetDateTime>,
    token: &str,
) -> bool {
    matches!((stored, expires_at), (Some(t), Some(exp)) if t == token && token::is_live(*exp))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|u| u.email == new.email || u.username == new.username)
        {
            return Err(StoreError::DuplicateIdentity);
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_activated: false,
            activation_token: Some(new.activation_token),
            activation_expires_at: Some(new.activation_expires_at),
            reset_token: None,
            reset_expires_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        let lowered = identifier.to_lowercase();
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.email == lowered || u.username == identifier)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let lowered = email.to_lowercase();
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.email == lowered)
            .cloned())
    }

    async fn find_by_live_token(
        &self,
        field: TokenField,
        token: &str,
    ) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| match field {
                TokenField::Activation => {
                    live_token_matches(&u.activation_token, &u.activation_expires_at, token)
                }
                TokenField::Reset => {
                    live_token_matches(&u.reset_token, &u.reset_expires_at, token)
                }
            })
            .cloned())
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        self.users.lock().await.insert(user.id, user.clone());
        Ok(())
    }

    async fn activate(&self, token: &str) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().await;
        let user = users.values_mut().find(|u| {
            live_token_matches(&u.activation_token, &u.activation_expires_at, token)
        });
        Ok(user.map(|u| {
            u.is_activated = true;
            u.activation_token = None;
            u.activation_expires_at = None;
            u.clone()
        }))
    }

    async fn reset_password(
        &self,
        token: &str,
        new_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().await;
        let user = users
            .values_mut()
            .find(|u| live_token_matches(&u.reset_token, &u.reset_expires_at, token));
        Ok(user.map(|u| {
            u.password_hash = new_hash.to_string();
            u.reset_token = None;
            u.reset_expires_at = None;
            u.clone()
        }))
    }
}
