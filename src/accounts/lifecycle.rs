use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    error::AccountError,
    notify::{self, Message, NotificationSender},
    password,
    session::SessionKeys,
    store::{NewUser, StoreError, User, UserStore},
    token,
};

/// Activation and reset tokens live for one hour.
pub const TOKEN_TTL: Duration = Duration::hours(1);

/// Notification dispatch never holds an operation hostage longer than this.
const NOTIFY_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Orchestrates registration, activation, login and the password-reset flow.
///
/// State mutations go through the `UserStore`; notifications are dispatched
/// after the mutation committed and their failure is logged, never surfaced.
#[derive(Clone)]
pub struct AccountLifecycle {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn NotificationSender>,
    pub sessions: SessionKeys,
    app_url: String,
}

impl AccountLifecycle {
    pub fn new(
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn NotificationSender>,
        sessions: SessionKeys,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            notifier,
            sessions,
            app_url: app_url.into(),
        }
    }

    /// Create an unactivated user and send the activation link.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        plain_password: &str,
    ) -> Result<User, AccountError> {
        let hash =
            password::hash_password(plain_password).map_err(AccountError::RegistrationFailed)?;
        let activation = token::issue(TOKEN_TTL);

        let user = self
            .users
            .create(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: hash,
                activation_token: activation.token.clone(),
                activation_expires_at: activation.expires_at,
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateIdentity => AccountError::DuplicateIdentity,
                StoreError::Other(source) => AccountError::RegistrationFailed(source),
            })?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.dispatch(&user.email, notify::activation_message(&self.app_url, &activation.token))
            .await;
        Ok(user)
    }

    /// Consume an activation token. Single-use: the winning call clears the
    /// token pair, so a repeat (or a concurrent loser) gets the uniform
    /// `InvalidOrExpiredToken`.
    pub async fn activate_account(&self, token: &str) -> Result<User, AccountError> {
        let user = self
            .users
            .activate(token)
            .await?
            .ok_or(AccountError::InvalidOrExpiredToken)?;
        info!(user_id = %user.id, "account activated");
        Ok(user)
    }

    /// Verify credentials and issue a session token. Activation state is not
    /// checked; unactivated users may log in.
    pub async fn login(
        &self,
        identifier: &str,
        plain_password: &str,
    ) -> Result<(User, String), AccountError> {
        let user = self
            .users
            .find_by_identifier(identifier)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        if !password::verify_password(plain_password, &user.password_hash)? {
            warn!(user_id = %user.id, "login with invalid password");
            return Err(AccountError::InvalidCredentials);
        }

        let session = self
            .sessions
            .sign_session(user.id)
            .map_err(AccountError::Internal)?;
        info!(user_id = %user.id, "user logged in");
        Ok((user, session))
    }

    /// Attach a reset token to the account and mail the instructions.
    /// Activation fields are left untouched.
    pub async fn forgot_password(&self, email: &str) -> Result<User, AccountError> {
        let mut user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        let reset = token::issue(TOKEN_TTL);
        user.reset_token = Some(reset.token.clone());
        user.reset_expires_at = Some(reset.expires_at);
        self.users.save(&user).await?;

        info!(user_id = %user.id, "reset token issued");
        self.dispatch(&user.email, notify::reset_instructions_message(&reset.token))
            .await;
        Ok(user)
    }

    /// Consume a reset token, replacing the password hash. Same single-use
    /// semantics as activation.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<User, AccountError> {
        let hash = password::hash_password(new_password)?;
        let user = self
            .users
            .reset_password(token, &hash)
            .await?
            .ok_or(AccountError::InvalidOrExpiredToken)?;

        info!(user_id = %user.id, "password reset");
        self.dispatch(&user.email, notify::reset_confirmation_message())
            .await;
        Ok(user)
    }

    /// Load the user behind a verified session.
    pub async fn profile(&self, user_id: Uuid) -> Result<User, AccountError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AccountError::UserNotFound)
    }

    async fn dispatch(&self, to: &str, message: Message) {
        let send = self
            .notifier
            .send(to, message.subject, &message.text, &message.html);
        match tokio::time::timeout(NOTIFY_TIMEOUT, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(to = %to, subject = %message.subject, error = %e, "notification failed")
            }
            Err(_) => warn!(to = %to, subject = %message.subject, "notification timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::memory::MemoryUserStore;
    use crate::accounts::store::TokenField;
    use crate::config::JwtConfig;
    use async_trait::async_trait;
    use time::OffsetDateTime;
    use tokio::sync::Mutex;

    struct Sent {
        to: String,
        subject: String,
        text: String,
    }

    /// Records every notification instead of delivering it.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Sent>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(
            &self,
            to: &str,
            subject: &str,
            text: &str,
            _html: &str,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("transport down");
            }
            self.sent.lock().await.push(Sent {
                to: to.into(),
                subject: subject.into(),
                text: text.into(),
            });
            Ok(())
        }
    }

    struct Fixture {
        accounts: AccountLifecycle,
        store: MemoryUserStore,
        outbox: Arc<RecordingSender>,
    }

    fn fixture() -> Fixture {
        fixture_with_sender(Arc::new(RecordingSender::default()))
    }

    fn fixture_with_sender(outbox: Arc<RecordingSender>) -> Fixture {
        let store = MemoryUserStore::new();
        let sessions = SessionKeys::from_config(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            session_ttl_minutes: 60,
        });
        let accounts = AccountLifecycle::new(
            Arc::new(store.clone()),
            outbox.clone(),
            sessions,
            "https://larder.test",
        );
        Fixture {
            accounts,
            store,
            outbox,
        }
    }

    async fn activation_token_of(fx: &Fixture, user: &User) -> String {
        fx.store
            .find_by_id(user.id)
            .await
            .expect("lookup")
            .expect("user exists")
            .activation_token
            .expect("activation token set")
    }

    #[tokio::test]
    async fn register_creates_pending_user_and_mails_activation_link() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");

        assert!(!user.is_activated);
        assert!(user.activation_token.is_some());
        assert!(user.activation_expires_at.is_some());
        assert!(user.reset_token.is_none());

        let sent = fx.outbox.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert_eq!(sent[0].subject, "Larder - Activate Your Account");
        let token = user.activation_token.as_deref().unwrap();
        assert!(sent[0]
            .text
            .contains(&format!("https://larder.test/activate?token={token}")));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_identity() {
        let fx = fixture();
        fx.accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("first register");
        let err = fx
            .accounts
            .register("alice", "other@x.com", "pw1-long-enough")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::DuplicateIdentity));
    }

    #[tokio::test]
    async fn register_survives_notification_failure() {
        let fx = fixture_with_sender(Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }));
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register despite dead transport");
        assert!(fx.store.find_by_id(user.id).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn activation_token_is_single_use() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");
        let token = activation_token_of(&fx, &user).await;

        let activated = fx.accounts.activate_account(&token).await.expect("activate");
        assert!(activated.is_activated);
        assert!(activated.activation_token.is_none());
        assert!(activated.activation_expires_at.is_none());

        let err = fx.accounts.activate_account(&token).await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn concurrent_activation_has_exactly_one_winner() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");
        let token = activation_token_of(&fx, &user).await;

        let (a, b) = tokio::join!(
            fx.accounts.activate_account(&token),
            fx.accounts.activate_account(&token)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn expired_activation_token_is_rejected() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");
        let token = activation_token_of(&fx, &user).await;

        let mut stored = fx
            .store
            .find_by_id(user.id)
            .await
            .expect("lookup")
            .expect("user exists");
        stored.activation_expires_at = Some(OffsetDateTime::now_utc() - Duration::minutes(1));
        fx.store.save(&stored).await.expect("save");

        let err = fx.accounts.activate_account(&token).await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidOrExpiredToken));
        let after = fx
            .store
            .find_by_id(user.id)
            .await
            .expect("lookup")
            .expect("user exists");
        assert!(!after.is_activated);
    }

    #[tokio::test]
    async fn login_issues_verifiable_session() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");

        // By username and by email; no activation required.
        let (by_name, session) = fx
            .accounts
            .login("alice", "pw1-long-enough")
            .await
            .expect("login by username");
        let (by_email, _) = fx
            .accounts
            .login("a@x.com", "pw1-long-enough")
            .await
            .expect("login by email");
        assert_eq!(by_name.id, user.id);
        assert_eq!(by_email.id, user.id);

        let claims = fx
            .accounts
            .sessions
            .verify_session(&session)
            .expect("session verifies");
        assert_eq!(claims.sub, user.id);
    }

    #[tokio::test]
    async fn login_failures_are_distinguished() {
        let fx = fixture();
        fx.accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");

        let unknown = fx.accounts.login("nobody", "pw1-long-enough").await.unwrap_err();
        assert!(matches!(unknown, AccountError::UserNotFound));

        let wrong = fx.accounts.login("alice", "wrong-password").await.unwrap_err();
        assert!(matches!(wrong, AccountError::InvalidCredentials));
    }

    #[tokio::test]
    async fn forgot_password_sets_reset_fields_only() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");

        let after = fx.accounts.forgot_password("a@x.com").await.expect("forgot");
        assert!(after.reset_token.is_some());
        assert!(after.reset_expires_at.is_some());
        // Activation state untouched.
        assert_eq!(after.activation_token, user.activation_token);
        assert!(!after.is_activated);

        let sent = fx.outbox.sent.lock().await;
        let reset_mail = sent.last().expect("reset mail sent");
        assert_eq!(reset_mail.subject, "Larder - Reset Password");
        assert!(reset_mail
            .text
            .contains(after.reset_token.as_deref().unwrap()));

        drop(sent);
        let err = fx.accounts.forgot_password("nobody@x.com").await.unwrap_err();
        assert!(matches!(err, AccountError::UserNotFound));
    }

    #[tokio::test]
    async fn reset_password_replaces_credentials_once() {
        let fx = fixture();
        fx.accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");
        let with_reset = fx.accounts.forgot_password("a@x.com").await.expect("forgot");
        let token = with_reset.reset_token.expect("reset token set");

        fx.accounts
            .reset_password(&token, "pw2-long-enough")
            .await
            .expect("reset");

        let old = fx.accounts.login("alice", "pw1-long-enough").await.unwrap_err();
        assert!(matches!(old, AccountError::InvalidCredentials));
        fx.accounts
            .login("alice", "pw2-long-enough")
            .await
            .expect("login with new password");

        // Reset token was consumed together with the password change.
        let again = fx
            .accounts
            .reset_password(&token, "pw3-long-enough")
            .await
            .unwrap_err();
        assert!(matches!(again, AccountError::InvalidOrExpiredToken));

        let confirmation = fx.outbox.sent.lock().await;
        assert_eq!(
            confirmation.last().expect("confirmation sent").subject,
            "Larder - Password Reset Successful"
        );
    }

    #[tokio::test]
    async fn stale_reset_token_leaves_password_unchanged() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");
        fx.accounts.forgot_password("a@x.com").await.expect("forgot");

        let mut stored = fx
            .store
            .find_by_id(user.id)
            .await
            .expect("lookup")
            .expect("user exists");
        let token = stored.reset_token.clone().expect("reset token set");
        stored.reset_expires_at = Some(OffsetDateTime::now_utc() - Duration::hours(2));
        fx.store.save(&stored).await.expect("save");

        let err = fx
            .accounts
            .reset_password(&token, "pw3-long-enough")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidOrExpiredToken));
        assert!(fx
            .store
            .find_by_live_token(TokenField::Reset, &token)
            .await
            .expect("lookup")
            .is_none());
        fx.accounts
            .login("alice", "pw1-long-enough")
            .await
            .expect("old password still valid");
    }

    #[tokio::test]
    async fn profile_returns_user_behind_session() {
        let fx = fixture();
        let user = fx
            .accounts
            .register("alice", "a@x.com", "pw1-long-enough")
            .await
            .expect("register");
        let loaded = fx.accounts.profile(user.id).await.expect("profile");
        assert_eq!(loaded.id, user.id);

        let err = fx.accounts.profile(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AccountError::UserNotFound));
    }
}
