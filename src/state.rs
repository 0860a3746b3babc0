use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::accounts::{
    lifecycle::AccountLifecycle,
    notify::{LogSender, NotificationSender},
    pg::PgUserStore,
    session::SessionKeys,
    store::UserStore,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountLifecycle,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;

        let users = Arc::new(PgUserStore::new(pool)) as Arc<dyn UserStore>;
        let notifier = Arc::new(LogSender::new(config.mail_from.clone())) as Arc<dyn NotificationSender>;
        Ok(Self::from_parts(users, notifier, config))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn NotificationSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let sessions = SessionKeys::from_config(&config.jwt);
        let accounts = AccountLifecycle::new(users, notifier, sessions, config.app_url.clone());
        Self { accounts, config }
    }

    /// State wired to the in-memory store and log transport, for tests.
    pub fn fake() -> Self {
        use crate::accounts::memory::MemoryUserStore;
        use crate::config::JwtConfig;

        let config = Arc::new(AppConfig {
            database_url: "postgres://unused".into(),
            app_url: "https://larder.test".into(),
            mail_from: "no-reply@larder.test".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                session_ttl_minutes: 60,
            },
        });
        let users = Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>;
        let notifier =
            Arc::new(LogSender::new(config.mail_from.clone())) as Arc<dyn NotificationSender>;
        Self::from_parts(users, notifier, config)
    }
}
