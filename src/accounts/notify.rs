use async_trait::async_trait;
use tracing::info;

/// Outbound notification transport. Implementations own connection details;
/// callers only hand over addressed content.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> anyhow::Result<()>;
}

/// Transport that writes notifications to the structured log instead of a
/// wire. Stands in wherever no real mail transport is configured.
pub struct LogSender {
    from: String,
}

impl LogSender {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, to: &str, subject: &str, text: &str, _html: &str) -> anyhow::Result<()> {
        info!(from = %self.from, to = %to, subject = %subject, body = %text, "notification");
        Ok(())
    }
}

/// Subject, text body, and HTML body of an account notification.
pub struct Message {
    pub subject: &'static str,
    pub text: String,
    pub html: String,
}

pub fn activation_message(app_url: &str, token: &str) -> Message {
    let link = format!("{app_url}/activate?token={token}");
    Message {
        subject: "Larder - Activate Your Account",
        text: format!("Click the following link to activate your account: {link}"),
        html: format!(
            "<p>Click the following link to activate your account:</p>\
             <p><a href=\"{link}\">Activate Account</a></p>"
        ),
    }
}

pub fn reset_instructions_message(token: &str) -> Message {
    Message {
        subject: "Larder - Reset Password",
        text: format!(
            "You are receiving this because you have requested the reset of the \
             password of your account.\n\nToken: {token}\n\nIf you didn't request \
             this, please ignore this email and your password will remain unchanged."
        ),
        html: format!(
            "<p>You are receiving this because you have requested the reset of the \
             password of your account.</p><p><strong>Token: {token}</strong></p>\
             <p>If you didn't request this, please ignore this email and your \
             password will remain unchanged.</p>"
        ),
    }
}

pub fn reset_confirmation_message() -> Message {
    Message {
        subject: "Larder - Password Reset Successful",
        text: "Your password has been reset successfully. You can now log in with \
               your new password."
            .to_string(),
        html: "<p>Your password has been reset successfully.</p>\
               <p>You can now log in with your new password.</p>"
            .to_string(),
    }
}
