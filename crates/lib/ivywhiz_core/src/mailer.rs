//! Outbound mail seam.
//!
//! Delivery itself lives outside this crate. [`LogMailer`] records what would
//! have been sent, which is what local runs use.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Which message to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// Signup greeting carrying the activation token.
    Welcome,
    /// Re-sent activation token.
    Activation,
    PasswordReset,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::Welcome => "user_welcome",
            Template::Activation => "token_activation",
            Template::PasswordReset => "token_password_reset",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub recipient: String,
    pub template: Template,
    pub user_id: i64,
    /// Token plaintext to embed in the body.
    pub token: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// Logs each message instead of delivering it. Token plaintext is not logged.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        info!(
            recipient = %message.recipient,
            template = message.template.name(),
            user_id = message.user_id,
            "mail queued"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let mailer = LogMailer;
        mailer
            .send(Message {
                recipient: "a@b.co".into(),
                template: Template::PasswordReset,
                user_id: 1,
                token: "X".repeat(26),
            })
            .await
            .unwrap();
    }

    #[test]
    fn template_names_are_distinct() {
        let names = [
            Template::Welcome.name(),
            Template::Activation.name(),
            Template::PasswordReset.name(),
        ];
        assert_eq!(
            names.iter().collect::<std::collections::HashSet<_>>().len(),
            3
        );
    }
}
