//! Notification port for transactional email
//!
//! The account lifecycle hands a templated message to a [`Notifier`];
//! rendering and delivery belong to the adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use validator::ValidateEmail;

use crate::config::EmailConfig;
use crate::{BroilerError, Result};

/// Product name injected into every template
pub const PRODUCT_NAME: &str = "Broilerplate";

/// Email templates the lifecycle can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailAction {
    VerifyAccount,
    ResetPassword,
}

impl EmailAction {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::VerifyAccount => "Verify your account",
            Self::ResetPassword => "Reset your password",
        }
    }

    /// Template variables the action requires in its payload
    pub fn expected_variables(&self) -> &'static [&'static str] {
        match self {
            Self::VerifyAccount => &["firstName", "email", "verificationUrl"],
            Self::ResetPassword => &["firstName", "email", "resetPasswordUrl"],
        }
    }
}

impl std::fmt::Display for EmailAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VerifyAccount => write!(f, "VERIFY_ACCOUNT"),
            Self::ResetPassword => write!(f, "RESET_PASSWORD"),
        }
    }
}

/// A message recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn named(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }
}

/// Template payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailData {
    /// Overrides the action's default subject
    pub subject: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl EmailData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}

/// Reject payloads an adapter could not render
pub fn validate_email_payload(
    action: EmailAction,
    recipients: &[Recipient],
    data: &EmailData,
) -> Result<()> {
    if recipients.is_empty() {
        return Err(BroilerError::ValidationError(
            "at least one recipient is required".to_string(),
        ));
    }

    if let Some(bad) = recipients.iter().find(|r| !r.email.trim().validate_email()) {
        return Err(BroilerError::ValidationError(format!(
            "invalid recipient address `{}`",
            bad.email
        )));
    }

    let missing: Vec<&str> = action
        .expected_variables()
        .iter()
        .copied()
        .filter(|name| data.get(name).map_or(true, |v| v.is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(BroilerError::ValidationError(format!(
            "{action} email is missing variables: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

/// Outbound email port
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, action: EmailAction, recipients: Vec<Recipient>, data: EmailData)
        -> Result<()>;
}

// ============================================================================
// Adapters
// ============================================================================

/// Notifier that records dispatches through tracing
///
/// Only the action and recipient count are logged; template variables carry
/// one-time links and stay out of the log stream.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    sender: EmailConfig,
}

impl LogNotifier {
    pub fn new(sender: EmailConfig) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        action: EmailAction,
        recipients: Vec<Recipient>,
        data: EmailData,
    ) -> Result<()> {
        validate_email_payload(action, &recipients, &data)?;

        let subject = data.subject.as_deref().unwrap_or(action.subject());
        tracing::info!(
            action = %action,
            subject = subject,
            recipients = recipients.len(),
            sender = %self.sender.sender_email,
            product = PRODUCT_NAME,
            "email dispatched"
        );

        Ok(())
    }
}

/// A message captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub action: EmailAction,
    pub recipients: Vec<Recipient>,
    pub data: EmailData,
}

/// In-memory notifier for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }

    /// Most recent message of `action` addressed to `email`
    pub async fn last_to(&self, email: &str, action: EmailAction) -> Option<SentEmail> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.action == action && m.recipients.iter().any(|r| r.email == email))
            .cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        action: EmailAction,
        recipients: Vec<Recipient>,
        data: EmailData,
    ) -> Result<()> {
        validate_email_payload(action, &recipients, &data)?;

        if self.fail {
            return Err(BroilerError::NotificationError(
                "delivery unavailable".to_string(),
            ));
        }

        self.sent.lock().await.push(SentEmail {
            action,
            recipients,
            data,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify_payload() -> EmailData {
        EmailData::new()
            .var("firstName", "Ada")
            .var("email", "ada@example.com")
            .var("verificationUrl", "http://localhost/verify?token=t")
    }

    #[test]
    fn test_action_metadata() {
        assert_eq!(EmailAction::VerifyAccount.subject(), "Verify your account");
        assert!(EmailAction::ResetPassword
            .expected_variables()
            .contains(&"resetPasswordUrl"));
        assert_eq!(EmailAction::ResetPassword.to_string(), "RESET_PASSWORD");
    }

    #[test]
    fn test_validate_payload() {
        let to = vec![Recipient::named("ada@example.com", "Ada")];
        assert!(validate_email_payload(EmailAction::VerifyAccount, &to, &verify_payload()).is_ok());

        assert!(validate_email_payload(EmailAction::VerifyAccount, &[], &verify_payload()).is_err());

        let bad = vec![Recipient::new("not-an-email")];
        assert!(validate_email_payload(EmailAction::VerifyAccount, &bad, &verify_payload()).is_err());

        let err = validate_email_payload(EmailAction::ResetPassword, &to, &verify_payload())
            .unwrap_err()
            .to_string();
        assert!(err.contains("resetPasswordUrl"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier
            .send(
                EmailAction::VerifyAccount,
                vec![Recipient::new("ada@example.com")],
                verify_payload(),
            )
            .await
            .unwrap();

        assert_eq!(notifier.sent().await.len(), 1);
        let last = notifier
            .last_to("ada@example.com", EmailAction::VerifyAccount)
            .await
            .unwrap();
        assert_eq!(last.data.get("firstName"), Some("Ada"));
        assert!(notifier
            .last_to("ada@example.com", EmailAction::ResetPassword)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_failing_notifier() {
        let notifier = RecordingNotifier::failing();
        let result = notifier
            .send(
                EmailAction::VerifyAccount,
                vec![Recipient::new("ada@example.com")],
                verify_payload(),
            )
            .await;

        assert!(matches!(result, Err(BroilerError::NotificationError(_))));
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_log_notifier_validates() {
        let notifier = LogNotifier::new(EmailConfig::default());
        let result = notifier
            .send(EmailAction::VerifyAccount, vec![], verify_payload())
            .await;
        assert!(result.is_err());
    }
}
