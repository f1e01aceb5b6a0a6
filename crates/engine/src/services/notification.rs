//! Notification service trait and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::EngineError;

/// An outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
}

/// Trait for the external email sender.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Email>,
    fail_on_send: bool,
}

/// In-memory outbox of sent emails.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_send = fail;
    }

    pub fn sent(&self) -> Vec<Email> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }

    /// Returns the number of emails delivered to `to`.
    pub fn sent_to(&self, to: &str) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .iter()
            .filter(|email| email.to == to)
            .count()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn send(&self, email: Email) -> Result<(), EngineError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_send {
            return Err(EngineError::NotificationService(format!(
                "Mailbox rejected message to {}",
                email.to
            )));
        }

        state.sent.push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> Email {
        Email {
            to: to.to_string(),
            from: "bookings@example.com".to_string(),
            subject: "Your booking is confirmed".to_string(),
            html: "<p>See you soon</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_records_email() {
        let service = InMemoryNotificationService::new();
        service.send(email("ana@example.com")).await.unwrap();

        assert_eq!(service.sent_to("ana@example.com"), 1);
        assert_eq!(service.sent_to("bo@example.com"), 0);
        assert_eq!(service.sent()[0].subject, "Your booking is confirmed");
    }

    #[tokio::test]
    async fn test_fail_on_send() {
        let service = InMemoryNotificationService::new();
        service.set_fail_on_send(true);

        assert!(service.send(email("ana@example.com")).await.is_err());
        assert!(service.sent().is_empty());
    }
}
