//! Contact form submissions and their hand-off.
//!
//! Delivery (email composition and transport) lives outside this crate;
//! a [`MessageSink`] receives every accepted, validated submission.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// A message could not be handed off.
#[derive(Debug, Error)]
#[error("message delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Fields posted by the contact form. Missing fields deserialize as empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
}

/// A validated contact submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
}

impl ContactForm {
    /// Trim every field and require name, email and message.
    pub fn validate(&self) -> Option<ContactMessage> {
        let name = self.name.trim();
        let email = self.email.trim();
        let message = self.message.trim();
        if name.is_empty() || email.is_empty() || message.is_empty() {
            return None;
        }
        let phone = Some(self.phone.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        Some(ContactMessage {
            name: name.to_string(),
            email: email.to_string(),
            phone,
            message: message.to_string(),
        })
    }
}

/// Receives accepted contact messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Hand off one message.
    async fn deliver(&self, message: &ContactMessage) -> Result<(), DeliveryError>;
}

/// Sink that records each submission as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&self, message: &ContactMessage) -> Result<(), DeliveryError> {
        info!(
            name = %message.name,
            has_phone = message.phone.is_some(),
            message_len = message.message.len(),
            "Contact form submission received"
        );
        Ok(())
    }
}
