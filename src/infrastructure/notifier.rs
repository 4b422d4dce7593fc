use crate::domain::ports::NotificationGateway;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Delivers messages to the log instead of a carrier. Used until an SMS
/// provider is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationGateway;

#[async_trait]
impl NotificationGateway for LogNotificationGateway {
    async fn send_text(&self, phone: &str, message: &str) -> Result<()> {
        info!(phone = %phone, message = %message, "Text message dispatched");
        Ok(())
    }
}

/// Keeps every message in memory so callers can read them back.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotificationGateway {
    sent: Arc<RwLock<Vec<(String, String)>>>,
}

impl RecordingNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotificationGateway {
    async fn send_text(&self, phone: &str, message: &str) -> Result<()> {
        self.sent
            .write()
            .await
            .push((phone.to_string(), message.to_string()));
        Ok(())
    }
}
