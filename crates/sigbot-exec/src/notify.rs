//! Notification delivery.
//!
//! Pipeline components emit [`Notification`]s into an unbounded channel; the
//! [`NotificationRouter`] task drains it and hands each event to every
//! configured [`Notifier`]. A failing notifier is logged and skipped; it never
//! blocks the pipeline or the other notifiers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sigbot_core::Notification;
use sigbot_core::error::NotifyError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sender half used by the pipeline and the monitor.
pub type NotificationSender = mpsc::UnboundedSender<Notification>;

/// Receiver half drained by the router.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

/// A destination for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn notify(&self, subject: &str, content: &str) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Writes notifications to the log. Always installed.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, subject: &str, content: &str) -> Result<(), NotifyError> {
        info!("[notify] {subject}: {content}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TelegramNotifier
// ---------------------------------------------------------------------------

/// Sends notifications through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: String,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_url: "https://api.telegram.org".into(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the notifier at a different Bot API host.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, subject: &str, content: &str) -> Result<(), NotifyError> {
        if self.bot_token.is_empty() || self.chat_id.is_empty() {
            return Err(NotifyError::Config("telegram bot token or chat id missing".into()));
        }
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_url.trim_end_matches('/'),
            self.bot_token
        );
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text: format!("{subject}\n{content}"),
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Platform(format!("Telegram API error {status}: {body}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NotificationRouter
// ---------------------------------------------------------------------------

/// Fans notifications out to every configured notifier.
pub struct NotificationRouter {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationRouter {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Deliver one notification. Returns the number of notifiers that failed.
    pub async fn dispatch(&self, notification: &Notification) -> usize {
        let subject = notification.subject();
        let body = notification.body();
        let mut failures = 0;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&subject, &body).await {
                warn!("[notify] {} failed to deliver '{subject}': {e}", notifier.name());
                failures += 1;
            }
        }
        failures
    }

    /// Drain the channel until every sender is dropped.
    pub async fn run(self, mut rx: NotificationReceiver) {
        info!("[notify] router started with {} notifier(s)", self.notifiers.len());
        while let Some(notification) = rx.recv().await {
            self.dispatch(&notification).await;
        }
        debug!("[notify] channel closed, router stopped");
    }
}
