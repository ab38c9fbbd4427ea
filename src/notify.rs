//! Outbound alert delivery.
//!
//! Alerts are handed to a bounded channel and delivered by a worker task,
//! so producers never wait on the notifier.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A rendered alert ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// URL of the service the alert is about.
    pub url: String,
    pub subject: String,
    pub html_body: String,
}

/// Delivers alert payloads (mail, chat, ...). Failures are reported, never
/// retried by the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        tracing::warn!(subject, body_bytes = html_body.len(), "Alert raised");
        Ok(())
    }
}

/// Queue in front of a [`Notifier`].
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Alert>,
}

impl AlertDispatcher {
    /// Spawn the delivery worker. It exits once every dispatcher clone is dropped.
    pub fn start(notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_dispatcher(rx, notifier));
        Self { tx }
    }

    /// Queue an alert without waiting. Returns false if it was dropped.
    pub fn dispatch(&self, alert: Alert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                tracing::warn!("Alert queue full, dropping alert for {}", alert.url);
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                tracing::error!("Alert worker stopped, dropping alert for {}", alert.url);
                false
            }
        }
    }
}

async fn run_dispatcher(mut rx: mpsc::Receiver<Alert>, notifier: Arc<dyn Notifier>) {
    while let Some(alert) = rx.recv().await {
        match notifier.send(&alert.subject, &alert.html_body).await {
            Ok(()) => tracing::info!("Alert sent for {}", alert.url),
            Err(e) => tracing::error!("Failed to send alert for {}: {}", alert.url, e),
        }
    }
}

const HTML_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: Arial, sans-serif; color: #333; margin: 0; padding: 0; line-height: 1.5;">
<div style="background-color: #F4F4F4; padding: 20px;">
<div style="background-color: #FFFFFF; max-width: 600px; margin: 0 auto; padding: 20px; border-radius: 8px;">
"#;

const HTML_TAIL: &str = "</div>\n</div>\n</body>\n</html>\n";

/// Wrap an HTML fragment in the standard alert document.
pub fn wrap_html(inner: &str) -> String {
    let mut out = String::with_capacity(HTML_HEAD.len() + inner.len() + HTML_TAIL.len());
    out.push_str(HTML_HEAD);
    out.push_str(inner);
    out.push('\n');
    out.push_str(HTML_TAIL);
    out
}

/// Minimal escaping for text placed inside HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
