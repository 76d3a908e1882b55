use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use weekletter_core::Notification;

use crate::{error::SinkError, sink::Sink};

/// Maximum characters per webhook message (Discord caps at 2000).
const CHUNK_MAX: usize = 1950;

/// Posts `{"content": "..."}` to an incoming-webhook URL, the payload shape
/// Discord-style chat webhooks accept. Long notifications are split into
/// several posts, sent in order.
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: &str, url: &str) -> Result<Self, SinkError> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(SinkError::ConfigError(format!(
                "webhook '{name}' needs an http(s) URL, got '{url}'"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let chunks = split_chunks(&notification.render());
        debug!(sink = %self.name, kind = %notification.kind, chunks = chunks.len(), "posting webhook");

        for chunk in chunks {
            let resp = self
                .client
                .post(&self.url)
                .json(&json!({ "content": chunk }))
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!(sink = %self.name, status = status.as_u16(), body = %body, "webhook rejected message");
                return Err(SinkError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
        }
        Ok(())
    }
}

/// Split `text` into chunks of at most [`CHUNK_MAX`] characters, preferring
/// newline, then space boundaries. Never splits inside a UTF-8 sequence.
pub fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > CHUNK_MAX {
        // Byte offset of the first char past the window.
        let window_end = remaining
            .char_indices()
            .nth(CHUNK_MAX)
            .map_or(remaining.len(), |(i, _)| i);
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_chunks("Hej Emma"), vec!["Hej Emma".to_string()]);
    }

    #[test]
    fn long_text_splits_on_newline() {
        let line = "a".repeat(1000);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text);
        assert_eq!(chunks, vec![line.clone(), line]);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "ø".repeat(4000);
        let chunks = split_chunks(&text);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.chars().count() <= CHUNK_MAX);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(matches!(
            WebhookSink::new("chat", "ftp://example.test"),
            Err(SinkError::ConfigError(_))
        ));
        assert!(WebhookSink::new("chat", "https://example.test/hook").is_ok());
    }
}
