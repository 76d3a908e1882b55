use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use weekletter_core::Period;

use crate::error::SourceError;

/// What the upstream had for a period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The letter text.
    Published(String),
    /// Authenticated fine, but nothing has been written for this period yet.
    /// Not an error and not retried like one.
    NotPublished,
}

impl FetchOutcome {
    /// Map blank text to [`FetchOutcome::NotPublished`].
    pub fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            FetchOutcome::NotPublished
        } else {
            FetchOutcome::Published(text)
        }
    }
}

/// Authenticated retrieval of week letters from the upstream service.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    async fn fetch(&self, subject: &str, period: Period) -> Result<FetchOutcome, SourceError>;
}

#[derive(Debug, Deserialize)]
struct LetterResponse {
    #[serde(default)]
    content: String,
}

/// JSON-over-HTTP source.
///
/// `GET {base_url}/subjects/{subject}/weeks/{year}/{week}` returning
/// `{"content": "..."}`. 204 and 404 mean nothing is published yet.
pub struct HttpContentSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpContentSource {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, subject: &str, period: Period) -> String {
        format!(
            "{}/subjects/{}/weeks/{}/{}",
            self.base_url, subject, period.year, period.week
        )
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, subject: &str, period: Period) -> Result<FetchOutcome, SourceError> {
        let url = self.url(subject, period);
        debug!(%url, "fetching week letter");

        let mut builder = self.client.get(&url);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder.send().await?;

        let status = resp.status().as_u16();
        match status {
            204 | 404 => return Ok(FetchOutcome::NotPublished),
            401 | 403 => {
                let text = resp.text().await.unwrap_or_default();
                return Err(SourceError::AuthFailed(text));
            }
            _ => {}
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "week letter source error");
            return Err(SourceError::Upstream {
                status,
                message: text,
            });
        }

        let letter: LetterResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(FetchOutcome::from_text(letter.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_not_published() {
        assert_eq!(FetchOutcome::from_text("  \n".into()), FetchOutcome::NotPublished);
        assert_eq!(
            FetchOutcome::from_text("Hej".into()),
            FetchOutcome::Published("Hej".into())
        );
    }

    #[test]
    fn url_uses_year_then_week() {
        let src = HttpContentSource::new("https://letters.example.test/api/", None);
        let period = Period::new(20, 2024).unwrap();
        assert_eq!(
            src.url("emma", period),
            "https://letters.example.test/api/subjects/emma/weeks/2024/20"
        );
    }
}
