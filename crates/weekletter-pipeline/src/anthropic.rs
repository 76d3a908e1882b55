use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use weekletter_core::Period;

use crate::error::ExtractionError;
use crate::extractor::{parse_candidates, CandidateEvent, EventExtractor};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MAX_TOKENS: u32 = 2048;

const SYSTEM_PROMPT: &str = "You read school week letters and list the dated items parents must act on. \
Reply with a JSON array only. Each element has the fields \
\"type\" (one of \"deadline\", \"permission_form\", \"event\", \"supply_needed\"), \
\"title\" (short), \"description\" (one sentence, may be empty), \
\"date\" (YYYY-MM-DD) and \"confidence\" (0.0 to 1.0). \
Reply with [] when there is nothing actionable.";

/// [`EventExtractor`] backed by the Anthropic Messages API.
pub struct AnthropicExtractor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicExtractor {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
        }
    }
}

#[async_trait]
impl EventExtractor for AnthropicExtractor {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn extract(
        &self,
        text: &str,
        period: Period,
    ) -> Result<Vec<CandidateEvent>, ExtractionError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_request_body(&self.model, text, period);

        debug!(model = %self.model, %period, "requesting event extraction");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ExtractionError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ExtractionError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidOutput(e.to_string()))?;

        parse_candidates(&response_text(api_resp))
    }
}

fn build_request_body(model: &str, text: &str, period: Period) -> serde_json::Value {
    let week_start = period
        .monday()
        .map(|d| format!(" (the week starts on {d})"))
        .unwrap_or_default();
    serde_json::json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "system": SYSTEM_PROMPT,
        "messages": [{
            "role": "user",
            "content": format!(
                "Week letter for {period}{week_start}. \
                 Resolve weekday names to dates in that week.\n\n{text}"
            ),
        }],
    })
}

fn response_text(resp: ApiResponse) -> String {
    resp.content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}
