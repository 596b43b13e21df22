//! Generation provider abstraction and implementations.
//!
//! Defines the [`Generator`] trait and concrete implementations:
//! - **[`DisabledGenerator`]**: returns errors; used when no provider is configured.
//! - **[`GeminiGenerator`]**: calls the Google generative-language API, with
//!   optional server-sent-event streaming, retry, and backoff.
//!
//! Use [`create_generator`] to instantiate the configured provider.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors before the response arrives → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Once a streamed response has started delivering text it is not retried;
//! the caller already displayed part of it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use reply_companion_core::models::{CostMetrics, UsageMetrics};
use reply_companion_core::session::GenerationResult;

use crate::config::{GenerationConfig, PricingConfig};

/// A single prompt to send to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Overrides the configured model for this request.
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// The model used when a request does not name one.
    fn model_name(&self) -> &str;

    /// Runs one generation. When `chunks` is given, text is also sent there
    /// as it arrives; the returned result always carries the full text.
    async fn generate(
        &self,
        request: &GenerationRequest,
        chunks: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<GenerationResult>;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
        _chunks: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<GenerationResult> {
        bail!("Generation is disabled. Set [generation] provider in the config.")
    }
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    api_base: String,
    api_key: String,
    max_retries: u32,
    pricing: PricingConfig,
}

impl GeminiGenerator {
    /// # Errors
    ///
    /// Returns an error if `model` is not set or the API key variable named
    /// by `api_key_env` is missing.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for gemini provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            pricing: config.pricing,
        })
    }

    fn endpoint(&self, model: &str, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.api_base, model
            )
        } else {
            format!("{}/models/{}:generateContent", self.api_base, model)
        }
    }

    async fn send_with_retry(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!("Retrying generation in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Generation failed after retries")))
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        chunks: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<GenerationResult> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });

        let url = self.endpoint(model, chunks.is_some());
        let mut response = self.send_with_retry(&url, &body).await?;

        let (text, usage) = match chunks {
            None => {
                let json: serde_json::Value = response.json().await?;
                let reply = parse_response(&json)?;
                (reply.text, reply.usage)
            }
            Some(tx) => {
                let mut decoder = SseDecoder::default();
                let mut text = String::new();
                let mut usage = None;
                while let Some(bytes) = response.chunk().await? {
                    for data in decoder.push(&bytes) {
                        let json: serde_json::Value = serde_json::from_str(&data)?;
                        let reply = parse_response(&json)?;
                        if !reply.text.is_empty() {
                            // The receiver going away only stops the preview.
                            let _ = tx.send(reply.text.clone());
                            text.push_str(&reply.text);
                        }
                        if reply.usage.is_some() {
                            usage = reply.usage;
                        }
                    }
                }
                (text, usage)
            }
        };

        if text.trim().is_empty() {
            bail!("Gemini returned an empty reply");
        }

        Ok(GenerationResult {
            text,
            cost: usage.map(|u| compute_cost(&u, &self.pricing)),
            usage,
            model: model.to_string(),
        })
    }
}

/// Text and usage extracted from one `GenerateContentResponse`.
#[derive(Debug, Default, PartialEq)]
struct ParsedReply {
    text: String,
    usage: Option<UsageMetrics>,
}

/// Parses a `generateContent` response, or one event of a streamed one.
///
/// Streamed events can carry no candidate text (e.g. the final usage-only
/// event), so only an `error` object is treated as a failure.
fn parse_response(json: &serde_json::Value) -> Result<ParsedReply> {
    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        bail!("Gemini API error: {}", message);
    }

    let mut text = String::new();
    if let Some(parts) = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
        }
    }

    let usage = json.get("usageMetadata").map(|meta| {
        let count = |key: &str| meta.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        let prompt_tokens = count("promptTokenCount");
        let completion_tokens = count("candidatesTokenCount");
        let total = count("totalTokenCount");
        UsageMetrics {
            prompt_tokens,
            completion_tokens,
            total_tokens: if total > 0 {
                total
            } else {
                prompt_tokens + completion_tokens
            },
        }
    });

    Ok(ParsedReply { text, usage })
}

/// Incremental decoder for `text/event-stream` bodies. Yields the `data`
/// payload of each complete event.
///
/// Network chunks can end inside a multi-byte character, so bytes are only
/// decoded once a whole line has arrived.
#[derive(Default)]
struct SseDecoder {
    line_buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.line_buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline_index) = self.line_buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.line_buffer.drain(..=newline_index).collect::<Vec<_>>();
            line.pop();
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.strip_prefix("data:") {
                self.data
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        events
    }
}

/// USD cost of `usage` under `pricing` (prices per million tokens).
pub fn compute_cost(usage: &UsageMetrics, pricing: &PricingConfig) -> CostMetrics {
    let input_cost = usage.prompt_tokens as f64 * pricing.input_per_million / 1_000_000.0;
    let output_cost = usage.completion_tokens as f64 * pricing.output_per_million / 1_000_000.0;
    CostMetrics {
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_joins_parts_and_usage() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Great " }, { "text": "point!" }] }
            }],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 8,
                "totalTokenCount": 128
            }
        });
        let reply = parse_response(&json).unwrap();
        assert_eq!(reply.text, "Great point!");
        assert_eq!(
            reply.usage,
            Some(UsageMetrics {
                prompt_tokens: 120,
                completion_tokens: 8,
                total_tokens: 128,
            })
        );
    }

    #[test]
    fn test_parse_usage_only_event() {
        let json = serde_json::json!({
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5 }
        });
        let reply = parse_response(&json).unwrap();
        assert_eq!(reply.text, "");
        assert_eq!(reply.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_parse_error_object() {
        let json = serde_json::json!({ "error": { "code": 400, "message": "API key not valid" } });
        let err = parse_response(&json).unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
    }

    #[test]
    fn test_sse_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\r\n\r\ndata: {\"b\":2}\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert!(decoder.push(b": keep-alive\n\n").is_empty());
    }

    #[test]
    fn test_sse_decoder_keeps_characters_split_across_chunks() {
        let event = "data: {\"t\":\"café 👍\"}\n\n".as_bytes();
        let emoji_start = event.windows(4).position(|w| w == "👍".as_bytes()).unwrap();
        let (head, tail) = event.split_at(emoji_start + 2);

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(head).is_empty());
        let events = decoder.push(tail);
        assert_eq!(events, vec!["{\"t\":\"café 👍\"}".to_string()]);

        let json: serde_json::Value = serde_json::from_str(&events[0]).unwrap();
        assert_eq!(json["t"], "café 👍");
    }

    #[test]
    fn test_compute_cost() {
        let usage = UsageMetrics {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
            total_tokens: 1_500_000,
        };
        let pricing = PricingConfig {
            input_per_million: 0.10,
            output_per_million: 0.40,
        };
        let cost = compute_cost(&usage, &pricing);
        assert!((cost.input_cost - 0.10).abs() < 1e-9);
        assert!((cost.output_cost - 0.20).abs() < 1e-9);
        assert!((cost.total_cost - 0.30).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.model_name(), "disabled");
        let result = generator.generate(&GenerationRequest::new("hi"), None).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_gemini_requires_api_key() {
        let config = GenerationConfig {
            provider: "gemini".to_string(),
            model: Some("gemini-2.0-flash".to_string()),
            api_key_env: "REPLY_COMPANION_TEST_MISSING_KEY".to_string(),
            ..GenerationConfig::default()
        };
        let err = GeminiGenerator::new(&config).err().unwrap();
        assert!(err.to_string().contains("REPLY_COMPANION_TEST_MISSING_KEY"));
    }
}
