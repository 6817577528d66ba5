// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic messages-style driver.
//!
//! `POST {base}/v1/messages`, non-streaming.  The answer is the
//! concatenation of `content[*].text` blocks where `type == "text"`; some
//! gateway deployments respond with a bare `reply` or `status_msg` field
//! instead, so those are accepted as fallbacks.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{ChatProvider, InvokeOptions, ProviderId, ResponseStream};
use crate::types::{ModelDescriptor, StreamEvent, TokenUsage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct MessagesProvider {
    model: ModelDescriptor,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl MessagesProvider {
    pub fn new(model: ModelDescriptor, api_key: String, base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| {
            ProviderId::Anthropic
                .default_base_url()
                .unwrap_or_default()
                .to_string()
        });
        Self {
            model,
            api_key,
            base_url: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatProvider for MessagesProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model.id
    }

    fn resolve_base_url(&self) -> String {
        self.base_url.clone()
    }

    async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> anyhow::Result<ResponseStream> {
        let body = json!({
            "model": self.model.id,
            "max_tokens": opts.effective_max_tokens(self.model.max_output_tokens),
            "messages": [{ "role": "user", "content": prompt }],
        });

        debug!(model = %self.model.id, "sending messages request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("anthropic error {status}: {text}");
        }

        let v: Value = resp.json().await.context("decoding anthropic response")?;
        let text = extract_text(&v);
        if text.trim().is_empty() {
            bail!("anthropic returned an empty response");
        }

        let usage = extract_usage(&v, prompt, &text);
        let events = vec![
            Ok(StreamEvent::Delta(text)),
            Ok(StreamEvent::Usage(usage)),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Join all text blocks; fall back to `reply`, then `status_msg`.
fn extract_text(v: &Value) -> String {
    if let Some(blocks) = v["content"].as_array() {
        let joined: String = blocks
            .iter()
            .filter(|b| b["type"].as_str() == Some("text"))
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        if !joined.trim().is_empty() {
            return joined;
        }
    }
    if let Some(reply) = v["reply"].as_str() {
        return reply.to_string();
    }
    v["status_msg"].as_str().unwrap_or_default().to_string()
}

fn extract_usage(v: &Value, prompt: &str, completion: &str) -> TokenUsage {
    let input = v["usage"]["input_tokens"].as_u64();
    let output = v["usage"]["output_tokens"].as_u64();
    match (input, output) {
        (Some(i), Some(o)) => TokenUsage {
            prompt_tokens: i as u32,
            completion_tokens: o as u32,
            total_tokens: (i + o) as u32,
        },
        _ => TokenUsage::estimate(prompt, completion),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_blocks_are_joined_in_order() {
        let v = json!({
            "content": [
                { "type": "text", "text": "Hello " },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "world" },
            ]
        });
        assert_eq!(extract_text(&v), "Hello world");
    }

    #[test]
    fn non_text_blocks_are_ignored() {
        let v = json!({ "content": [{ "type": "thinking", "thinking": "hmm" }] });
        assert_eq!(extract_text(&v), "");
    }

    #[test]
    fn reply_field_is_fallback() {
        let v = json!({ "reply": "from the gateway" });
        assert_eq!(extract_text(&v), "from the gateway");
    }

    #[test]
    fn status_msg_is_last_resort() {
        let v = json!({ "status_msg": "degraded" });
        assert_eq!(extract_text(&v), "degraded");
    }

    #[test]
    fn content_wins_over_reply() {
        let v = json!({
            "content": [{ "type": "text", "text": "real answer" }],
            "reply": "stale",
        });
        assert_eq!(extract_text(&v), "real answer");
    }

    #[test]
    fn reported_usage_is_used() {
        let v = json!({ "usage": { "input_tokens": 12, "output_tokens": 4 } });
        let u = extract_usage(&v, "p", "c");
        assert_eq!(u.prompt_tokens, 12);
        assert_eq!(u.completion_tokens, 4);
        assert_eq!(u.total_tokens, 16);
    }

    #[test]
    fn missing_usage_falls_back_to_estimate() {
        let v = json!({});
        let u = extract_usage(&v, "12345678", "1234");
        assert_eq!(u.prompt_tokens, 2);
        assert_eq!(u.completion_tokens, 1);
    }
}
