// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gemini driver: internal generative SSE endpoint.
//!
//! `POST {endpoint}/v1internal:streamGenerateContent?alt=sse` with a nested
//! request envelope (`project`, `model`, `request`, `requestType`,
//! `requestId`).  The endpoint also proxies a Claude model family; the
//! `-thinking` variants of that family require the
//! `anthropic-beta: interleaved-thinking-2025-05-14` header.
//!
//! Deployments rotate; a request is attempted against up to three endpoints
//! in order (the user-selected one, the daily channel, then prod) until
//! one yields non-empty text.

use anyhow::{bail, Context};
use serde_json::{json, Value};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::provider::{ChatProvider, InvokeOptions, ProviderId, ResponseStream};
use crate::types::{ModelDescriptor, StreamEvent, TokenUsage};

/// Default (user-selectable) endpoint.
pub const USER_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";
/// Daily release channel.
pub const DAILY_ENDPOINT: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
/// Production fallback.
pub const PROD_ENDPOINT: &str = "https://prod-cloudcode-pa.googleapis.com";

const THINKING_BETA_HEADER: &str = "interleaved-thinking-2025-05-14";

pub struct GenerativeProvider {
    model: ModelDescriptor,
    api_key: String,
    /// User-selected endpoint override, tried first.
    endpoint_override: Option<String>,
    project: String,
    client: reqwest::Client,
}

impl GenerativeProvider {
    pub fn new(model: ModelDescriptor, api_key: String, endpoint_override: Option<String>) -> Self {
        let project = std::env::var("FREJA_GEMINI_PROJECT").unwrap_or_else(|_| "default".into());
        Self {
            model,
            api_key,
            endpoint_override,
            project,
            client: reqwest::Client::new(),
        }
    }

    /// Endpoints in attempt order, deduped.
    fn endpoints(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(sel) = &self.endpoint_override {
            out.push(sel.trim_end_matches('/').to_string());
        }
        for ep in [USER_ENDPOINT, DAILY_ENDPOINT, PROD_ENDPOINT] {
            if !out.iter().any(|e| e == ep) {
                out.push(ep.to_string());
            }
        }
        out.truncate(3);
        out
    }

    fn is_thinking_variant(&self) -> bool {
        self.model.id.starts_with("claude") && self.model.id.contains("thinking")
    }

    async fn try_endpoint(&self, endpoint: &str, prompt: &str) -> anyhow::Result<(Vec<String>, Option<TokenUsage>)> {
        let body = json!({
            "project": self.project,
            "model": self.model.id,
            "request": {
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "systemInstruction": Value::Null,
            },
            "requestType": "agent",
            "requestId": uuid::Uuid::new_v4().to_string(),
        });

        let mut req = self
            .client
            .post(format!("{endpoint}/v1internal:streamGenerateContent?alt=sse"))
            .bearer_auth(&self.api_key)
            .json(&body);
        if self.is_thinking_variant() {
            req = req.header("anthropic-beta", THINKING_BETA_HEADER);
        }

        let resp = req.send().await.context("gemini request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("gemini error {status}: {text}");
        }

        let raw = resp.text().await.context("reading gemini stream")?;
        Ok(parse_sse_body(&raw))
    }
}

#[async_trait]
impl ChatProvider for GenerativeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model_id(&self) -> &str {
        &self.model.id
    }

    fn resolve_base_url(&self) -> String {
        self.endpoints().remove(0)
    }

    async fn invoke(&self, prompt: &str, _opts: &InvokeOptions) -> anyhow::Result<ResponseStream> {
        let mut last_err: Option<anyhow::Error> = None;

        for endpoint in self.endpoints() {
            debug!(endpoint = %endpoint, model = %self.model.id, "trying generative endpoint");
            match self.try_endpoint(&endpoint, prompt).await {
                Ok((parts, usage)) if !parts.iter().all(|p| p.trim().is_empty()) => {
                    let full: String = parts.concat();
                    let usage = usage.unwrap_or_else(|| TokenUsage::estimate(prompt, &full));
                    let mut events: Vec<anyhow::Result<StreamEvent>> = parts
                        .into_iter()
                        .map(|p| Ok(StreamEvent::Delta(p)))
                        .collect();
                    events.push(Ok(StreamEvent::Usage(usage)));
                    events.push(Ok(StreamEvent::Done));
                    return Ok(Box::pin(futures::stream::iter(events)));
                }
                Ok(_) => {
                    warn!(endpoint = %endpoint, "generative endpoint yielded empty text");
                    last_err = Some(anyhow::anyhow!("gemini returned an empty response"));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "generative endpoint failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no gemini endpoint available")))
    }
}

/// Pull the text parts (and optional usage metadata) out of a raw SSE body.
///
/// Each `data:` line decodes to a frame whose payload may sit at the root or
/// under a `response` wrapper; text lives in
/// `candidates[0].content.parts[*].text`.
fn parse_sse_body(raw: &str) -> (Vec<String>, Option<TokenUsage>) {
    let mut parts: Vec<String> = Vec::new();
    let mut usage: Option<TokenUsage> = None;

    for line in raw.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(v) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        let payload = if v.get("response").is_some() {
            &v["response"]
        } else {
            &v
        };

        if let Some(arr) = payload["candidates"][0]["content"]["parts"].as_array() {
            for p in arr {
                if let Some(t) = p["text"].as_str() {
                    if !t.is_empty() {
                        parts.push(t.to_string());
                    }
                }
            }
        }

        let meta = &payload["usageMetadata"];
        if meta.is_object() {
            let prompt_tokens = meta["promptTokenCount"].as_u64().unwrap_or(0) as u32;
            let completion_tokens = meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
            usage = Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: meta["totalTokenCount"]
                    .as_u64()
                    .map(|t| t as u32)
                    .unwrap_or(prompt_tokens + completion_tokens),
            });
        }
    }

    (parts, usage)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
