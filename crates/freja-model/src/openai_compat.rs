// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared driver for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Four of freja's providers (openai, groq, mistral, deepseek) speak this
//! wire format.  One struct covers them all; the provider id selects the
//! base URL and credential.
//!
//! Usage statistics are requested via `stream_options.include_usage`.  Not
//! every server honours it; the router falls back to length-based
//! estimation when no usage event arrives.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{ChatProvider, InvokeOptions, ProviderId, ResponseStream};
use crate::types::{StreamEvent, TokenUsage};

pub struct OpenAiCompatProvider {
    provider: ProviderId,
    model: crate::types::ModelDescriptor,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        provider: ProviderId,
        model: crate::types::ModelDescriptor,
        api_key: String,
        base_url: Option<String>,
    ) -> Self {
        let base = base_url
            .or_else(|| provider.default_base_url().map(|s| s.to_string()))
            .unwrap_or_default();
        Self {
            provider,
            model,
            api_key,
            base_url: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.provider
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
            "messages": [{ "role": "user", "content": prompt }],
            "stream": true,
            "stream_options": { "include_usage": true },
            "max_tokens": opts.effective_max_tokens(self.model.max_output_tokens),
        });

        debug!(provider = %self.provider, model = %self.model.id, "sending chat completion");

        let resp = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.provider);
        }

        // SSE events can be split across TCP packets; keep a line buffer
        // across chunks and only parse complete lines.
        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<StreamEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`, leaving any
/// trailing partial line for the next chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<StreamEvent>> {
    let mut events = Vec::new();
    while let Some(nl) = buf.find('\n') {
        let line = buf[..nl].trim_end_matches('\r').to_string();
        *buf = buf[nl + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse one complete SSE `data:` line.  Empty lines, comments and
/// unparseable payloads yield `None`.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<StreamEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_chunk(&v)
}

/// Map one decoded chunk to a stream event.
///
/// Delta path is `choices[0].delta.content`, with `choices[0].message.content`
/// as the non-streaming fallback some gateways send for the final frame.
fn parse_chunk(v: &Value) -> Option<anyhow::Result<StreamEvent>> {
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let prompt_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let total_tokens = usage["total_tokens"]
            .as_u64()
            .map(|t| t as u32)
            .unwrap_or(prompt_tokens + completion_tokens);
        return Some(Ok(StreamEvent::Usage(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })));
    }

    let choice = &v["choices"][0];
    if let Some(text) = choice["delta"]["content"].as_str() {
        return Some(Ok(StreamEvent::Delta(text.to_string())));
    }
    if let Some(text) = choice["message"]["content"].as_str() {
        return Some(Ok(StreamEvent::Delta(text.to_string())));
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
