// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted mock provider for router and pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::{ChatProvider, InvokeOptions, ProviderId, ResponseStream};
use crate::types::{ModelDescriptor, StreamEvent, TokenUsage};

/// One scripted turn: a reply or an error string.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Error(String),
}

/// Plays back a fixed script, one entry per `invoke` call.  When the script
/// runs out the last entry repeats.
pub struct ScriptedMockProvider {
    id: ProviderId,
    model: ModelDescriptor,
    script: Vec<ScriptedReply>,
    cursor: Arc<AtomicUsize>,
}

impl ScriptedMockProvider {
    pub fn new(id: ProviderId, script: Vec<ScriptedReply>) -> Self {
        let model = crate::catalog::default_model(id).unwrap_or(ModelDescriptor {
            id: "mock".into(),
            name: "Mock".into(),
            context_window: 8192,
            max_output_tokens: 1024,
            input_modalities: vec![crate::types::InputModality::Text],
        });
        Self {
            id,
            model,
            script,
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn replying(id: ProviderId, text: &str) -> Self {
        Self::new(id, vec![ScriptedReply::Text(text.into())])
    }

    pub fn failing(id: ProviderId, error: &str) -> Self {
        Self::new(id, vec![ScriptedReply::Error(error.into())])
    }

    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedMockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model_id(&self) -> &str {
        &self.model.id
    }

    fn resolve_base_url(&self) -> String {
        "mock://".into()
    }

    async fn invoke(&self, prompt: &str, _opts: &InvokeOptions) -> anyhow::Result<ResponseStream> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let entry = self
            .script
            .get(idx)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or(ScriptedReply::Error("empty script".into()));

        match entry {
            ScriptedReply::Error(e) => Err(anyhow::anyhow!(e)),
            ScriptedReply::Text(text) => {
                let usage = TokenUsage::estimate(prompt, &text);
                // Split the reply into two deltas so stream consumers see
                // real chunk boundaries.
                let mut mid = text.len() / 2;
                while !text.is_char_boundary(mid) {
                    mid -= 1;
                }
                let (a, b) = text.split_at(mid);
                let mut events = vec![Ok(StreamEvent::Delta(a.to_string()))];
                if !b.is_empty() {
                    events.push(Ok(StreamEvent::Delta(b.to_string())));
                }
                events.push(Ok(StreamEvent::Usage(usage)));
                events.push(Ok(StreamEvent::Done));
                Ok(Box::pin(futures::stream::iter(events)))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
