// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Input kinds a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

/// One model as advertised by a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier forwarded on the wire.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub input_modalities: Vec<InputModality>,
}

impl ModelDescriptor {
    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

/// Token accounting for one completed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Length-based fallback when the server does not report usage:
    /// ⌈len/4⌉ per side, total = sum.
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = approx_tokens(prompt);
        let completion_tokens = approx_tokens(completion);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// ⌈len/4⌉, the 4-chars-per-token heuristic.
pub fn approx_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

/// A single streamed event from an adapter.
///
/// `Usage` is reported at most once, always after the last `Delta`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text delta in arrival order.
    Delta(String),
    /// Final token statistics.
    Usage(TokenUsage),
    /// The stream finished normally.
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
