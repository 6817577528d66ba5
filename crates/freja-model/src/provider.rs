// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider identities and the uniform adapter capability.
//!
//! Every provider id carries its wire-protocol kind and a blended
//! cost-per-1k-tokens constant.  The router only ever talks to adapters
//! through [`ChatProvider`]; which protocol sits behind it is opaque.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::types::{ModelDescriptor, StreamEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Callback for subprocess progress lines (stdout/stderr of the runtime).
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// How an adapter talks to its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// `POST {base}/chat/completions`, SSE streaming, bearer auth.
    OpenAiCompat,
    /// `POST {base}/v1/messages`, non-streaming.
    Messages,
    /// Internal `v1internal:streamGenerateContent?alt=sse` envelope.
    GenerativeSse,
    /// External runtime binary spawned per prompt.
    Exec,
}

/// The providers freja can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Openai,
    Groq,
    Mistral,
    Deepseek,
    Anthropic,
    Gemini,
    Codex,
}

impl ProviderId {
    pub fn all() -> &'static [ProviderId] {
        &[
            Self::Openai,
            Self::Groq,
            Self::Mistral,
            Self::Deepseek,
            Self::Anthropic,
            Self::Gemini,
            Self::Codex,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Groq => "groq",
            Self::Mistral => "mistral",
            Self::Deepseek => "deepseek",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
        }
    }

    /// Accepts canonical ids and the legacy aliases handled by the config
    /// normalizer.
    pub fn parse(s: &str) -> Option<Self> {
        let canonical = freja_config::known_provider_id(s)?;
        Self::all().iter().copied().find(|p| p.as_str() == canonical)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Openai => "OpenAI",
            Self::Groq => "Groq",
            Self::Mistral => "Mistral",
            Self::Deepseek => "DeepSeek",
            Self::Anthropic => "Anthropic",
            Self::Gemini => "Gemini",
            Self::Codex => "Codex",
        }
    }

    pub fn wire_protocol(&self) -> WireProtocol {
        match self {
            Self::Openai | Self::Groq | Self::Mistral | Self::Deepseek => {
                WireProtocol::OpenAiCompat
            }
            Self::Anthropic => WireProtocol::Messages,
            Self::Gemini => WireProtocol::GenerativeSse,
            Self::Codex => WireProtocol::Exec,
        }
    }

    /// Blended USD price per 1k tokens, used for cost scoring and telemetry
    /// estimates.  The subprocess runtime is billed out of band.
    pub fn price_per_1k_usd(&self) -> f64 {
        match self {
            Self::Openai => 0.010,
            Self::Groq => 0.0008,
            Self::Mistral => 0.006,
            Self::Deepseek => 0.0014,
            Self::Anthropic => 0.012,
            Self::Gemini => 0.008,
            Self::Codex => 0.0,
        }
    }

    /// Baseline answer quality in [0,1] used by the scheduler before any
    /// model boost is applied.
    pub fn base_quality(&self) -> f64 {
        match self {
            Self::Openai => 0.82,
            Self::Groq => 0.66,
            Self::Mistral => 0.74,
            Self::Deepseek => 0.70,
            Self::Anthropic => 0.88,
            Self::Gemini => 0.85,
            Self::Codex => 0.80,
        }
    }

    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("OPENAI_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::Deepseek => Some("DEEPSEEK_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Codex => None,
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("https://api.openai.com/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Mistral => Some("https://api.mistral.ai/v1"),
            Self::Deepseek => Some("https://api.deepseek.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::Gemini => Some(crate::generative::USER_ENDPOINT),
            Self::Codex => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved credential for one provider.
///
/// Only valid at the moment of resolution; callers re-resolve per request
/// rather than caching handles across prompts.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub api_key: Option<String>,
    /// Base-URL override (`FREJA_<PROVIDER>_BASE_URL`).
    pub base_url: Option<String>,
}

impl Credential {
    /// Resolve from the environment.  Returns `None` when the provider has a
    /// mandatory key that is absent; such providers are dropped from the
    /// candidate list.
    pub fn resolve(id: ProviderId) -> Option<Self> {
        let base_url = std::env::var(format!(
            "FREJA_{}_BASE_URL",
            id.as_str().to_ascii_uppercase()
        ))
        .ok();
        match id.api_key_env() {
            Some(env) => {
                let api_key = std::env::var(env).ok().filter(|k| !k.trim().is_empty())?;
                Some(Self {
                    api_key: Some(api_key),
                    base_url,
                })
            }
            // Key-less providers: the subprocess runtime resolves only when
            // its binary is actually on PATH.
            None => {
                if id == ProviderId::Codex && !crate::ExecRuntimeProvider::runtime_available() {
                    return None;
                }
                Some(Self {
                    api_key: None,
                    base_url,
                })
            }
        }
    }
}

/// Adapter invocation knobs.
#[derive(Clone, Default)]
pub struct InvokeOptions {
    /// Upper bound on requested output tokens; the adapter sends
    /// `min(model_max, cap)`.
    pub max_tokens_cap: Option<u32>,
    /// Receives raw progress lines from subprocess adapters.
    pub progress: Option<ProgressFn>,
}

impl InvokeOptions {
    pub fn with_cap(cap: u32) -> Self {
        Self {
            max_tokens_cap: Some(cap),
            ..Self::default()
        }
    }

    pub(crate) fn effective_max_tokens(&self, model_max: u32) -> u32 {
        let model_max = if model_max == 0 { 4096 } else { model_max };
        match self.max_tokens_cap {
            Some(cap) => model_max.min(cap),
            None => model_max,
        }
    }
}

/// Uniform adapter capability: list models, invoke, resolve endpoint.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Model identifier forwarded on the wire.
    fn model_id(&self) -> &str;

    /// Human-readable model name for the activity line.
    fn model_name(&self) -> String {
        crate::catalog::lookup(self.id(), self.model_id())
            .map(|m| m.name)
            .unwrap_or_else(|| self.model_id().to_string())
    }

    /// The endpoint this adapter will talk to, deterministic per credential.
    fn resolve_base_url(&self) -> String;

    /// List models available from this provider.  The default returns the
    /// static catalog entries; override to query a live endpoint.
    async fn list_models(&self) -> anyhow::Result<Vec<ModelDescriptor>> {
        Ok(crate::catalog::provider_models(self.id()))
    }

    /// Send one prompt and stream the answer.
    async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> anyhow::Result<ResponseStream>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
