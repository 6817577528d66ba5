// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider routing and failover.
//!
//! One [`Router::route`] call builds a candidate list (auto-order table,
//! overrides, credential resolution), demotes cooling providers to the
//! tail, lets the scheduler reorder, then walks the list until a candidate
//! streams a non-empty answer.
//!
//! Cooldown is an ordering hint, never an admission gate: a cooling
//! provider still runs when it is the only (or the locked) choice, and a
//! global outage never makes the router refuse all traffic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::bail;
use chrono::Utc;
use tracing::{debug, warn};

use freja_config::{ProviderRouteMode, RouterConfig, SchedulerConfig, Store};
use freja_model::{
    adapter_for, catalog, ChatProvider, Credential, InvokeOptions, ModelDescriptor, ProviderId,
    StreamEvent, TokenUsage,
};
use freja_scheduler::ScoredCandidate;

use crate::events::{send, ActionEvent, EventSender};

/// How long a failed provider stays demoted.
const COOLDOWN_MS: i64 = 2 * 60 * 1000;

/// Default substrings that mark an error as fallback-worthy.  Kept as data
/// so deployments can extend the table without a code change.
pub fn default_fallback_patterns() -> Vec<String> {
    [
        "rate limit",
        "quota",
        "context length",
        "429",
        "overloaded",
        "temporarily unavailable",
        "model not available",
        "capacity",
        "insufficient balance",
        "503",
        "529",
        "empty response",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A (provider, model, credential) triple able to handle one prompt.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub provider: ProviderId,
    pub model: ModelDescriptor,
    pub credential: Credential,
}

impl ScoredCandidate for RouteCandidate {
    fn provider(&self) -> ProviderId {
        self.provider
    }
    fn model_name(&self) -> &str {
        &self.model.name
    }
}

/// Result of a successful route.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub text: String,
    pub provider: ProviderId,
    pub model_id: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

/// Builds adapters for candidates.  Swapped for a scripted factory in tests.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, candidate: &RouteCandidate) -> anyhow::Result<Box<dyn ChatProvider>>;
}

/// Production factory backed by the wire-protocol adapters.
pub struct LiveAdapters;

impl AdapterFactory for LiveAdapters {
    fn build(&self, candidate: &RouteCandidate) -> anyhow::Result<Box<dyn ChatProvider>> {
        adapter_for(candidate.provider, candidate.model.clone(), &candidate.credential)
    }
}

type CredentialResolver = Box<dyn Fn(ProviderId) -> Option<Credential> + Send + Sync>;

pub struct Router {
    store: Store,
    factory: Box<dyn AdapterFactory>,
    resolver: CredentialResolver,
    fallback_patterns: Vec<String>,
    /// provider → unix ms until which it is demoted; writer wins.
    cooldown_until: Mutex<HashMap<ProviderId, i64>>,
}

impl Router {
    pub fn new(store: Store) -> Self {
        Self::with_factory(store, Box::new(LiveAdapters), Box::new(Credential::resolve))
    }

    pub fn with_factory(
        store: Store,
        factory: Box<dyn AdapterFactory>,
        resolver: CredentialResolver,
    ) -> Self {
        Self {
            store,
            factory,
            resolver,
            fallback_patterns: default_fallback_patterns(),
            cooldown_until: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_fallback_patterns(&mut self, patterns: Vec<String>) {
        self.fallback_patterns = patterns;
    }

    // ── Candidate construction ────────────────────────────────────────────────

    /// Domain-keyword provider priority table.
    fn auto_order(prompt: &str) -> Vec<ProviderId> {
        use ProviderId::*;
        let p = prompt.to_ascii_lowercase();
        // "ui"/"ux" must match whole words; as substrings they hit "build",
        // "guide", "flux" and misroute ordinary prompts.
        let word = |w: &str| {
            p.split_whitespace()
                .any(|t| t.trim_matches(|c: char| !c.is_alphanumeric()) == w)
        };
        let design = ["design", "layout", "mockup", "wireframe"];
        let research = ["research", "compare", "investigate", "benchmark", "analyze", "analyse"];
        let coding = ["code", "refactor", "implement", "debug", "compile", "function", "bug"];

        if design.iter().any(|k| p.contains(k)) || word("ui") || word("ux") {
            vec![Gemini, Deepseek, Mistral, Openai, Anthropic, Groq]
        } else if research.iter().any(|k| p.contains(k)) {
            vec![Openai, Mistral, Anthropic, Gemini, Deepseek, Groq]
        } else if coding.iter().any(|k| p.contains(k)) {
            vec![Codex, Deepseek, Mistral, Openai, Anthropic, Groq]
        } else {
            vec![Openai, Anthropic, Gemini, Mistral, Deepseek, Groq]
        }
    }

    /// Provider order after applying override / default-provider pinning.
    fn provider_order(prompt: &str, cfg: &RouterConfig) -> Vec<ProviderId> {
        let ov = &cfg.selected_override;
        if ov.enabled {
            if let Some(p) = ov.provider.as_deref().and_then(ProviderId::parse) {
                return vec![p];
            }
        }
        if cfg.default_provider != "auto" {
            if let Some(p) = ProviderId::parse(&cfg.default_provider) {
                return vec![p];
            }
        }
        Self::auto_order(prompt)
    }

    /// True when no pin is active and failures should always fall through.
    fn auto_routing_active(cfg: &RouterConfig) -> bool {
        !cfg.selected_override.enabled && cfg.default_provider == "auto"
    }

    /// Pick the model for a provider: override pin, per-provider fixed
    /// model, then the catalog default.
    fn model_for(provider: ProviderId, cfg: &RouterConfig) -> Option<ModelDescriptor> {
        let ov = &cfg.selected_override;
        if ov.enabled
            && ov.provider.as_deref().and_then(ProviderId::parse) == Some(provider)
            && ov.mode == ProviderRouteMode::Fixed
        {
            if let Some(id) = &ov.fixed_model_id {
                if let Some(m) = catalog::fuzzy_lookup(provider, id) {
                    return Some(m);
                }
            }
        }
        if let Some(pc) = cfg.providers.get(provider.as_str()) {
            if pc.mode == ProviderRouteMode::Fixed {
                if let Some(id) = &pc.fixed_model_id {
                    if let Some(m) = catalog::fuzzy_lookup(provider, id) {
                        return Some(m);
                    }
                }
            }
        }
        catalog::default_model(provider)
    }

    /// Resolve the provider order into concrete candidates, dropping entries
    /// without credentials or models.
    pub fn build_candidates(&self, prompt: &str, cfg: &RouterConfig) -> Vec<RouteCandidate> {
        Self::provider_order(prompt, cfg)
            .into_iter()
            .filter_map(|provider| {
                let credential = (self.resolver)(provider)?;
                let model = Self::model_for(provider, cfg)?;
                Some(RouteCandidate {
                    provider,
                    model,
                    credential,
                })
            })
            .collect()
    }

    // ── Cooldowns ─────────────────────────────────────────────────────────────

    fn mark_cooldown(&self, provider: ProviderId) {
        let until = Utc::now().timestamp_millis() + COOLDOWN_MS;
        self.cooldown_until.lock().unwrap().insert(provider, until);
    }

    fn clear_cooldown(&self, provider: ProviderId) {
        self.cooldown_until.lock().unwrap().remove(&provider);
    }

    fn is_cooling(&self, provider: ProviderId) -> bool {
        let now = Utc::now().timestamp_millis();
        self.cooldown_until
            .lock()
            .unwrap()
            .get(&provider)
            .map(|until| *until > now)
            .unwrap_or(false)
    }

    /// Move cooling providers to the tail, preserving relative order in both
    /// partitions.
    fn demote_cooling(&self, candidates: Vec<RouteCandidate>) -> Vec<RouteCandidate> {
        let (cooling, active): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| self.is_cooling(c.provider));
        active.into_iter().chain(cooling).collect()
    }

    // ── Error classification ──────────────────────────────────────────────────

    fn is_fallback_worthy(&self, message: &str) -> bool {
        let m = message.to_ascii_lowercase();
        self.fallback_patterns.iter().any(|p| m.contains(p.as_str()))
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Route one prompt.  Deltas and activity lines flow through `events`;
    /// the accumulated outcome is returned.
    pub async fn route(
        &self,
        prompt: &str,
        router_cfg: &RouterConfig,
        sched_cfg: &SchedulerConfig,
        opts: &InvokeOptions,
        events: &EventSender,
    ) -> anyhow::Result<RouteOutcome> {
        let candidates = self.build_candidates(prompt, router_cfg);
        if candidates.is_empty() {
            bail!("No authenticated provider");
        }

        let candidates = self.demote_cooling(candidates);
        let candidates = freja_scheduler::reorder(candidates, prompt, sched_cfg);
        let auto = Self::auto_routing_active(router_cfg);
        let total = candidates.len();

        let mut last_error: Option<anyhow::Error> = None;

        for candidate in candidates {
            let provider = candidate.provider;
            let actor = format!(
                "{}: {}",
                provider.display_name(),
                candidate.model.name
            );
            send(events, ActionEvent::Activity(actor));

            let started = Instant::now();
            match self.try_candidate(&candidate, prompt, opts, events).await {
                Ok((text, usage)) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let usage = usage.unwrap_or_else(|| TokenUsage::estimate(prompt, &text));
                    freja_scheduler::record(
                        &self.store,
                        provider,
                        &candidate.model.id,
                        &usage,
                        latency_ms,
                        true,
                    );
                    self.clear_cooldown(provider);

                    let mut cfg = self.store.load_router_config();
                    cfg.last_used.provider = Some(provider.as_str().to_string());
                    cfg.last_used.model_id = Some(candidate.model.id.clone());
                    if let Err(e) = self.store.save_router_config(&cfg) {
                        warn!(error = %e, "failed to persist last_used");
                    }

                    send(events, ActionEvent::Done);
                    return Ok(RouteOutcome {
                        text,
                        provider,
                        model_id: candidate.model.id,
                        usage,
                        latency_ms,
                    });
                }
                Err(e) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    freja_scheduler::record(
                        &self.store,
                        provider,
                        &candidate.model.id,
                        &TokenUsage::estimate(prompt, ""),
                        latency_ms,
                        false,
                    );
                    let msg = e.to_string();
                    let fall_through = self.is_fallback_worthy(&msg) || auto;
                    debug!(provider = %provider, fall_through, error = %msg, "candidate failed");
                    if fall_through && total > 1 {
                        self.mark_cooldown(provider);
                        last_error = Some(e);
                        continue;
                    }
                    if fall_through {
                        self.mark_cooldown(provider);
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("all providers failed")))
    }

    /// Drive one adapter stream to completion, forwarding deltas.
    async fn try_candidate(
        &self,
        candidate: &RouteCandidate,
        prompt: &str,
        opts: &InvokeOptions,
        events: &EventSender,
    ) -> anyhow::Result<(String, Option<TokenUsage>)> {
        use futures::StreamExt;

        let adapter = self.factory.build(candidate)?;
        let mut stream = adapter.invoke(prompt, opts).await?;

        let mut text = String::new();
        let mut usage: Option<TokenUsage> = None;
        let mut first_visible = true;

        while let Some(ev) = stream.next().await {
            match ev? {
                StreamEvent::Delta(mut d) => {
                    // Trim leading whitespace on the first visible chunk only.
                    if first_visible {
                        d = d.trim_start().to_string();
                        if d.is_empty() {
                            continue;
                        }
                        first_visible = false;
                    }
                    text.push_str(&d);
                    send(events, ActionEvent::Delta(d));
                }
                StreamEvent::Usage(u) => usage = Some(u),
                StreamEvent::Done => break,
            }
        }

        if text.trim().is_empty() {
            bail!("{} returned an empty response", candidate.provider);
        }
        Ok((text, usage))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
