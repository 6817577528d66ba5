// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static model catalog.
//!
//! Backs `list_models` for providers without a live listing endpoint and
//! supplies context-window / output caps for the ones that have one.  The
//! Gemini section also carries the proxied Claude entries served through the
//! internal generative endpoint, including their `-thinking` variants.

use crate::provider::ProviderId;
use crate::types::{InputModality, ModelDescriptor};

fn entry(
    provider: ProviderId,
    id: &str,
    name: &str,
    context_window: u32,
    max_output_tokens: u32,
    image: bool,
) -> (ProviderId, ModelDescriptor) {
    let mut input_modalities = vec![InputModality::Text];
    if image {
        input_modalities.push(InputModality::Image);
    }
    (
        provider,
        ModelDescriptor {
            id: id.into(),
            name: name.into(),
            context_window,
            max_output_tokens,
            input_modalities,
        },
    )
}

/// The full catalog, provider-tagged.
pub fn static_catalog() -> Vec<(ProviderId, ModelDescriptor)> {
    use ProviderId::*;
    vec![
        // ── OpenAI ────────────────────────────────────────────────────────────
        entry(Openai, "gpt-4o", "GPT-4o", 128_000, 16_384, true),
        entry(Openai, "gpt-4o-mini", "GPT-4o mini", 128_000, 16_384, true),
        entry(Openai, "o4-mini", "o4-mini", 200_000, 100_000, false),
        // ── Groq ──────────────────────────────────────────────────────────────
        entry(Groq, "llama-3.3-70b-versatile", "Llama 3.3 70B", 131_072, 32_768, false),
        entry(Groq, "llama-3.1-8b-instant", "Llama 3.1 8B Instant", 131_072, 8_192, false),
        // ── Mistral ───────────────────────────────────────────────────────────
        entry(Mistral, "mistral-large-latest", "Mistral Large", 131_072, 32_768, false),
        entry(Mistral, "mistral-small-latest", "Mistral Small", 32_768, 8_192, false),
        entry(Mistral, "pixtral-large-latest", "Pixtral Large", 131_072, 8_192, true),
        // ── DeepSeek ──────────────────────────────────────────────────────────
        entry(Deepseek, "deepseek-chat", "DeepSeek Chat", 65_536, 8_192, false),
        entry(Deepseek, "deepseek-reasoner", "DeepSeek Reasoner", 65_536, 32_768, false),
        // ── Anthropic ─────────────────────────────────────────────────────────
        entry(Anthropic, "claude-sonnet-4-5", "Claude Sonnet 4.5", 200_000, 64_000, true),
        entry(Anthropic, "claude-haiku-4-5", "Claude Haiku 4.5", 200_000, 32_000, true),
        // ── Gemini (internal generative endpoint, incl. proxied Claude) ───────
        entry(Gemini, "gemini-3-pro", "Gemini 3 Pro", 1_048_576, 65_536, true),
        entry(Gemini, "gemini-3-flash", "Gemini 3 Flash", 1_048_576, 65_536, true),
        entry(Gemini, "claude-sonnet-4-5", "Claude Sonnet 4.5 (proxied)", 200_000, 64_000, false),
        entry(
            Gemini,
            "claude-sonnet-4-5-thinking",
            "Claude Sonnet 4.5 Thinking (proxied)",
            200_000,
            64_000,
            false,
        ),
        // ── Codex runtime ─────────────────────────────────────────────────────
        entry(Codex, "gpt-5-codex", "GPT-5 Codex", 272_000, 128_000, false),
        entry(Codex, "gpt-5-codex-mini", "GPT-5 Codex mini", 272_000, 64_000, false),
    ]
}

/// All catalog models for one provider, in catalog order.
pub fn provider_models(provider: ProviderId) -> Vec<ModelDescriptor> {
    static_catalog()
        .into_iter()
        .filter(|(p, _)| *p == provider)
        .map(|(_, m)| m)
        .collect()
}

/// Look up a model by provider + id.
pub fn lookup(provider: ProviderId, model_id: &str) -> Option<ModelDescriptor> {
    static_catalog()
        .into_iter()
        .find(|(p, m)| *p == provider && m.id == model_id)
        .map(|(_, m)| m)
}

/// The provider's first catalog entry, i.e. its default model.
pub fn default_model(provider: ProviderId) -> Option<ModelDescriptor> {
    provider_models(provider).into_iter().next()
}

/// Resolve a loosely-written model reference ("haiku", "Claude 3 Haiku")
/// against one provider's catalog: exact id first, then case-insensitive
/// name/id substring.
pub fn fuzzy_lookup(provider: ProviderId, reference: &str) -> Option<ModelDescriptor> {
    let models = provider_models(provider);
    if let Some(m) = models.iter().find(|m| m.id == reference) {
        return Some(m.clone());
    }
    let needle = reference.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }
    models
        .iter()
        .find(|m| {
            m.id.to_ascii_lowercase().contains(&needle)
                || m.name.to_ascii_lowercase().contains(&needle)
                || needle.contains(&m.id.to_ascii_lowercase())
        })
        .cloned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_has_at_least_one_model() {
        for p in ProviderId::all() {
            assert!(
                !provider_models(*p).is_empty(),
                "provider {p} has no catalog entries"
            );
        }
    }

    #[test]
    fn lookup_finds_exact_entry() {
        let m = lookup(ProviderId::Openai, "gpt-4o").unwrap();
        assert_eq!(m.name, "GPT-4o");
        assert_eq!(m.context_window, 128_000);
    }

    #[test]
    fn lookup_is_provider_scoped() {
        // claude-sonnet-4-5 exists under both anthropic and gemini; the
        // gemini copy is the proxied one.
        let a = lookup(ProviderId::Anthropic, "claude-sonnet-4-5").unwrap();
        let g = lookup(ProviderId::Gemini, "claude-sonnet-4-5").unwrap();
        assert!(a.supports_images());
        assert!(!g.supports_images());
    }

    #[test]
    fn default_model_is_first_catalog_entry() {
        assert_eq!(default_model(ProviderId::Deepseek).unwrap().id, "deepseek-chat");
    }

    #[test]
    fn fuzzy_lookup_matches_display_name_substring() {
        let m = fuzzy_lookup(ProviderId::Anthropic, "haiku").unwrap();
        assert_eq!(m.id, "claude-haiku-4-5");
    }

    #[test]
    fn fuzzy_lookup_prefers_exact_id() {
        let m = fuzzy_lookup(ProviderId::Gemini, "claude-sonnet-4-5-thinking").unwrap();
        assert_eq!(m.id, "claude-sonnet-4-5-thinking");
    }

    #[test]
    fn fuzzy_lookup_empty_reference_is_none() {
        assert!(fuzzy_lookup(ProviderId::Openai, "  ").is_none());
    }

    #[test]
    fn thinking_variant_present_for_proxied_claude() {
        assert!(lookup(ProviderId::Gemini, "claude-sonnet-4-5-thinking").is_some());
    }
}
