// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Candidate scoring and reordering.
//!
//! The router hands over its candidate list; this module reorders it to
//! minimize expected cost subject to the configured quality target and an
//! optional per-task budget.  The budget affects ordering only: an
//! over-budget candidate is still eligible, it just sorts last.

use freja_config::{QualityTarget, SchedulerConfig};
use freja_model::ProviderId;

/// Reference cost (USD) that maps to a normalized cost of 1.0.
///
/// Chosen so a typical short prompt spreads the per-provider price range
/// across (0, 1) instead of collapsing near either clamp bound; with a
/// larger reference the quality term dominates every ordering decision.
const COST_REFERENCE_USD: f64 = 0.008;

/// What the scheduler needs to know about a candidate.  The router's
/// candidate type implements this so the two crates stay decoupled.
pub trait ScoredCandidate {
    fn provider(&self) -> ProviderId;
    fn model_name(&self) -> &str;
}

/// Prompt complexity in [0,1], a weighted sum of signal flags.
pub fn complexity(prompt: &str) -> f64 {
    let p = prompt.to_ascii_lowercase();
    let mut c: f64 = 0.25;
    if contains_any(&p, &["debug", "security", "architecture"]) {
        c += 0.2;
    }
    if contains_any(&p, &["system", "deploy", "incident"]) {
        c += 0.2;
    }
    if contains_any(&p, &["research", "benchmark"]) {
        c += 0.15;
    }
    if prompt.len() > 500 {
        c += 0.1;
    }
    if contains_any(&p, &["image", "vision", "video"]) {
        c += 0.1;
    }
    c.clamp(0.0, 1.0)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// `max(120, ⌈len/4⌉ · 1.4)`, the working token estimate for one task.
pub fn estimated_tokens(prompt: &str) -> f64 {
    let base = (prompt.len() as f64 / 4.0).ceil() * 1.4;
    base.max(120.0)
}

/// Expected USD cost of running `prompt` on `provider`.
pub fn estimated_task_cost(provider: ProviderId, prompt: &str) -> f64 {
    estimated_tokens(prompt) / 1000.0 * provider.price_per_1k_usd()
}

fn normalized_cost(provider: ProviderId, prompt: &str) -> f64 {
    (estimated_task_cost(provider, prompt) / COST_REFERENCE_USD).clamp(0.00125, 1.0)
}

/// Quality boost/penalty derived from the model name tier.
fn model_boost(model_name: &str) -> f64 {
    let n = model_name.to_ascii_lowercase();
    if contains_any(&n, &["opus", "pro", "large", "reasoner", "thinking"]) {
        0.06
    } else if contains_any(&n, &["mini", "flash", "haiku", "small", "instant", "8b"]) {
        -0.08
    } else {
        0.0
    }
}

fn effective_quality(provider: ProviderId, model_name: &str, complexity: f64) -> f64 {
    let penalty = 0.12 * (complexity - 0.6).max(0.0);
    (provider.base_quality() + model_boost(model_name) - penalty).clamp(0.0, 1.0)
}

fn weights(target: QualityTarget) -> (f64, f64) {
    match target {
        QualityTarget::Economy => (0.72, 0.28),
        QualityTarget::Balanced => (0.5, 0.5),
        QualityTarget::High => (0.25, 0.75),
    }
}

/// Lower is better.
pub fn score(provider: ProviderId, model_name: &str, prompt: &str, cfg: &SchedulerConfig) -> f64 {
    let (cost_w, quality_w) = weights(cfg.quality_target);
    let c = complexity(prompt);
    cost_w * normalized_cost(provider, prompt)
        + quality_w * (1.0 - effective_quality(provider, model_name, c))
}

/// Reorder candidates by score.
///
/// - identity when the scheduler is disabled
/// - in-budget candidates sort before out-of-budget ones
/// - the sort is stable, so equal scores keep their original order
/// - the output always has exactly the input's length
pub fn reorder<T: ScoredCandidate>(
    mut candidates: Vec<T>,
    prompt: &str,
    cfg: &SchedulerConfig,
) -> Vec<T> {
    if !cfg.enabled || candidates.len() < 2 {
        return candidates;
    }

    let keys: Vec<(bool, f64)> = candidates
        .iter()
        .map(|c| {
            let over_budget = match cfg.max_usd_per_task {
                Some(budget) => estimated_task_cost(c.provider(), prompt) > budget,
                None => false,
            };
            (over_budget, score(c.provider(), c.model_name(), prompt, cfg))
        })
        .collect();

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        keys[a]
            .0
            .cmp(&keys[b].0)
            .then(keys[a].1.partial_cmp(&keys[b].1).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut slots: Vec<Option<T>> = candidates.drain(..).map(Some).collect();
    order
        .into_iter()
        .map(|i| slots[i].take().unwrap_or_else(|| unreachable!()))
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Cand(ProviderId, &'static str);

    impl ScoredCandidate for Cand {
        fn provider(&self) -> ProviderId {
            self.0
        }
        fn model_name(&self) -> &str {
            self.1
        }
    }

    fn cfg(target: QualityTarget) -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            quality_target: target,
            max_usd_per_task: None,
        }
    }

    // ── Complexity ────────────────────────────────────────────────────────────

    #[test]
    fn complexity_base_is_quarter() {
        assert!((complexity("hello") - 0.25).abs() < 1e-9);
    }

    #[test]
    fn complexity_accumulates_signals() {
        let c = complexity("debug the deploy incident research benchmark");
        // 0.25 + 0.2 + 0.2 + 0.15
        assert!((c - 0.8).abs() < 1e-9);
    }

    #[test]
    fn complexity_long_prompt_adds_tenth() {
        let long = "x".repeat(501);
        assert!((complexity(&long) - 0.35).abs() < 1e-9);
    }

    #[test]
    fn complexity_is_clamped_to_one() {
        let p = format!("debug security system deploy research vision {}", "y".repeat(600));
        assert!(complexity(&p) <= 1.0);
    }

    // ── Token estimation ──────────────────────────────────────────────────────

    #[test]
    fn estimated_tokens_has_floor() {
        assert_eq!(estimated_tokens(""), 120.0);
        assert_eq!(estimated_tokens("hi"), 120.0);
    }

    #[test]
    fn estimated_tokens_scales_with_length() {
        // 4000 chars → 1000 tokens → 1400 with headroom.
        let p = "z".repeat(4000);
        assert!((estimated_tokens(&p) - 1400.0).abs() < 1e-9);
    }

    // ── Reordering ────────────────────────────────────────────────────────────

    #[test]
    fn disabled_scheduler_is_identity() {
        let cands = vec![
            Cand(ProviderId::Anthropic, "Claude Sonnet 4.5"),
            Cand(ProviderId::Groq, "Llama 3.3 70B"),
        ];
        let mut off = cfg(QualityTarget::High);
        off.enabled = false;
        let out = reorder(cands.clone(), "p", &off);
        assert_eq!(out, cands);
    }

    #[test]
    fn reorder_preserves_length() {
        let cands: Vec<Cand> = ProviderId::all()
            .iter()
            .map(|p| Cand(*p, "m"))
            .collect();
        let n = cands.len();
        assert_eq!(reorder(cands, "prompt", &cfg(QualityTarget::Balanced)).len(), n);
    }

    #[test]
    fn economy_prefers_the_cheap_candidate() {
        let cands = vec![
            Cand(ProviderId::Anthropic, "Claude Sonnet 4.5"), // premium
            Cand(ProviderId::Groq, "Llama 3.3 70B"),          // cheap
        ];
        let out = reorder(cands, "summarize this text", &cfg(QualityTarget::Economy));
        assert_eq!(out[0].0, ProviderId::Groq);
    }

    #[test]
    fn high_quality_prefers_the_premium_candidate() {
        let cands = vec![
            Cand(ProviderId::Groq, "Llama 3.3 70B"),
            Cand(ProviderId::Anthropic, "Claude Sonnet 4.5"),
        ];
        let out = reorder(cands, "summarize this text", &cfg(QualityTarget::High));
        assert_eq!(out[0].0, ProviderId::Anthropic);
    }

    #[test]
    fn equal_scores_keep_original_order() {
        // Same provider + same model name → identical scores; the stable
        // sort must not swap them.
        let cands = vec![
            Cand(ProviderId::Mistral, "Mistral Large"),
            Cand(ProviderId::Mistral, "Mistral Large"),
        ];
        let out = reorder(cands.clone(), "p", &cfg(QualityTarget::Balanced));
        assert_eq!(out, cands);
    }

    #[test]
    fn in_budget_candidates_sort_before_over_budget() {
        // A long prompt makes the premium provider blow the budget while
        // groq stays within it: 20k chars ≈ 7000 tokens → anthropic ≈ $0.084,
        // groq ≈ $0.0056.
        let long = "q".repeat(20_000);
        let mut c = cfg(QualityTarget::High);
        c.max_usd_per_task = Some(0.01);
        let cands = vec![
            Cand(ProviderId::Anthropic, "Claude Sonnet 4.5"),
            Cand(ProviderId::Groq, "Llama 3.3 70B"),
        ];
        let out = reorder(cands, &long, &c);
        // Even at quality=high, the only in-budget candidate leads.
        assert_eq!(out[0].0, ProviderId::Groq);
    }

    #[test]
    fn budget_never_removes_candidates() {
        let mut c = cfg(QualityTarget::Balanced);
        c.max_usd_per_task = Some(1e-12); // nothing fits
        let cands = vec![
            Cand(ProviderId::Openai, "GPT-4o"),
            Cand(ProviderId::Anthropic, "Claude Sonnet 4.5"),
        ];
        assert_eq!(reorder(cands, "p", &c).len(), 2);
    }

    #[test]
    fn model_boost_rewards_top_tier_and_penalizes_small() {
        assert!(model_boost("Claude Opus 4.5") > 0.0);
        assert!(model_boost("GPT-4o mini") < 0.0);
        assert_eq!(model_boost("GPT-4o"), 0.0);
    }

    #[test]
    fn high_complexity_erodes_effective_quality() {
        let easy = effective_quality(ProviderId::Openai, "GPT-4o", 0.3);
        let hard = effective_quality(ProviderId::Openai, "GPT-4o", 1.0);
        assert!(hard < easy);
    }

    #[test]
    fn normalized_cost_stays_in_bounds() {
        let giant = "g".repeat(2_000_000);
        for p in ProviderId::all() {
            let n = normalized_cost(*p, &giant);
            assert!((0.00125..=1.0).contains(&n), "{p}: {n}");
            let n = normalized_cost(*p, "");
            assert!((0.00125..=1.0).contains(&n), "{p}: {n}");
        }
    }
}
