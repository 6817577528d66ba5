// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only call telemetry and the rolling leaderboard.
//!
//! One JSON record per completed (or failed) provider call, appended to
//! `scheduler-telemetry.jsonl`.  Readers only ever tail the file; nothing is
//! rewritten in place.

use chrono::{DateTime, Utc};
use freja_config::Store;
use freja_model::{ProviderId, TokenUsage};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many trailing records the leaderboard considers.
const LEADERBOARD_WINDOW: usize = 400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEntry {
    pub at: DateTime<Utc>,
    pub provider: ProviderId,
    pub model_id: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub est_usd_cost: f64,
    pub latency_ms: u64,
    pub success: bool,
}

/// `usage.total / 1000 · price_per_1k`, rounded to 6 decimals.
pub fn estimate_cost(provider: ProviderId, usage: &TokenUsage) -> f64 {
    let raw = usage.total_tokens as f64 / 1000.0 * provider.price_per_1k_usd();
    (raw * 1e6).round() / 1e6
}

/// Append one record.  Telemetry is best-effort: failures are logged, never
/// propagated into the router path.
pub fn record(
    store: &Store,
    provider: ProviderId,
    model_id: &str,
    usage: &TokenUsage,
    latency_ms: u64,
    success: bool,
) {
    let entry = TelemetryEntry {
        at: Utc::now(),
        provider,
        model_id: model_id.to_string(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        est_usd_cost: estimate_cost(provider, usage),
        latency_ms,
        success,
    };
    let line = match serde_json::to_string(&entry) {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, "failed to serialize telemetry entry");
            return;
        }
    };
    if let Err(e) = store.append_line(&store.telemetry_path(), &line) {
        warn!(error = %e, "failed to append telemetry");
    }
}

/// Read the last `n` telemetry records, oldest first.
pub fn tail(store: &Store, n: usize) -> Vec<TelemetryEntry> {
    store
        .tail_lines(&store.telemetry_path(), n)
        .iter()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// One leaderboard row, keyed `provider:model`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub key: String,
    pub runs: usize,
    pub success_rate: f64,
    pub avg_cost: f64,
    pub avg_latency_ms: f64,
}

/// Group the trailing window by `provider:model` and rank by success rate
/// (desc), then average cost (asc).
pub fn leaderboard(store: &Store, limit: usize) -> Vec<LeaderboardRow> {
    let entries = tail(store, LEADERBOARD_WINDOW);
    let mut rows: Vec<LeaderboardRow> = Vec::new();

    for e in &entries {
        let key = format!("{}:{}", e.provider, e.model_id);
        match rows.iter_mut().find(|r| r.key == key) {
            Some(row) => {
                let n = row.runs as f64;
                row.success_rate = (row.success_rate * n + if e.success { 1.0 } else { 0.0 })
                    / (n + 1.0);
                row.avg_cost = (row.avg_cost * n + e.est_usd_cost) / (n + 1.0);
                row.avg_latency_ms = (row.avg_latency_ms * n + e.latency_ms as f64) / (n + 1.0);
                row.runs += 1;
            }
            None => rows.push(LeaderboardRow {
                key,
                runs: 1,
                success_rate: if e.success { 1.0 } else { 0.0 },
                avg_cost: e.est_usd_cost,
                avg_latency_ms: e.latency_ms as f64,
            }),
        }
    }

    rows.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.avg_cost
                    .partial_cmp(&b.avg_cost)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    rows.truncate(limit);
    rows
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(total: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at(dir.path());
        (dir, store)
    }

    #[test]
    fn estimate_cost_uses_per_1k_price() {
        // 2000 tokens of openai at 0.010/1k = 0.02
        let c = estimate_cost(ProviderId::Openai, &usage(2000));
        assert!((c - 0.02).abs() < 1e-9);
    }

    #[test]
    fn estimate_cost_rounds_to_six_decimals() {
        let c = estimate_cost(ProviderId::Groq, &usage(333));
        assert_eq!(c, (333.0 / 1000.0 * 0.0008 * 1e6).round() / 1e6);
        let s = format!("{c}");
        let decimals = s.split('.').nth(1).map(|d| d.len()).unwrap_or(0);
        assert!(decimals <= 6, "cost {s} has more than 6 decimals");
    }

    #[test]
    fn record_then_tail_round_trips() {
        let (_d, store) = temp_store();
        record(&store, ProviderId::Mistral, "mistral-small-latest", &usage(100), 250, true);
        let entries = tail(&store, 10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].provider, ProviderId::Mistral);
        assert_eq!(entries[0].total_tokens, 100);
        assert!(entries[0].success);
    }

    #[test]
    fn single_record_leaderboard_law() {
        let (_d, store) = temp_store();
        record(&store, ProviderId::Deepseek, "deepseek-chat", &usage(50), 100, true);
        let rows = leaderboard(&store, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "deepseek:deepseek-chat");
        assert_eq!(rows[0].runs, 1);
        assert_eq!(rows[0].success_rate, 1.0);
    }

    #[test]
    fn single_failed_record_has_zero_success_rate() {
        let (_d, store) = temp_store();
        record(&store, ProviderId::Groq, "llama-3.1-8b-instant", &usage(10), 50, false);
        let rows = leaderboard(&store, 10);
        assert_eq!(rows[0].success_rate, 0.0);
    }

    #[test]
    fn leaderboard_ranks_by_success_then_cost() {
        let (_d, store) = temp_store();
        // groq: 100% success, cheap
        record(&store, ProviderId::Groq, "llama-3.3-70b-versatile", &usage(100), 80, true);
        // openai: 100% success, expensive
        record(&store, ProviderId::Openai, "gpt-4o", &usage(100), 300, true);
        // anthropic: 50% success
        record(&store, ProviderId::Anthropic, "claude-sonnet-4-5", &usage(100), 200, true);
        record(&store, ProviderId::Anthropic, "claude-sonnet-4-5", &usage(100), 200, false);

        let rows = leaderboard(&store, 10);
        assert_eq!(rows[0].key, "groq:llama-3.3-70b-versatile");
        assert_eq!(rows[1].key, "openai:gpt-4o");
        assert_eq!(rows[2].key, "anthropic:claude-sonnet-4-5");
        assert!((rows[2].success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn leaderboard_respects_limit() {
        let (_d, store) = temp_store();
        record(&store, ProviderId::Groq, "a", &usage(1), 1, true);
        record(&store, ProviderId::Openai, "b", &usage(1), 1, true);
        record(&store, ProviderId::Mistral, "c", &usage(1), 1, true);
        assert_eq!(leaderboard(&store, 2).len(), 2);
    }

    #[test]
    fn running_averages_accumulate() {
        let (_d, store) = temp_store();
        record(&store, ProviderId::Groq, "m", &usage(100), 100, true);
        record(&store, ProviderId::Groq, "m", &usage(100), 300, true);
        let rows = leaderboard(&store, 10);
        assert_eq!(rows[0].runs, 2);
        assert!((rows[0].avg_latency_ms - 200.0).abs() < 1e-9);
    }
}
