// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt eval harness.
//!
//! A case file under the store holds `{id, prompt, expectations}` records;
//! `run` routes every prompt and checks each expectation as a
//! case-insensitive substring of the answer.  Run results append to a JSONL
//! history so `/eval trend` can show drift.  A run below the pass threshold
//! writes a block marker that gates later runs until `/eval unblock`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use freja_config::Store;
use freja_model::ProviderId;

/// Pass-rate gate for marking a run green.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub id: String,
    pub prompt: String,
    /// Substrings (case-insensitive) the answer must contain.
    pub expectations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub id: String,
    pub passed: bool,
    pub reasons: Vec<String>,
    pub provider: Option<ProviderId>,
    pub model: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {
    pub at: DateTime<Utc>,
    pub results: Vec<EvalResult>,
    pub pass_rate: f64,
    pub failed: usize,
    pub blocked: usize,
    pub threshold: f64,
}

/// Starter cases written by `/eval init`.
pub fn starter_cases() -> Vec<EvalCase> {
    vec![
        EvalCase {
            id: "greeting".into(),
            prompt: "Reply with exactly: pong".into(),
            expectations: vec!["pong".into()],
        },
        EvalCase {
            id: "arithmetic".into(),
            prompt: "What is 6 times 7? Answer with the number only.".into(),
            expectations: vec!["42".into()],
        },
        EvalCase {
            id: "rust-keyword".into(),
            prompt: "Name the Rust keyword that declares an immutable binding.".into(),
            expectations: vec!["let".into()],
        },
    ]
}

pub fn load_cases(store: &Store) -> Vec<EvalCase> {
    store.load_json::<Vec<EvalCase>>(&store.eval_cases_path())
}

pub fn save_cases(store: &Store, cases: &[EvalCase]) -> anyhow::Result<()> {
    store.save_json(&store.eval_cases_path(), &cases.to_vec())
}

/// Judge one answer against a case.
pub fn judge(case: &EvalCase, answer: &str) -> (bool, Vec<String>) {
    let a = answer.to_ascii_lowercase();
    let mut reasons = Vec::new();
    for exp in &case.expectations {
        if !a.contains(&exp.to_ascii_lowercase()) {
            reasons.push(format!("missing expectation: {exp:?}"));
        }
    }
    (reasons.is_empty(), reasons)
}

fn block_marker_path(store: &Store) -> std::path::PathBuf {
    store.root().join("eval-blocked")
}

pub fn is_blocked(store: &Store) -> bool {
    block_marker_path(store).exists()
}

pub fn unblock(store: &Store) -> anyhow::Result<()> {
    let p = block_marker_path(store);
    if p.exists() {
        std::fs::remove_file(p)?;
    }
    Ok(())
}

/// Fold per-case results into a run record, persist it, and update the block
/// marker.
pub fn finish_run(store: &Store, results: Vec<EvalResult>) -> anyhow::Result<EvalRun> {
    let failed = results.iter().filter(|r| !r.passed).count();
    let blocked = results
        .iter()
        .filter(|r| r.reasons.iter().any(|x| x.contains("routing error")))
        .count();
    let pass_rate = if results.is_empty() {
        0.0
    } else {
        (results.len() - failed) as f64 / results.len() as f64
    };
    let run = EvalRun {
        at: Utc::now(),
        results,
        pass_rate,
        failed,
        blocked,
        threshold: DEFAULT_THRESHOLD,
    };
    store.append_line(&store.eval_runs_path(), &serde_json::to_string(&run)?)?;

    if run.pass_rate < run.threshold {
        std::fs::write(block_marker_path(store), format!("{}", run.pass_rate))?;
    } else {
        unblock(store)?;
    }
    Ok(run)
}

/// Past runs, oldest first.
pub fn history(store: &Store, n: usize) -> Vec<EvalRun> {
    store
        .tail_lines(&store.eval_runs_path(), n)
        .iter()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
