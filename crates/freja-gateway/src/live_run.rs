// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded in-memory registry of remotely observable runs.
//!
//! Every messenger-initiated interaction registers a run here; the HTTP
//! server renders them as shareable pages.  Writers never block on readers:
//! mutations happen under one lock per operation and readers receive cloned
//! snapshots.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Events kept per run.
const MAX_EVENTS: usize = 300;
/// Registry size that triggers eviction.
const MAX_RUNS: usize = 120;
/// Completed runs older than this are evictable.
const EXPIRY_HOURS: i64 = 2;
/// Window within which a consecutive identical event is dropped.
const DEDUP_WINDOW_MS: i64 = 800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveRun {
    pub id: String,
    pub chat_id: i64,
    pub prompt: String,
    pub actor: String,
    pub status: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    pub events: VecDeque<RunEvent>,
}

impl LiveRun {
    fn new(chat_id: i64, prompt: &str, actor: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            chat_id,
            prompt: prompt.to_string(),
            actor: actor.to_string(),
            status: "running".into(),
            detail: String::new(),
            created_at: now,
            updated_at: now,
            completed: false,
            error: None,
            result_preview: None,
            events: VecDeque::new(),
        }
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.completed && now - self.updated_at > Duration::hours(EXPIRY_HOURS)
    }
}

/// The registry.  One writer per run id; readers snapshot.
#[derive(Default)]
pub struct LiveRunRegistry {
    runs: Mutex<HashMap<String, LiveRun>>,
}

impl LiveRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run, evicting expired entries when the registry is
    /// over capacity.  Returns the run id.
    pub fn create(&self, chat_id: i64, prompt: &str, actor: &str) -> String {
        let run = LiveRun::new(chat_id, prompt, actor);
        let id = run.id.clone();
        let mut runs = self.runs.lock().unwrap();
        if runs.len() >= MAX_RUNS {
            let now = Utc::now();
            runs.retain(|_, r| !r.expired(now));
        }
        runs.insert(id.clone(), run);
        id
    }

    /// Append a status event; consecutive identical texts within the dedup
    /// window are dropped, the ring is bounded.
    pub fn push_event(&self, id: &str, text: &str) {
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.get_mut(id) else {
            return;
        };
        let now = Utc::now();
        if let Some(prev) = run.events.back() {
            if prev.text == text && (now - prev.at).num_milliseconds() < DEDUP_WINDOW_MS {
                return;
            }
        }
        if run.events.len() >= MAX_EVENTS {
            run.events.pop_front();
        }
        run.events.push_back(RunEvent {
            at: now,
            text: text.to_string(),
        });
        run.updated_at = now;
    }

    pub fn set_status(&self, id: &str, status: &str, detail: &str) {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(id) {
            run.status = status.to_string();
            run.detail = detail.to_string();
            run.updated_at = Utc::now();
        }
    }

    /// Terminal success: status reflects completion and a preview is kept.
    pub fn complete(&self, id: &str, result_preview: &str) {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(id) {
            run.completed = true;
            run.status = "completed".into();
            run.result_preview = Some(result_preview.chars().take(500).collect());
            run.updated_at = Utc::now();
        }
    }

    /// Terminal failure.
    pub fn fail(&self, id: &str, error: &str) {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(id) {
            run.completed = true;
            run.status = format!("failed: {error}");
            run.error = Some(error.to_string());
            run.updated_at = Utc::now();
        }
    }

    /// Copy-on-read snapshot.
    pub fn snapshot(&self, id: &str) -> Option<LiveRun> {
        self.runs.lock().unwrap().get(id).cloned()
    }

    /// Most recently updated run for one chat.
    pub fn latest_for_chat(&self, chat_id: i64) -> Option<LiveRun> {
        self.runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.chat_id == chat_id)
            .max_by_key(|r| r.updated_at)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
