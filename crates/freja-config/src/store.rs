// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Store-directory persistence.
//!
//! All durable state lives under `~/.freja/store/`.  Writes create parent
//! directories first and go through a temp-file + rename so a crash mid-write
//! never leaves a truncated record.  Reads normalize: a corrupt or missing
//! file yields the default value and is rewritten on the next save.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::schema::{PolicyConfig, RouterConfig, SchedulerConfig};

/// Handle to the on-disk store directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Store rooted at `~/.freja/store`.
    pub fn default_location() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: home.join(".freja").join("store"),
        }
    }

    /// Store rooted at an explicit directory (tests, containers).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Well-known paths ──────────────────────────────────────────────────────

    pub fn router_config_path(&self) -> PathBuf {
        self.root.join("ai-router.json")
    }

    pub fn scheduler_config_path(&self) -> PathBuf {
        self.root.join("scheduler-config.json")
    }

    pub fn policy_config_path(&self) -> PathBuf {
        self.root.join("policy-config.json")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.root.join("scheduler-telemetry.jsonl")
    }

    pub fn todo_runs_dir(&self) -> PathBuf {
        self.root.join("todo-runs")
    }

    pub fn eval_cases_path(&self) -> PathBuf {
        self.root.join("eval-cases.json")
    }

    pub fn eval_runs_path(&self) -> PathBuf {
        self.root.join("eval-runs.jsonl")
    }

    pub fn telegram_offset_path(&self) -> PathBuf {
        self.root.join("telegram-offset.txt")
    }

    pub fn chat_memory_dir(&self) -> PathBuf {
        self.root.join("telegram-chat-memory")
    }

    // ── Typed config accessors (normalize-on-read) ────────────────────────────

    pub fn load_router_config(&self) -> RouterConfig {
        self.load_json::<RouterConfig>(&self.router_config_path())
            .normalize()
    }

    pub fn save_router_config(&self, cfg: &RouterConfig) -> anyhow::Result<()> {
        self.save_json(&self.router_config_path(), cfg)
    }

    pub fn load_scheduler_config(&self) -> SchedulerConfig {
        self.load_json::<SchedulerConfig>(&self.scheduler_config_path())
            .normalize()
    }

    pub fn save_scheduler_config(&self, cfg: &SchedulerConfig) -> anyhow::Result<()> {
        self.save_json(&self.scheduler_config_path(), cfg)
    }

    pub fn load_policy_config(&self) -> PolicyConfig {
        self.load_json::<PolicyConfig>(&self.policy_config_path())
            .normalize()
    }

    pub fn save_policy_config(&self, cfg: &PolicyConfig) -> anyhow::Result<()> {
        self.save_json(&self.policy_config_path(), cfg)
    }

    // ── Generic persistence ───────────────────────────────────────────────────

    /// Read a JSON record, falling back to `T::default()` when the file is
    /// missing or corrupt.  The previous content is not preserved; on-disk
    /// configs are regenerable.
    pub fn load_json<T: DeserializeOwned + Default>(&self, path: &Path) -> T {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt config, using defaults");
                    T::default()
                }
            },
            Err(_) => T::default(),
        }
    }

    /// Atomically write a JSON record: parent dirs, temp file, rename.
    pub fn save_json<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .context("config path has no parent directory")?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replacing {}", path.display()))?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Append one line to a newline-delimited file, creating it if needed.
    pub fn append_line(&self, path: &Path, line: &str) -> anyhow::Result<()> {
        use std::io::Write;
        let parent = path.parent().context("log path has no parent directory")?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Read the last `n` lines of a newline-delimited file.
    ///
    /// Missing files yield an empty vector; these logs are best-effort.
    pub fn tail_lines(&self, path: &Path, n: usize) -> Vec<String> {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|s| s.to_string()).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
