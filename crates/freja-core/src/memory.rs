// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Memory/context bridge.
//!
//! The assistant consumes an external memory provider through the
//! [`MemoryBridge`] trait; this module decides *what* to attach to a prompt
//! and never *how* memories are stored.  Attachment is throttled by intent:
//! explicit recall pulls ranked excerpts, session-continuation pulls the
//! session tail, greetings pass through untouched.
//!
//! A failing bridge never fails the routed call: on any error the prompt
//! passes through unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::intent::is_brief_greeting;

/// Tail cap in the default mode.
const SESSION_TAIL_CAP: usize = 1800;
/// Tail cap when ship-faster carryover is enabled.
const SESSION_TAIL_CAP_CARRYOVER: usize = 2600;

const MEMORY_KEYWORDS: &[&str] = &[
    "memory", "remember", "recall", "memorize", "note", "reminder", "mone rakho", "mone ache",
];

const SESSION_KEYWORDS: &[&str] = &[
    "previous", "continue", "resume", "last time", "earlier", "before", "where were we",
];

/// One saved memory with enough metadata to rank it.
#[derive(Debug, Clone)]
pub struct MemoryExcerpt {
    pub text: String,
    pub saved_at: DateTime<Utc>,
}

/// External memory collaborator.
#[async_trait]
pub trait MemoryBridge: Send + Sync {
    /// Saved memories, most recent first.
    async fn memories(&self) -> anyhow::Result<Vec<MemoryExcerpt>>;

    /// Standing agent rules, if any.
    async fn agent_rules(&self) -> anyhow::Result<Vec<String>>;

    /// Tail of the active session transcript.
    async fn session_tail(&self) -> anyhow::Result<String>;

    /// Persist one completed turn.
    async fn save_turn(&self, prompt: &str, reply: &str) -> anyhow::Result<()>;
}

/// Bridge that remembers nothing; used when memory is disabled and in tests.
pub struct NullMemory;

#[async_trait]
impl MemoryBridge for NullMemory {
    async fn memories(&self) -> anyhow::Result<Vec<MemoryExcerpt>> {
        Ok(Vec::new())
    }
    async fn agent_rules(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn session_tail(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }
    async fn save_turn(&self, _prompt: &str, _reply: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn contains_any(prompt: &str, keywords: &[&str]) -> bool {
    let p = prompt.to_ascii_lowercase();
    keywords.iter().any(|k| p.contains(k))
}

/// Keyword overlap + recency bonus, higher is better.
fn rank_excerpt(excerpt: &MemoryExcerpt, prompt: &str) -> f64 {
    let prompt_words: Vec<String> = prompt
        .to_ascii_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(|w| w.to_string())
        .collect();
    let text = excerpt.text.to_ascii_lowercase();
    let overlap = prompt_words.iter().filter(|w| text.contains(w.as_str())).count() as f64;

    let age_days = (Utc::now() - excerpt.saved_at).num_days().max(0) as f64;
    let recency_bonus = (30.0 - age_days).max(0.0) / 30.0;
    overlap + recency_bonus
}

fn truncate_tail(tail: &str, cap: usize) -> String {
    if tail.len() <= cap {
        return tail.to_string();
    }
    let cut = tail.len() - cap;
    // Keep the most recent end, starting at a char boundary.
    let mut start = cut;
    while !tail.is_char_boundary(start) {
        start += 1;
    }
    tail[start..].to_string()
}

/// Compose the routed prompt from the raw prompt plus memory context.
///
/// `carryover` widens the session-tail cap for ship-faster mode.
pub async fn build_context(bridge: &dyn MemoryBridge, prompt: &str, carryover: bool) -> String {
    if is_brief_greeting(prompt) {
        return prompt.to_string();
    }

    let result: anyhow::Result<String> = async {
        if contains_any(prompt, MEMORY_KEYWORDS) {
            let mut excerpts = bridge.memories().await?;
            excerpts.sort_by(|a, b| {
                rank_excerpt(b, prompt)
                    .partial_cmp(&rank_excerpt(a, prompt))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            excerpts.truncate(5);

            let mut rules = bridge.agent_rules().await.unwrap_or_default();
            rules.truncate(3);

            let tail = bridge.session_tail().await.unwrap_or_default();

            let mut parts: Vec<String> = Vec::new();
            if !excerpts.is_empty() {
                let lines: Vec<String> =
                    excerpts.iter().map(|e| format!("- {}", e.text)).collect();
                parts.push(format!("Saved memories:\n{}", lines.join("\n")));
            }
            if !rules.is_empty() {
                parts.push(format!("Agent rules:\n- {}", rules.join("\n- ")));
            }
            if !tail.trim().is_empty() {
                parts.push(format!(
                    "Recent session:\n{}",
                    truncate_tail(&tail, SESSION_TAIL_CAP)
                ));
            }
            if parts.is_empty() {
                return Ok(prompt.to_string());
            }
            return Ok(format!("{}\n\n{}", parts.join("\n\n"), prompt));
        }

        if contains_any(prompt, SESSION_KEYWORDS) {
            let tail = bridge.session_tail().await?;
            if tail.trim().is_empty() {
                return Ok(prompt.to_string());
            }
            return Ok(format!(
                "Recent session:\n{}\n\n{}",
                truncate_tail(&tail, SESSION_TAIL_CAP),
                prompt
            ));
        }

        // Default: recent tail, capped.
        let cap = if carryover {
            SESSION_TAIL_CAP_CARRYOVER
        } else {
            SESSION_TAIL_CAP
        };
        let tail = bridge.session_tail().await?;
        if tail.trim().is_empty() {
            return Ok(prompt.to_string());
        }
        Ok(format!(
            "Recent session:\n{}\n\n{}",
            truncate_tail(&tail, cap),
            prompt
        ))
    }
    .await;

    match result {
        Ok(composed) => composed,
        Err(e) => {
            debug!(error = %e, "memory bridge failed, passing prompt through");
            prompt.to_string()
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBridge {
        memories: Vec<MemoryExcerpt>,
        rules: Vec<String>,
        tail: String,
        fail: bool,
    }

    impl FixedBridge {
        fn with_tail(tail: &str) -> Self {
            Self {
                memories: Vec::new(),
                rules: Vec::new(),
                tail: tail.to_string(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl MemoryBridge for FixedBridge {
        async fn memories(&self) -> anyhow::Result<Vec<MemoryExcerpt>> {
            if self.fail {
                anyhow::bail!("store offline");
            }
            Ok(self.memories.clone())
        }
        async fn agent_rules(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.rules.clone())
        }
        async fn session_tail(&self) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("store offline");
            }
            Ok(self.tail.clone())
        }
        async fn save_turn(&self, _p: &str, _r: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn greeting_passes_through_unchanged() {
        let bridge = FixedBridge::with_tail("lots of session context");
        let out = build_context(&bridge, "hello", false).await;
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn plain_prompt_gets_session_tail() {
        let bridge = FixedBridge::with_tail("user asked about rust lifetimes");
        let out = build_context(&bridge, "and what about async?", false).await;
        assert!(out.contains("rust lifetimes"));
        assert!(out.ends_with("and what about async?"));
    }

    #[tokio::test]
    async fn empty_tail_passes_through() {
        let bridge = FixedBridge::with_tail("");
        let out = build_context(&bridge, "what is tokio?", false).await;
        assert_eq!(out, "what is tokio?");
    }

    #[tokio::test]
    async fn tail_is_capped_to_budget() {
        let long_tail = "x".repeat(10_000);
        let bridge = FixedBridge::with_tail(&long_tail);
        let out = build_context(&bridge, "next question", false).await;
        // prefix + capped tail + prompt
        assert!(out.len() < SESSION_TAIL_CAP + 100);
    }

    #[tokio::test]
    async fn carryover_mode_widens_the_cap() {
        let long_tail = "y".repeat(10_000);
        let bridge = FixedBridge::with_tail(&long_tail);
        let narrow = build_context(&bridge, "next", false).await;
        let wide = build_context(&bridge, "next", true).await;
        assert!(wide.len() > narrow.len());
    }

    #[tokio::test]
    async fn memory_intent_attaches_ranked_excerpts() {
        let bridge = FixedBridge {
            memories: vec![
                MemoryExcerpt {
                    text: "prefers postgres over mysql".into(),
                    saved_at: Utc::now(),
                },
                MemoryExcerpt {
                    text: "timezone is CET".into(),
                    saved_at: Utc::now(),
                },
            ],
            rules: vec!["answer briefly".into()],
            tail: "tail".into(),
            fail: false,
        };
        let out = build_context(&bridge, "do you remember my postgres preference?", false).await;
        assert!(out.contains("postgres over mysql"));
        assert!(out.contains("Agent rules"));
        assert!(out.ends_with("do you remember my postgres preference?"));
    }

    #[tokio::test]
    async fn ranked_excerpts_are_limited_to_five() {
        let memories: Vec<MemoryExcerpt> = (0..10)
            .map(|i| MemoryExcerpt {
                text: format!("memory number {i}"),
                saved_at: Utc::now(),
            })
            .collect();
        let bridge = FixedBridge {
            memories,
            rules: vec![],
            tail: String::new(),
            fail: false,
        };
        let out = build_context(&bridge, "recall everything you know", false).await;
        let count = out.matches("- memory number").count();
        assert!(count <= 5, "got {count} excerpts");
    }

    #[tokio::test]
    async fn session_recall_attaches_tail_only() {
        let bridge = FixedBridge {
            memories: vec![MemoryExcerpt {
                text: "should not appear".into(),
                saved_at: Utc::now(),
            }],
            rules: vec![],
            tail: "we were debugging the parser".into(),
            fail: false,
        };
        let out = build_context(&bridge, "continue from where we left off", false).await;
        assert!(out.contains("debugging the parser"));
        assert!(!out.contains("should not appear"));
    }

    #[tokio::test]
    async fn bridge_failure_passes_prompt_through() {
        let bridge = FixedBridge {
            memories: vec![],
            rules: vec![],
            tail: "tail".into(),
            fail: true,
        };
        let out = build_context(&bridge, "what did we discuss?", false).await;
        assert_eq!(out, "what did we discuss?");
    }

    #[tokio::test]
    async fn null_memory_always_passes_through() {
        let out = build_context(&NullMemory, "any prompt at all", false).await;
        assert_eq!(out, "any prompt at all");
    }

    #[test]
    fn keyword_overlap_outranks_recency() {
        let old_match = MemoryExcerpt {
            text: "database migration checklist postgres".into(),
            saved_at: Utc::now() - chrono::Duration::days(20),
        };
        let fresh_miss = MemoryExcerpt {
            text: "likes green tea".into(),
            saved_at: Utc::now(),
        };
        let prompt = "show the postgres migration checklist";
        assert!(rank_excerpt(&old_match, prompt) > rank_excerpt(&fresh_miss, prompt));
    }

    #[test]
    fn truncate_tail_respects_char_boundaries() {
        let tail = format!("{}ö", "a".repeat(100));
        let out = truncate_tail(&tail, 50);
        assert!(out.len() <= 52);
        assert!(out.ends_with('ö'));
    }
}
