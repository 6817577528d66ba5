// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-chat markdown memory log.
//!
//! One lazily-created `.md` file per chat, appended after every completed
//! turn.  When a file grows past 900 KB it is compacted down to its last
//! 600 KB so long-lived chats stay bounded without losing recent context.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use tracing::debug;

use freja_config::Store;

const COMPACT_THRESHOLD_BYTES: u64 = 900 * 1024;
const COMPACT_RETAIN_BYTES: usize = 600 * 1024;

pub fn chat_log_path(store: &Store, chat_id: i64) -> PathBuf {
    store.chat_memory_dir().join(format!("{chat_id}.md"))
}

/// Append one turn; creates the file and parent directory on first use.
pub fn append_turn(store: &Store, chat_id: i64, user: &str, assistant: &str) -> anyhow::Result<()> {
    use std::io::Write;

    let path = chat_log_path(store, chat_id);
    let dir = store.chat_memory_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let ts = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let entry = format!("**User** ({ts}):\n{user}\n\n**Assistant** ({ts}):\n{assistant}\n\n");

    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    f.write_all(entry.as_bytes())?;
    drop(f);

    compact_if_needed(&path)?;
    Ok(())
}

/// Read the tail of a chat's log, capped at `max_bytes`.
pub fn read_tail(store: &Store, chat_id: i64, max_bytes: usize) -> String {
    let Ok(text) = std::fs::read_to_string(chat_log_path(store, chat_id)) else {
        return String::new();
    };
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn compact_if_needed(path: &std::path::Path) -> anyhow::Result<()> {
    let meta = std::fs::metadata(path)?;
    if meta.len() <= COMPACT_THRESHOLD_BYTES {
        return Ok(());
    }
    debug!(path = %path.display(), size = meta.len(), "compacting chat memory");
    let text = std::fs::read_to_string(path)?;
    let mut start = text.len().saturating_sub(COMPACT_RETAIN_BYTES);
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    // Start the retained window on an entry boundary when one is nearby.
    let retained = match text[start..].find("**User**") {
        Some(i) => &text[start + i..],
        None => &text[start..],
    };
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, retained)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::at(dir.path());
        (dir, store)
    }

    #[test]
    fn append_creates_file_lazily() {
        let (_d, store) = temp_store();
        assert!(!chat_log_path(&store, 1).exists());
        append_turn(&store, 1, "hi", "hello!").unwrap();
        let text = std::fs::read_to_string(chat_log_path(&store, 1)).unwrap();
        assert!(text.contains("**User**"));
        assert!(text.contains("**Assistant**"));
        assert!(text.contains("hi"));
        assert!(text.contains("hello!"));
    }

    #[test]
    fn turns_append_in_order() {
        let (_d, store) = temp_store();
        append_turn(&store, 1, "first", "a1").unwrap();
        append_turn(&store, 1, "second", "a2").unwrap();
        let text = std::fs::read_to_string(chat_log_path(&store, 1)).unwrap();
        assert!(text.find("first").unwrap() < text.find("second").unwrap());
    }

    #[test]
    fn chats_have_separate_files() {
        let (_d, store) = temp_store();
        append_turn(&store, 1, "one", "r").unwrap();
        append_turn(&store, 2, "two", "r").unwrap();
        assert!(chat_log_path(&store, 1).exists());
        assert!(chat_log_path(&store, 2).exists());
    }

    #[test]
    fn read_tail_of_missing_chat_is_empty() {
        let (_d, store) = temp_store();
        assert!(read_tail(&store, 99, 1000).is_empty());
    }

    #[test]
    fn read_tail_caps_bytes() {
        let (_d, store) = temp_store();
        append_turn(&store, 1, &"u".repeat(5000), &"a".repeat(5000)).unwrap();
        let tail = read_tail(&store, 1, 100);
        assert!(tail.len() <= 100);
    }

    #[test]
    fn oversized_log_is_compacted_to_retain_window() {
        let (_d, store) = temp_store();
        let path = chat_log_path(&store, 1);
        std::fs::create_dir_all(store.chat_memory_dir()).unwrap();
        // Seed a file just under threshold, then push it over.
        let filler = format!("**User** (t):\n{}\n\n", "x".repeat(1000));
        let mut seed = String::new();
        while seed.len() < (COMPACT_THRESHOLD_BYTES as usize + 10_000) {
            seed.push_str(&filler);
        }
        std::fs::write(&path, &seed).unwrap();

        append_turn(&store, 1, "marker-at-the-end", "reply").unwrap();

        let size = std::fs::metadata(&path).unwrap().len() as usize;
        assert!(size <= COMPACT_RETAIN_BYTES + filler.len());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("marker-at-the-end"), "recent content survives");
        assert!(text.starts_with("**User**"), "retained window starts on an entry");
    }

    #[test]
    fn small_log_is_not_compacted() {
        let (_d, store) = temp_store();
        append_turn(&store, 1, "small", "log").unwrap();
        let before = std::fs::metadata(chat_log_path(&store, 1)).unwrap().len();
        append_turn(&store, 1, "still", "small").unwrap();
        let after = std::fs::metadata(chat_log_path(&store, 1)).unwrap().len();
        assert!(after > before);
    }
}
