// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt intent classification.
//!
//! [`classify`] is a pure function from free text to one intent tag; the
//! pipeline branches on the result.  Precedence follows the trigger order:
//! provider-slash, provider-natural, filesystem, shell, system execution
//! (refined to todo orchestration), then chat.
//!
//! The user base writes a mix of English and romanized Bangla; the action
//! verb list carries both.

use freja_model::ProviderId;
use regex::Regex;

/// Filesystem operations the pipeline can execute directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOpKind {
    CreateDir,
    CreateFile,
    Append,
    Move,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsOp {
    pub kind: FsOpKind,
    pub path: String,
    /// Text to write, for append/write shapes.
    pub content: Option<String>,
    /// Target path for moves.
    pub dest: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// `/mistral`, `/mistral::mistral-small-latest refactor this`
    ProviderSlash {
        provider: ProviderId,
        model: Option<String>,
        prompt: Option<String>,
    },
    /// `mistral: Mistral Small > refactor`, `use gemini`
    ProviderNatural {
        provider: ProviderId,
        model: Option<String>,
        prompt: Option<String>,
    },
    Fs(FsOp),
    Shell {
        command: String,
        explicit: bool,
    },
    SystemExecution,
    TodoOrchestration,
    Chat,
}

/// Greetings short enough to skip memory enrichment entirely.
const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "hola", "salam", "assalamu alaikum", "good morning",
    "good afternoon", "good evening", "good night", "thanks", "thank you", "ok", "okay",
    "kemon acho", "ki obostha",
];

const BRIEF_GREETING_MAX_LEN: usize = 36;

pub fn is_brief_greeting(prompt: &str) -> bool {
    let p = prompt.trim();
    if p.len() > BRIEF_GREETING_MAX_LEN {
        return false;
    }
    let normalized: String = p
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '!' | '.' | ',' | '?'))
        .collect();
    let normalized = normalized.trim();
    GREETINGS.iter().any(|g| *g == normalized)
}

// ── Provider phrases ──────────────────────────────────────────────────────────

/// Parse `/provider[...]` slash forms.
fn parse_provider_slash(prompt: &str) -> Option<Intent> {
    let rest = prompt.strip_prefix('/')?;
    let (head, tail) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };

    // `/provider::model-id`
    let (provider_token, mut model) = match head.split_once("::") {
        Some((p, m)) => (p, Some(m.to_string())),
        None => (head, None),
    };
    let provider = ProviderId::parse(provider_token)?;

    // `model=<id>` as the first word of the tail.
    let mut tail = tail.to_string();
    if let Some(rest) = tail.strip_prefix("model=") {
        let (m, remainder) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };
        model = Some(m.to_string());
        tail = remainder.to_string();
    }

    Some(Intent::ProviderSlash {
        provider,
        model,
        prompt: if tail.is_empty() { None } else { Some(tail) },
    })
}

/// Parse natural provider phrases:
/// `provider: Model Name > prompt`, `provider/model prompt`, `use provider`.
fn parse_provider_natural(prompt: &str) -> Option<Intent> {
    let trimmed = prompt.trim();

    // `provider: Model Name > prompt`
    let angle = Regex::new(r"^(?P<p>[A-Za-z]+)\s*:\s*(?P<m>[^>]+)>\s*(?P<rest>.*)$").ok()?;
    if let Some(caps) = angle.captures(trimmed) {
        if let Some(provider) = ProviderId::parse(&caps["p"]) {
            let model = caps["m"].trim();
            let rest = caps["rest"].trim();
            return Some(Intent::ProviderNatural {
                provider,
                model: (!model.is_empty()).then(|| model.to_string()),
                prompt: (!rest.is_empty()).then(|| rest.to_string()),
            });
        }
    }

    // `provider/model-id prompt…` at the start
    let slashed = Regex::new(r"^(?P<p>[A-Za-z]+)/(?P<m>[^\s]+)\s+(?P<rest>.+)$").ok()?;
    if let Some(caps) = slashed.captures(trimmed) {
        if let Some(provider) = ProviderId::parse(&caps["p"]) {
            return Some(Intent::ProviderNatural {
                provider,
                model: Some(caps["m"].to_string()),
                prompt: Some(caps["rest"].trim().to_string()),
            });
        }
    }

    // `use <provider>` anywhere
    let use_re = Regex::new(r"\buse\s+(?P<p>[A-Za-z]+)\b").ok()?;
    if let Some(caps) = use_re.captures(trimmed) {
        if let Some(provider) = ProviderId::parse(&caps["p"]) {
            let remainder = use_re.replace(trimmed, "").trim().to_string();
            return Some(Intent::ProviderNatural {
                provider,
                model: None,
                prompt: (!remainder.is_empty()).then_some(remainder),
            });
        }
    }

    None
}

// ── Path tokens ───────────────────────────────────────────────────────────────

const KNOWN_EXTENSIONS: &[&str] = &[
    "txt", "md", "rs", "py", "js", "ts", "json", "yaml", "yml", "toml", "sh", "log", "csv",
    "html", "css", "conf",
];

/// First path-looking token: absolute, `~/`, `./`, `../`, or a bare name
/// with a well-known extension.
pub fn find_path_token(prompt: &str) -> Option<String> {
    for raw in prompt.split_whitespace() {
        let t = raw.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';' | ')' | '('));
        if t.len() < 2 {
            continue;
        }
        if t.starts_with('/') || t.starts_with("~/") || t.starts_with("./") || t.starts_with("../")
        {
            return Some(t.to_string());
        }
        if let Some((_, ext)) = t.rsplit_once('.') {
            if KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                return Some(t.to_string());
            }
        }
    }
    None
}

// ── Filesystem intents ────────────────────────────────────────────────────────

fn parse_fs_intent(prompt: &str) -> Option<FsOp> {
    let p = prompt.to_ascii_lowercase();
    let path = find_path_token(prompt)?;

    let mentions_dir = p.contains("folder") || p.contains("directory") || path.ends_with('/');
    let creation = p.contains("create") || p.contains("make") || p.contains("banaw");

    if (p.contains("move") || p.contains("rename")) && p.contains(" to ") {
        // second path token after " to "
        let after_to = prompt.split(" to ").nth(1)?;
        let dest = find_path_token(after_to)?;
        return Some(FsOp {
            kind: FsOpKind::Move,
            path,
            content: None,
            dest: Some(dest),
        });
    }
    if p.contains("delete") || p.contains("remove") {
        return Some(FsOp {
            kind: FsOpKind::Delete,
            path,
            content: None,
            dest: None,
        });
    }
    if p.contains("append") || (p.contains("add") && p.contains(" to ")) {
        let content = prompt
            .split_once(" to ")
            .map(|(before, _)| {
                before
                    .trim_start_matches(|c: char| !c.is_whitespace())
                    .trim()
                    .trim_start_matches("append")
                    .trim()
                    .trim_matches('"')
                    .to_string()
            })
            .filter(|c| !c.is_empty());
        return Some(FsOp {
            kind: FsOpKind::Append,
            path,
            content,
            dest: None,
        });
    }
    if p.contains("write") {
        // "write file" without prior content is create-or-truncate.
        return Some(FsOp {
            kind: FsOpKind::CreateFile,
            path,
            content: None,
            dest: None,
        });
    }
    if creation && mentions_dir {
        return Some(FsOp {
            kind: FsOpKind::CreateDir,
            path,
            content: None,
            dest: None,
        });
    }
    if creation {
        return Some(FsOp {
            kind: FsOpKind::CreateFile,
            path,
            content: None,
            dest: None,
        });
    }
    None
}

// ── Shell intents ─────────────────────────────────────────────────────────────

const SHELL_PREFIXES: &[&str] = &["/cmd ", "/run ", "/shell ", "/fs ", "/executor "];

const TOOL_HEADS: &[&str] = &[
    "ls", "grep", "git", "docker", "cat", "ps", "top", "df", "du", "find", "tail", "head",
    "make", "npm", "cargo", "python", "python3", "pip", "kubectl", "systemctl", "journalctl",
    "uname", "whoami", "pwd", "free", "uptime",
];

fn parse_shell_intent(prompt: &str) -> Option<Intent> {
    let trimmed = prompt.trim();

    for prefix in SHELL_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            let command = rest.trim().to_string();
            if !command.is_empty() {
                return Some(Intent::Shell {
                    command,
                    explicit: true,
                });
            }
        }
    }
    if let Some(rest) = trimmed.strip_prefix('!') {
        let command = rest.trim().to_string();
        if !command.is_empty() {
            return Some(Intent::Shell {
                command,
                explicit: true,
            });
        }
    }

    // Implicit: a unix tool head token, optionally in a pipeline.
    let head = trimmed.split_whitespace().next()?;
    if TOOL_HEADS.contains(&head) {
        return Some(Intent::Shell {
            command: trimmed.to_string(),
            explicit: false,
        });
    }
    None
}

// ── System execution ──────────────────────────────────────────────────────────

const ACTION_VERBS: &[&str] = &[
    "run", "execute", "install", "setup", "set up", "fix", "create", "make", "build",
    "configure", "generate", "update", "banaw", "banao", "koro", "kore", "chalaw", "chalao",
    "felo", "kor",
];

const SYSTEM_NOUNS: &[&str] = &[
    "file", "folder", "project", "system", "installed", "cli", "server", "package",
    "script", "directory", "app", "environment", "service", "repo", "database",
];

const TODO_MARKERS: &[&str] = &[
    "todo", "step by step", "step-by-step", "plan", "workflow", "execute the plan",
    "multi-step",
];

fn is_system_execution(prompt: &str) -> bool {
    let p = prompt.to_ascii_lowercase();
    let has_verb = ACTION_VERBS.iter().any(|v| p.contains(v));
    if !has_verb {
        return false;
    }
    SYSTEM_NOUNS.iter().any(|n| p.contains(n)) || find_path_token(prompt).is_some()
}

fn is_todo_orchestration(prompt: &str) -> bool {
    let p = prompt.to_ascii_lowercase();
    TODO_MARKERS.iter().any(|m| p.contains(m))
}

// ── Entry point ───────────────────────────────────────────────────────────────

pub fn classify(prompt: &str) -> Intent {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Intent::Chat;
    }

    if let Some(i) = parse_provider_slash(trimmed) {
        return i;
    }
    if let Some(i) = parse_provider_natural(trimmed) {
        return i;
    }
    if let Some(op) = parse_fs_intent(trimmed) {
        return Intent::Fs(op);
    }
    if let Some(i) = parse_shell_intent(trimmed) {
        return i;
    }
    if is_system_execution(trimmed) {
        if is_todo_orchestration(trimmed) {
            return Intent::TodoOrchestration;
        }
        return Intent::SystemExecution;
    }
    Intent::Chat
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
