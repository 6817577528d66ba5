// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Policy engine for shell commands and filesystem intents.
//!
//! [`evaluate_command`] runs a fixed short-circuit sequence: builtin harmful
//! patterns, user deny patterns, strict-mode confirmations, read-only
//! workspace protection, then per-target confirmations.  The first hit wins.
//!
//! Confirmation is phrase-based: a denied-by-confirmation command becomes
//! allowed when the surrounding prompt contains one of the enumerated
//! allow-phrases, so the operator can pre-approve inside the same message.

use std::path::{Path, PathBuf};

use freja_config::PolicyConfig;
use regex::Regex;
use tracing::debug;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub requires_confirmation: bool,
    pub reason: Option<String>,
    /// The exact phrase to add to the prompt to confirm.
    pub confirm_hint: Option<String>,
}

impl Verdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            requires_confirmation: false,
            reason: None,
            confirm_hint: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_confirmation: false,
            reason: Some(reason.into()),
            confirm_hint: None,
        }
    }

    fn confirm(reason: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_confirmation: true,
            reason: Some(reason.into()),
            confirm_hint: Some(hint.into()),
        }
    }
}

/// Filesystem intents the pipeline asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsIntentKind {
    CreateFolder,
    CreateFile,
    WriteFile,
}

/// Command classes that can require confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfirmTarget {
    Download,
    Install,
    Deploy,
    WorkspaceWrite,
}

impl ConfirmTarget {
    fn label(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Install => "install",
            Self::Deploy => "deploy",
            Self::WorkspaceWrite => "workspace write",
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            Self::Download => "allow download",
            Self::Install => "install permitted",
            Self::Deploy => "deploy ok",
            Self::WorkspaceWrite => "workspace write ok",
        }
    }
}

/// Phrases that pre-approve guarded command classes, including the romanized
/// variants the assistant's users actually type.
const ALLOW_PHRASES: &[&str] = &[
    "allow download",
    "download allowed",
    "download ok",
    "install permitted",
    "installation allowed",
    "install ok",
    "deploy ok",
    "deploy allowed",
    "deploy korte parba",
    "install korte parba",
    "workspace write ok",
];

/// Patterns that are denied unconditionally (step 2).
fn builtin_harmful_patterns() -> Vec<Regex> {
    [
        // Root-destroying deletes
        r"rm\s+(-[a-zA-Z]*\s+)*(-rf?|--force|--recursive)\s+/(\s|$)",
        r"rm\s+-rf\s+/\*",
        r"rm\s+-rf\s+~(\s|/\*|$)",
        // Filesystem format / disk wipe
        r"\bmkfs(\.[a-z0-9]+)?\b",
        r"\bdd\b.*\bof=/dev/",
        r">\s*/dev/sd[a-z]",
        // Power state
        r"\b(shutdown|reboot|poweroff|halt)\b",
        // Piped remote code execution
        r"\b(curl|wget)\b[^|;]*\|\s*(sudo\s+)?(sh|bash|zsh)\b",
        // Fork bomb
        r":\(\)\s*\{\s*:\|\:&\s*\}\s*;?\s*:",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
}

fn matches_any(command: &str, patterns: &[&str]) -> bool {
    let re = format!(r"\b({})\b", patterns.join("|"));
    Regex::new(&re).map(|r| r.is_match(command)).unwrap_or(false)
}

fn is_install_command(command: &str) -> bool {
    matches_any(
        command,
        &["apt", "apt-get", "yum", "dnf", "pacman", "brew", "snap"],
    ) && command.contains("install")
        || matches_any(command, &["pip", "pip3", "npm", "gem", "cargo"]) && command.contains("install")
}

fn is_download_command(command: &str) -> bool {
    matches_any(command, &["curl", "wget", "scp", "rsync"])
        || command.contains("git clone")
}

fn is_deploy_command(command: &str) -> bool {
    command.contains("deploy")
        || command.contains("kubectl apply")
        || command.contains("docker push")
        || command.contains("terraform apply")
}

/// True when the command carries a write verb or an output redirect.
fn has_write_verb(command: &str) -> bool {
    matches_any(
        command,
        &["mkdir", "touch", "mv", "cp", "rm", "chmod", "chown", "tee", "truncate", "dd"],
    ) || Regex::new(r"(sed|perl)\s+-i").map(|r| r.is_match(command)).unwrap_or(false)
        || command.contains('>')
}

/// Extract path-looking tokens and resolve them against the workspace root.
fn resolved_path_tokens(command: &str, workspace_root: &Path) -> Vec<PathBuf> {
    command
        .split_whitespace()
        .map(|t| t.trim_matches(|c| c == '"' || c == '\'' || c == ';'))
        .filter(|t| {
            t.starts_with('/')
                || t.starts_with("~/")
                || t.starts_with("./")
                || t.starts_with("../")
        })
        .map(|t| {
            let expanded = shellexpand::tilde(t).to_string();
            let p = PathBuf::from(expanded);
            if p.is_absolute() {
                p
            } else {
                workspace_root.join(p)
            }
        })
        .collect()
}

fn path_inside(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

fn prompt_has_allow_phrase(prompt_context: &str) -> bool {
    let p = prompt_context.to_ascii_lowercase();
    ALLOW_PHRASES.iter().any(|a| p.contains(a))
}

fn classify_targets(command: &str) -> Vec<ConfirmTarget> {
    let mut targets = Vec::new();
    if is_install_command(command) {
        targets.push(ConfirmTarget::Install);
    }
    if is_download_command(command) {
        targets.push(ConfirmTarget::Download);
    }
    if is_deploy_command(command) {
        targets.push(ConfirmTarget::Deploy);
    }
    targets
}

/// Evaluate one shell command against the active policy.
pub fn evaluate_command(command: &str, prompt_context: &str, cfg: &PolicyConfig) -> Verdict {
    // 1. Disabled → everything goes.
    if !cfg.enabled {
        return Verdict::allow();
    }

    // 2. Builtin harmful patterns.
    for re in builtin_harmful_patterns() {
        if re.is_match(command) {
            debug!(command, pattern = %re, "harmful command denied");
            return Verdict::deny("harmful command");
        }
    }

    // 3. User deny patterns, in list order.
    for pat in &cfg.blocked_command_patterns {
        if let Ok(re) = Regex::new(pat) {
            if re.is_match(command) {
                return Verdict::deny(format!("blocked by pattern: {pat}"));
            }
        }
    }

    // 4. Strict mode guards install/download/deploy behind an allow-phrase.
    if cfg.mode == freja_config::PolicyMode::Strict {
        let targets = classify_targets(command);
        if let Some(t) = targets.first() {
            if !prompt_has_allow_phrase(prompt_context) {
                return Verdict::confirm(
                    format!("{} requires confirmation in strict mode", t.label()),
                    t.hint(),
                );
            }
        }
    }

    // 5. Read-only workspace: deny writes under the protected root.
    if cfg.read_only_workspace && has_write_verb(command) {
        let paths = resolved_path_tokens(command, &cfg.protected_workspace_root);
        if paths
            .iter()
            .any(|p| path_inside(p, &cfg.protected_workspace_root))
        {
            return Verdict::deny("workspace is read-only");
        }
    }

    // 6. Per-target confirmations.
    let conf = &cfg.require_confirmation;
    for t in classify_targets(command) {
        let active = match t {
            ConfirmTarget::Install => conf.install,
            ConfirmTarget::Download => conf.download,
            ConfirmTarget::Deploy => conf.deploy,
            ConfirmTarget::WorkspaceWrite => conf.workspace_write,
        };
        if active && !prompt_has_allow_phrase(prompt_context) {
            return Verdict::confirm(format!("{} requires confirmation", t.label()), t.hint());
        }
    }
    if conf.workspace_write && has_write_verb(command) {
        let paths = resolved_path_tokens(command, &cfg.protected_workspace_root);
        if paths
            .iter()
            .any(|p| path_inside(p, &cfg.protected_workspace_root))
            && !prompt_has_allow_phrase(prompt_context)
        {
            return Verdict::confirm(
                "workspace write requires confirmation",
                ConfirmTarget::WorkspaceWrite.hint(),
            );
        }
    }

    Verdict::allow()
}

/// Evaluate a filesystem intent (create/write under a path).
///
/// Mirrors steps 1, 5 and 6 of [`evaluate_command`]; filesystem intents
/// cannot be harmful-pattern or install/download/deploy shaped.
pub fn evaluate_fs_intent(_kind: FsIntentKind, path: &Path, cfg: &PolicyConfig) -> Verdict {
    if !cfg.enabled {
        return Verdict::allow();
    }

    let inside = path_inside(path, &cfg.protected_workspace_root);

    if cfg.read_only_workspace && inside {
        return Verdict::deny("workspace is read-only");
    }

    if cfg.require_confirmation.workspace_write && inside {
        return Verdict::confirm(
            "workspace write requires confirmation",
            ConfirmTarget::WorkspaceWrite.hint(),
        );
    }

    Verdict::allow()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
