// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent configuration records and their normalization.
//!
//! Every on-disk config is normalized on read.  There is no schema version:
//! unknown fields are dropped by serde, unknown provider ids collapse to
//! `"auto"`, and legacy provider aliases are rewritten in place.  Corrupt
//! files deserialize to the default and get rewritten on the next save;
//! the on-disk form is regenerable, so nothing is backed up.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Canonical provider ids recognized by the router config.
///
/// Must stay in sync with the adapter registry in `freja-model`; the registry
/// has a test asserting exactly that.
pub const PROVIDER_IDS: &[&str] = &[
    "openai", "groq", "mistral", "deepseek", "anthropic", "gemini", "codex",
];

/// Map a possibly-legacy provider id to its canonical form.
///
/// Returns `None` for ids that are neither canonical nor a known alias.
pub fn known_provider_id(id: &str) -> Option<&'static str> {
    let id = id.trim().to_ascii_lowercase();
    let canonical = match id.as_str() {
        // Renamed providers from earlier releases.
        "google" | "googleai" => "gemini",
        "oai" => "openai",
        "claude" => "anthropic",
        other => other,
    };
    PROVIDER_IDS.iter().copied().find(|p| *p == canonical)
}

fn default_true() -> bool {
    true
}

fn default_auto() -> String {
    "auto".into()
}

// ─── Router config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRouteMode {
    #[default]
    Auto,
    Fixed,
}

/// Per-provider routing preference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderRouteConfig {
    #[serde(default)]
    pub mode: ProviderRouteMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_model_id: Option<String>,
}

/// A sticky provider selection made from the CLI (`/openai`, `use mistral`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectedOverride {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub mode: ProviderRouteMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_model_id: Option<String>,
}

/// The provider/model pair that most recently produced a successful answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LastUsed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// Persistent routing preferences (`ai-router.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// `"auto"` or a canonical provider id.
    #[serde(default = "default_auto")]
    pub default_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderRouteConfig>,
    #[serde(default)]
    pub selected_override: SelectedOverride,
    #[serde(default)]
    pub last_used: LastUsed,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_provider: default_auto(),
            providers: HashMap::new(),
            selected_override: SelectedOverride::default(),
            last_used: LastUsed::default(),
        }
    }
}

impl RouterConfig {
    /// Rewrite the record into canonical form.  Idempotent.
    ///
    /// - unknown / legacy provider ids collapse to `"auto"` (or are dropped
    ///   from the per-provider map)
    /// - `fixed` mode without a model id degrades to `auto`
    /// - an override pointing at an unknown provider is disabled
    pub fn normalize(mut self) -> Self {
        self.default_provider = match known_provider_id(&self.default_provider) {
            Some(id) => id.to_string(),
            None => default_auto(),
        };

        let mut providers = HashMap::new();
        for (id, mut cfg) in self.providers.drain() {
            let Some(canonical) = known_provider_id(&id) else {
                continue;
            };
            if cfg.mode == ProviderRouteMode::Fixed && cfg.fixed_model_id.is_none() {
                cfg.mode = ProviderRouteMode::Auto;
            }
            if cfg.mode == ProviderRouteMode::Auto {
                cfg.fixed_model_id = None;
            }
            providers.insert(canonical.to_string(), cfg);
        }
        self.providers = providers;

        let ov = &mut self.selected_override;
        ov.provider = ov
            .provider
            .as_deref()
            .and_then(known_provider_id)
            .map(|s| s.to_string());
        if ov.provider.is_none() {
            ov.enabled = false;
        }
        if ov.mode == ProviderRouteMode::Fixed && ov.fixed_model_id.is_none() {
            ov.mode = ProviderRouteMode::Auto;
        }
        if ov.mode == ProviderRouteMode::Auto {
            ov.fixed_model_id = None;
        }

        self.last_used.provider = self
            .last_used
            .provider
            .as_deref()
            .and_then(known_provider_id)
            .map(|s| s.to_string());
        if self.last_used.provider.is_none() {
            self.last_used.model_id = None;
        }

        self
    }
}

// ─── Scheduler config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTarget {
    Economy,
    #[default]
    Balanced,
    High,
}

impl QualityTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e" | "economy" => Some(Self::Economy),
            "b" | "balanced" => Some(Self::Balanced),
            "h" | "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Balanced => "balanced",
            Self::High => "high",
        }
    }
}

/// Cost/quality scheduler settings (`scheduler-config.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub quality_target: QualityTarget,
    /// Soft per-task budget in USD.  Affects candidate ordering only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_usd_per_task: Option<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quality_target: QualityTarget::Balanced,
            max_usd_per_task: None,
        }
    }
}

impl SchedulerConfig {
    /// Clamp invalid budgets.  Idempotent.
    pub fn normalize(mut self) -> Self {
        if let Some(b) = self.max_usd_per_task {
            if !b.is_finite() || b <= 0.0 {
                self.max_usd_per_task = None;
            }
        }
        self
    }
}

// ─── Policy config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Strict,
    #[default]
    Balanced,
    Relaxed,
}

impl PolicyMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "balanced" => Some(Self::Balanced),
            "relaxed" => Some(Self::Relaxed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Balanced => "balanced",
            Self::Relaxed => "relaxed",
        }
    }
}

/// Which command classes require an explicit user confirmation phrase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmTargets {
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub deploy: bool,
    #[serde(default)]
    pub workspace_write: bool,
}

impl ConfirmTargets {
    /// Mode presets: strict enables everything, balanced guards workspace
    /// writes, relaxed guards nothing.
    pub fn preset(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::Strict => Self {
                download: true,
                install: true,
                deploy: true,
                workspace_write: true,
            },
            PolicyMode::Balanced => Self {
                workspace_write: true,
                ..Self::default()
            },
            PolicyMode::Relaxed => Self::default(),
        }
    }
}

/// Command/filesystem policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub read_only_workspace: bool,
    #[serde(default)]
    pub require_confirmation: ConfirmTargets,
    /// User-supplied deny regexes, evaluated in order after the builtin
    /// harmful patterns.
    #[serde(default)]
    pub blocked_command_patterns: Vec<String>,
    /// Root under which write-verb commands are policed.
    #[serde(default = "default_workspace_root")]
    pub protected_workspace_root: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mode = PolicyMode::Balanced;
        Self {
            enabled: true,
            mode,
            read_only_workspace: false,
            require_confirmation: ConfirmTargets::preset(mode),
            blocked_command_patterns: Vec::new(),
            protected_workspace_root: default_workspace_root(),
        }
    }
}

impl PolicyConfig {
    /// Drop unusable entries.  Idempotent.
    ///
    /// Invalid regexes are removed here rather than at match time so a bad
    /// `/policy block <re>` can never silently disable the whole list.
    pub fn normalize(mut self) -> Self {
        self.blocked_command_patterns.retain(|p| !p.trim().is_empty());
        self.blocked_command_patterns.dedup();
        if self.protected_workspace_root.as_os_str().is_empty() {
            self.protected_workspace_root = default_workspace_root();
        }
        self
    }

    /// Switch mode and re-apply its confirmation preset.
    pub fn apply_mode(&mut self, mode: PolicyMode) {
        self.mode = mode;
        self.require_confirmation = ConfirmTargets::preset(mode);
        self.read_only_workspace = mode == PolicyMode::Strict;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
