// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-chat provider lock state.
//!
//! A chat is either in auto mode or locked to a provider (and optionally a
//! model).  Locks are set by provider phrases and cleared by `/clear` or
//! `/back`.  While locked, routing for that chat bypasses auto-ordering
//! entirely.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use freja_config::{ProviderRouteMode, RouterConfig};
use freja_model::ProviderId;

#[derive(Debug, Clone)]
pub struct ChatState {
    pub provider: Option<ProviderId>,
    pub model_id: Option<String>,
    pub last_update_at: DateTime<Utc>,
}

/// Chat-id keyed lock table.  Mutations are serialized by the poll loop;
/// the mutex guards the occasional cross-task read.
#[derive(Default)]
pub struct ChatStates {
    map: Mutex<HashMap<i64, ChatState>>,
}

impl ChatStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_provider(&self, chat_id: i64, provider: ProviderId, model_id: Option<String>) {
        let mut map = self.map.lock().unwrap();
        map.insert(
            chat_id,
            ChatState {
                provider: Some(provider),
                model_id,
                last_update_at: Utc::now(),
            },
        );
    }

    /// `/clear` and `/back` return the chat to auto routing.
    pub fn clear(&self, chat_id: i64) {
        self.map.lock().unwrap().remove(&chat_id);
    }

    pub fn get(&self, chat_id: i64) -> Option<ChatState> {
        self.map.lock().unwrap().get(&chat_id).cloned()
    }

    pub fn touch(&self, chat_id: i64) {
        if let Some(s) = self.map.lock().unwrap().get_mut(&chat_id) {
            s.last_update_at = Utc::now();
        }
    }

    /// Router config honoring this chat's lock; `base` supplies everything
    /// else.  Auto-mode chats get `base` unchanged.
    pub fn router_config_for(&self, chat_id: i64, base: &RouterConfig) -> RouterConfig {
        let mut cfg = base.clone();
        if let Some(state) = self.get(chat_id) {
            if let Some(provider) = state.provider {
                cfg.selected_override.enabled = true;
                cfg.selected_override.provider = Some(provider.as_str().to_string());
                match &state.model_id {
                    Some(m) => {
                        cfg.selected_override.mode = ProviderRouteMode::Fixed;
                        cfg.selected_override.fixed_model_id = Some(m.clone());
                    }
                    None => {
                        cfg.selected_override.mode = ProviderRouteMode::Auto;
                        cfg.selected_override.fixed_model_id = None;
                    }
                }
            }
        }
        cfg
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocked_chat_has_no_state() {
        let states = ChatStates::new();
        assert!(states.get(7).is_none());
    }

    #[test]
    fn lock_then_get_round_trips() {
        let states = ChatStates::new();
        states.lock_provider(7, ProviderId::Mistral, Some("mistral-small-latest".into()));
        let s = states.get(7).unwrap();
        assert_eq!(s.provider, Some(ProviderId::Mistral));
        assert_eq!(s.model_id.as_deref(), Some("mistral-small-latest"));
    }

    #[test]
    fn clear_returns_chat_to_auto() {
        let states = ChatStates::new();
        states.lock_provider(7, ProviderId::Openai, None);
        states.clear(7);
        assert!(states.get(7).is_none());
    }

    #[test]
    fn locks_are_per_chat() {
        let states = ChatStates::new();
        states.lock_provider(1, ProviderId::Groq, None);
        assert!(states.get(2).is_none());
    }

    #[test]
    fn router_config_for_locked_chat_enables_override() {
        let states = ChatStates::new();
        states.lock_provider(7, ProviderId::Anthropic, Some("claude-haiku-4-5".into()));
        let cfg = states.router_config_for(7, &RouterConfig::default());
        assert!(cfg.selected_override.enabled);
        assert_eq!(cfg.selected_override.provider.as_deref(), Some("anthropic"));
        assert_eq!(cfg.selected_override.mode, ProviderRouteMode::Fixed);
        assert_eq!(
            cfg.selected_override.fixed_model_id.as_deref(),
            Some("claude-haiku-4-5")
        );
    }

    #[test]
    fn router_config_without_model_stays_auto_mode() {
        let states = ChatStates::new();
        states.lock_provider(7, ProviderId::Gemini, None);
        let cfg = states.router_config_for(7, &RouterConfig::default());
        assert!(cfg.selected_override.enabled);
        assert_eq!(cfg.selected_override.mode, ProviderRouteMode::Auto);
        assert!(cfg.selected_override.fixed_model_id.is_none());
    }

    #[test]
    fn router_config_for_unlocked_chat_is_base() {
        let states = ChatStates::new();
        let base = RouterConfig::default();
        let cfg = states.router_config_for(7, &base);
        assert_eq!(cfg, base);
    }

    #[test]
    fn relock_replaces_previous_lock() {
        let states = ChatStates::new();
        states.lock_provider(7, ProviderId::Openai, Some("gpt-4o".into()));
        states.lock_provider(7, ProviderId::Groq, None);
        let s = states.get(7).unwrap();
        assert_eq!(s.provider, Some(ProviderId::Groq));
        assert!(s.model_id.is_none());
    }
}
