// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The Telegram agent loop.
//!
//! One long-running task per bot token: long-poll updates, persist the
//! offset after each one, and dispatch.  Every routed interaction registers
//! a live run; the chat gets a share link, a placeholder message that is
//! edited as status flows in (throttled), and finally the answer in chunks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use freja_config::Store;
use freja_core::{classify, ActionEvent, Intent, Pipeline};
use freja_gateway::{share_links, LiveRunRegistry};
use freja_model::{Credential, ProviderId};

use crate::api::{Message, TelegramApi, Update};
use crate::chat_memory;
use crate::media::{
    compose_photo_prompt, compose_video_prompt, compose_voice_prompt, pick_best_photo,
    MediaUnderstanding, NoMedia,
};
use crate::state::ChatStates;

/// Pause before re-polling after a transport error.
const POLL_RETRY_MS: u64 = 900;
/// Minimum spacing between placeholder edits.
const EDIT_THROTTLE_MS: u64 = 700;

const HELP_TEXT: &str = "freja assistant\n\
    Send any prompt to get an answer.\n\
    /providers — provider auth status\n\
    /live — resend the latest live link\n\
    /clear or /back — return to automatic routing\n\
    Prefix with /openai, /mistral, … to lock a provider.";

pub struct AgentLoop {
    api: TelegramApi,
    store: Store,
    pipeline: Arc<Pipeline>,
    registry: Arc<LiveRunRegistry>,
    media: Arc<dyn MediaUnderstanding>,
    states: ChatStates,
    live_port: u16,
}

impl AgentLoop {
    pub fn new(
        api: TelegramApi,
        store: Store,
        pipeline: Arc<Pipeline>,
        registry: Arc<LiveRunRegistry>,
        live_port: u16,
    ) -> Self {
        Self {
            api,
            store,
            pipeline,
            registry,
            media: Arc::new(NoMedia),
            states: ChatStates::new(),
            live_port,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaUnderstanding>) -> Self {
        self.media = media;
        self
    }

    fn load_offset(&self) -> i64 {
        std::fs::read_to_string(self.store.telegram_offset_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn persist_offset(&self, offset: i64) {
        let path = self.store.telegram_offset_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, offset.to_string()) {
            warn!(error = %e, "failed to persist telegram offset");
        }
    }

    /// Poll forever.  Updates are processed in update_id order, one at a
    /// time, which also serializes all per-chat state mutations.
    pub async fn run(self: Arc<Self>) {
        let mut offset = self.load_offset();
        info!(offset, "telegram agent loop started");
        loop {
            match self.api.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = update.update_id + 1;
                        self.persist_offset(offset);
                        self.process_update(update).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "poll failed, retrying");
                    tokio::time::sleep(Duration::from_millis(POLL_RETRY_MS)).await;
                }
            }
        }
    }

    async fn process_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        if message.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
            return;
        }
        let chat_id = message.chat.id;
        self.states.touch(chat_id);

        let result = if message.photo.as_deref().map(|p| !p.is_empty()).unwrap_or(false) {
            self.handle_photo(&message).await
        } else if message.voice.is_some() || message.audio.is_some() {
            self.handle_voice(&message).await
        } else if message.video.is_some() {
            self.handle_video(&message).await
        } else if let Some(doc) = &message.document {
            match doc.mime_type.as_deref().unwrap_or("") {
                m if m.starts_with("image/") => self.handle_photo_blob(&message, &doc.file_id).await,
                m if m.starts_with("audio/") => self.handle_voice_blob(&message, &doc.file_id).await,
                m if m.starts_with("video/") => self.handle_video_blob(&message, &doc.file_id).await,
                _ => Ok(()),
            }
        } else if let Some(text) = message.text.clone() {
            self.handle_text(chat_id, &text).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            warn!(chat_id, error = %e, "update handling failed");
            let _ = self
                .api
                .send_message(chat_id, &format!("Error: {e}"))
                .await;
        }
    }

    // ── Media fan-out ─────────────────────────────────────────────────────────

    async fn handle_photo(&self, message: &Message) -> anyhow::Result<()> {
        let sizes = message.photo.clone().unwrap_or_default();
        let best = pick_best_photo(&sizes)
            .ok_or_else(|| anyhow::anyhow!("photo message without sizes"))?;
        self.handle_photo_blob(message, &best.file_id.clone()).await
    }

    async fn handle_photo_blob(&self, message: &Message, file_id: &str) -> anyhow::Result<()> {
        let blob = self.api.download_file(file_id).await?;
        let analysis = self.media.analyze_image(&blob).await?;
        let prompt = compose_photo_prompt(&analysis, message.caption.as_deref());
        self.route_and_reply(message.chat.id, "[photo]", &prompt).await
    }

    async fn handle_voice(&self, message: &Message) -> anyhow::Result<()> {
        let file_id = message
            .voice
            .as_ref()
            .or(message.audio.as_ref())
            .map(|f| f.file_id.clone())
            .ok_or_else(|| anyhow::anyhow!("voice message without file"))?;
        self.handle_voice_blob(message, &file_id).await
    }

    async fn handle_voice_blob(&self, message: &Message, file_id: &str) -> anyhow::Result<()> {
        let blob = self.api.download_file(file_id).await?;
        let transcript = self.media.transcribe(&blob).await?;
        let prompt = compose_voice_prompt(&transcript, message.caption.as_deref());
        self.route_and_reply(message.chat.id, "[voice]", &prompt).await
    }

    async fn handle_video(&self, message: &Message) -> anyhow::Result<()> {
        let file_id = message
            .video
            .as_ref()
            .map(|f| f.file_id.clone())
            .ok_or_else(|| anyhow::anyhow!("video message without file"))?;
        self.handle_video_blob(message, &file_id).await
    }

    async fn handle_video_blob(&self, message: &Message, file_id: &str) -> anyhow::Result<()> {
        let blob = self.api.download_file(file_id).await?;
        let insights = self.media.decode_video(&blob).await?;
        let prompt = compose_video_prompt(&insights, message.caption.as_deref());
        self.route_and_reply(message.chat.id, "[video]", &prompt).await
    }

    // ── Text ──────────────────────────────────────────────────────────────────

    async fn handle_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        match text.trim() {
            "/start" | "/help" => {
                self.api.send_message(chat_id, HELP_TEXT).await?;
                return Ok(());
            }
            "/providers" => {
                self.api
                    .send_message(chat_id, &provider_status_text())
                    .await?;
                return Ok(());
            }
            "/live" => {
                let reply = match self.registry.latest_for_chat(chat_id) {
                    Some(run) => live_link_text(&run.id, self.live_port),
                    None => "No live runs for this chat yet.".into(),
                };
                self.api.send_message(chat_id, &reply).await?;
                return Ok(());
            }
            "/clear" | "/back" => {
                self.states.clear(chat_id);
                self.api
                    .send_message(chat_id, "Back to automatic routing.")
                    .await?;
                return Ok(());
            }
            _ => {}
        }

        // Provider phrases mutate the chat lock.
        match classify(text) {
            Intent::ProviderSlash {
                provider,
                model,
                prompt,
            }
            | Intent::ProviderNatural {
                provider,
                model,
                prompt,
            } => {
                self.states.lock_provider(chat_id, provider, model.clone());
                match prompt {
                    None => {
                        let model_note = model
                            .map(|m| format!("model {m}"))
                            .unwrap_or_else(|| "auto model".into());
                        self.api
                            .send_message(
                                chat_id,
                                &format!(
                                    "Locked provider for this chat: {} ({model_note})",
                                    provider.display_name()
                                ),
                            )
                            .await?;
                        Ok(())
                    }
                    Some(p) => self.route_and_reply(chat_id, &p, &p).await,
                }
            }
            _ => self.route_and_reply(chat_id, text, text).await,
        }
    }

    /// Shared terminal path: live run + link, throttled placeholder edits,
    /// chunked final answer, chat memory append.
    async fn route_and_reply(
        &self,
        chat_id: i64,
        display_prompt: &str,
        routed_prompt: &str,
    ) -> anyhow::Result<()> {
        let run_id = self.registry.create(chat_id, display_prompt, "freja");
        self.api
            .send_message(chat_id, &live_link_text(&run_id, self.live_port))
            .await?;
        let placeholder_id = self
            .api
            .send_message(chat_id, "freja > Thinking: …")
            .await?;

        let (tx, rx) = mpsc::unbounded_channel::<ActionEvent>();
        let editor = tokio::spawn(placeholder_editor(
            self.api.clone(),
            self.registry.clone(),
            chat_id,
            placeholder_id,
            run_id.clone(),
            rx,
        ));

        let base = self.store.load_router_config();
        let locked = self.states.router_config_for(chat_id, &base);
        let sched = self.store.load_scheduler_config();

        let result = match classify(routed_prompt) {
            Intent::Chat | Intent::Shell { explicit: false, .. } => {
                self.pipeline.route_chat(routed_prompt, &locked, &sched, &tx).await
            }
            _ => self.pipeline.handle(routed_prompt, &tx).await,
        };
        drop(tx);
        let _ = editor.await;

        let _ = self.api.delete_message(chat_id, placeholder_id).await;

        match result {
            Ok(answer) => {
                self.registry.complete(&run_id, &answer);
                self.api.send_chunked(chat_id, &answer).await?;
                if let Err(e) = chat_memory::append_turn(&self.store, chat_id, display_prompt, &answer)
                {
                    debug!(error = %e, "chat memory append failed");
                }
                Ok(())
            }
            Err(e) => {
                self.registry.fail(&run_id, &e.to_string());
                self.api
                    .send_message(chat_id, &format!("freja > Error: {e}"))
                    .await?;
                Ok(())
            }
        }
    }
}

/// Drains action events into the live run and the placeholder message.
/// Edits are spaced at least [`EDIT_THROTTLE_MS`] apart.
async fn placeholder_editor(
    api: TelegramApi,
    registry: Arc<LiveRunRegistry>,
    chat_id: i64,
    placeholder_id: i64,
    run_id: String,
    mut rx: mpsc::UnboundedReceiver<ActionEvent>,
) {
    let mut actor = "freja".to_string();
    let mut last_edit = std::time::Instant::now() - Duration::from_millis(EDIT_THROTTLE_MS);
    let mut pending: Option<String> = None;

    while let Some(ev) = rx.recv().await {
        let line = match ev {
            ActionEvent::Activity(a) => {
                actor = a.clone();
                registry.set_status(&run_id, "running", &a);
                registry.push_event(&run_id, &format!("actor: {a}"));
                Some(format!("{actor} > Thinking: …"))
            }
            ActionEvent::Status(s) => {
                registry.push_event(&run_id, &s);
                Some(format!("{actor} > {s}"))
            }
            ActionEvent::Delta(_) => None,
            ActionEvent::Done => None,
        };
        if let Some(text) = line {
            if last_edit.elapsed() >= Duration::from_millis(EDIT_THROTTLE_MS) {
                if api
                    .edit_message_text(chat_id, placeholder_id, &text)
                    .await
                    .is_ok()
                {
                    last_edit = std::time::Instant::now();
                    pending = None;
                }
            } else {
                pending = Some(text);
            }
        }
    }
    // Flush the last suppressed edit so the placeholder isn't stale.
    if let Some(text) = pending {
        let _ = api.edit_message_text(chat_id, placeholder_id, &text).await;
    }
}

fn live_link_text(run_id: &str, port: u16) -> String {
    let links = share_links(run_id, port);
    format!("Live: {}", links.first().map(|s| s.as_str()).unwrap_or("unavailable"))
}

fn provider_status_text() -> String {
    let mut lines = vec!["Provider auth status:".to_string()];
    for p in ProviderId::all() {
        let ok = Credential::resolve(*p).is_some();
        lines.push(format!(
            "{} {} — {}",
            if ok { "✓" } else { "✗" },
            p.display_name(),
            if ok { "authenticated" } else { "no credential" }
        ));
    }
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_link_uses_first_share_link() {
        std::env::remove_var("FREJA_PUBLIC_BASE_URL");
        let text = live_link_text("abc", 4173);
        assert_eq!(text, "Live: http://127.0.0.1:4173/telegram/live/abc");
    }

    #[test]
    fn provider_status_lists_every_provider() {
        let text = provider_status_text();
        for p in ProviderId::all() {
            assert!(text.contains(p.display_name()), "missing {p}");
        }
    }

    #[test]
    fn provider_status_has_one_line_per_provider() {
        let text = provider_status_text();
        assert_eq!(text.lines().count(), 1 + ProviderId::all().len());
    }
}
