// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal Telegram Bot API client.
//!
//! Long polling with an 8 s server-side timeout and a 10 s HTTP timeout;
//! batches are capped at 50 updates.  Outgoing messages are chunked to the
//! Bot API limit by [`chunk_text`].

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Server-side long-poll timeout.
const POLL_TIMEOUT_S: u64 = 8;
/// Whole-request timeout, strictly above the long-poll window.
const HTTP_TIMEOUT_S: u64 = 10;
/// Updates per batch.
const POLL_LIMIT: u8 = 50;
/// Telegram message size limit we chunk against.
pub const MESSAGE_CHUNK_CHARS: usize = 4000;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub voice: Option<FileRef>,
    #[serde(default)]
    pub audio: Option<FileRef>,
    #[serde(default)]
    pub video: Option<FileRef>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "Option::default")]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TelegramApi {
    base: String,
    file_base: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(token: &str) -> Self {
        Self::with_base(&format!("https://api.telegram.org/bot{token}"), &format!(
            "https://api.telegram.org/file/bot{token}"
        ))
    }

    /// Explicit endpoints, used by tests against a local stub.
    pub fn with_base(base: &str, file_base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            file_base: file_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_S))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<T> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("telegram {method} failed"))?;
        let reply: ApiReply<T> = resp
            .json()
            .await
            .with_context(|| format!("decoding telegram {method} reply"))?;
        if !reply.ok {
            bail!(
                "telegram {method}: {}",
                reply.description.unwrap_or_else(|| "unknown error".into())
            );
        }
        reply.result.context("telegram reply missing result")
    }

    pub async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Update>> {
        debug!(offset, "polling updates");
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_S,
                "limit": POLL_LIMIT,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    /// Send one message; the text must already fit one chunk.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<i64> {
        let sent: SentMessage = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(sent.message_id)
    }

    /// Send long text in order, chunked to the API limit.  Returns the last
    /// message id.
    pub async fn send_chunked(&self, chat_id: i64, text: &str) -> anyhow::Result<i64> {
        let mut last = 0;
        for chunk in chunk_text(text, MESSAGE_CHUNK_CHARS) {
            last = self.send_message(chat_id, &chunk).await?;
        }
        Ok(last)
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    /// Download a file blob by its file id.
    pub async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let info: FileInfo = self.call("getFile", json!({ "file_id": file_id })).await?;
        let path = info.file_path.context("file has no path")?;
        let resp = self
            .client
            .get(format!("{}/{}", self.file_base, path))
            .send()
            .await
            .context("downloading telegram file")?;
        if !resp.status().is_success() {
            bail!("telegram file download failed: {}", resp.status());
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Split text into chunks of at most `cap` characters, preferring newline
/// boundaries.
pub fn chunk_text(text: &str, cap: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.chars().count() <= cap {
            chunks.push(rest.to_string());
            break;
        }
        let hard_end = rest
            .char_indices()
            .nth(cap)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        // Prefer breaking on the last newline inside the window.
        let cut = rest[..hard_end].rfind('\n').map(|i| i + 1).unwrap_or(hard_end);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.trim_end_matches('\n').to_string());
        rest = tail;
    }
    chunks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
