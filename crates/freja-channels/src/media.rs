// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Media fan-out: photo/voice/video blobs go to an external understanding
//! collaborator, whose output is folded into a routed prompt.

use async_trait::async_trait;

use crate::api::PhotoSize;

/// What the video collaborator extracts from a clip.
#[derive(Debug, Clone, Default)]
pub struct VideoInsights {
    pub metadata_summary: String,
    pub transcript: Option<String>,
    pub visual_summary: Option<String>,
    pub direct_video_summary: Option<String>,
}

/// External media understanding collaborator.
#[async_trait]
pub trait MediaUnderstanding: Send + Sync {
    async fn analyze_image(&self, blob: &[u8]) -> anyhow::Result<String>;
    async fn transcribe(&self, blob: &[u8]) -> anyhow::Result<String>;
    async fn decode_video(&self, blob: &[u8]) -> anyhow::Result<VideoInsights>;
}

/// Used when no collaborator is configured; every request fails cleanly and
/// the chat gets a plain notice instead of an answer.
pub struct NoMedia;

#[async_trait]
impl MediaUnderstanding for NoMedia {
    async fn analyze_image(&self, _blob: &[u8]) -> anyhow::Result<String> {
        anyhow::bail!("image analysis is not configured")
    }
    async fn transcribe(&self, _blob: &[u8]) -> anyhow::Result<String> {
        anyhow::bail!("transcription is not configured")
    }
    async fn decode_video(&self, _blob: &[u8]) -> anyhow::Result<VideoInsights> {
        anyhow::bail!("video understanding is not configured")
    }
}

/// Highest-resolution photo size: file_size desc, then pixel area desc.
pub fn pick_best_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes.iter().max_by(|a, b| {
        a.file_size
            .unwrap_or(0)
            .cmp(&b.file_size.unwrap_or(0))
            .then((a.width as u64 * a.height as u64).cmp(&(b.width as u64 * b.height as u64)))
    })
}

// ── Prompt composition ────────────────────────────────────────────────────────

pub fn compose_photo_prompt(analysis: &str, caption: Option<&str>) -> String {
    format!(
        "User sent a photo. Image analysis:\n{analysis}\n\nUser request: {}",
        caption.unwrap_or("Describe the photo and respond helpfully.")
    )
}

pub fn compose_voice_prompt(transcript: &str, caption: Option<&str>) -> String {
    format!(
        "User sent a voice message. Transcript:\n{transcript}\n\nUser request: {}",
        caption.unwrap_or(transcript)
    )
}

pub fn compose_video_prompt(insights: &VideoInsights, caption: Option<&str>) -> String {
    let mut layers = vec![format!("Video metadata: {}", insights.metadata_summary)];
    if let Some(t) = &insights.transcript {
        layers.push(format!("Audio transcript:\n{t}"));
    }
    if let Some(v) = &insights.visual_summary {
        layers.push(format!("Visual summary:\n{v}"));
    }
    if let Some(d) = &insights.direct_video_summary {
        layers.push(format!("Direct video summary:\n{d}"));
    }
    format!(
        "User sent a video.\n{}\n\nUser request: {}",
        layers.join("\n\n"),
        caption.unwrap_or("Summarize the video and respond helpfully.")
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
