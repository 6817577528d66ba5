// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Subprocess runtime driver.
//!
//! Spawns the external `codex` binary per prompt.  stdout/stderr lines are
//! forwarded to the caller's progress callback as they arrive; the final
//! message is read from a temp file the runtime writes via
//! `--output-last-message`.  The temp file is removed and the child killed
//! on every exit path.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::provider::{ChatProvider, InvokeOptions, ProviderId, ResponseStream};
use crate::types::{ModelDescriptor, StreamEvent, TokenUsage};

pub struct ExecRuntimeProvider {
    model: ModelDescriptor,
    binary: String,
    home: PathBuf,
}

impl ExecRuntimeProvider {
    pub fn new(model: ModelDescriptor) -> Self {
        let binary = std::env::var("FREJA_CODEX_BIN").unwrap_or_else(|_| "codex".into());
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            model,
            binary,
            home,
        }
    }

    pub fn with_home(model: ModelDescriptor, binary: impl Into<String>, home: PathBuf) -> Self {
        Self {
            model,
            binary: binary.into(),
            home,
        }
    }

    /// The runtime is available when its binary resolves on PATH.
    pub fn runtime_available() -> bool {
        let binary = std::env::var("FREJA_CODEX_BIN").unwrap_or_else(|_| "codex".into());
        if binary.contains('/') {
            return std::path::Path::new(&binary).is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(&binary).is_file())
            })
            .unwrap_or(false)
    }

    /// Argument vector for one invocation, with the output file path injected.
    fn build_args(&self, prompt: &str, last_message_path: &str) -> Vec<String> {
        let home = self.home.to_string_lossy().to_string();
        vec![
            "exec".into(),
            "-c".into(),
            "mcp_servers={}".into(),
            "--sandbox".into(),
            "workspace-write".into(),
            "--ephemeral".into(),
            "--skip-git-repo-check".into(),
            "--add-dir".into(),
            home.clone(),
            "--color".into(),
            "never".into(),
            "--output-last-message".into(),
            last_message_path.into(),
            "--model".into(),
            self.model.id.clone(),
            "--cd".into(),
            home,
            prompt.into(),
        ]
    }
}

#[async_trait]
impl ChatProvider for ExecRuntimeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Codex
    }

    fn model_id(&self) -> &str {
        &self.model.id
    }

    fn resolve_base_url(&self) -> String {
        self.binary.clone()
    }

    async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> anyhow::Result<ResponseStream> {
        // NamedTempFile removes the file on drop, covering every exit path.
        let last_message = tempfile::NamedTempFile::new().context("creating output temp file")?;
        let last_message_path = last_message.path().to_string_lossy().to_string();

        let args = self.build_args(prompt, &last_message_path);
        debug!(binary = %self.binary, model = %self.model.id, "spawning runtime");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.binary))?;

        let stdout = child.stdout.take().context("runtime stdout unavailable")?;
        let stderr = child.stderr.take().context("runtime stderr unavailable")?;

        // Forward progress lines as they arrive; the final answer comes from
        // the temp file, not from stdout.
        let progress = opts.progress.clone();
        let out_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &progress {
                    cb(&line);
                }
            }
        });
        let progress = opts.progress.clone();
        let err_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &progress {
                    cb(&line);
                }
            }
        });

        let status = child.wait().await.context("waiting for runtime")?;
        let _ = out_task.await;
        let _ = err_task.await;

        if !status.success() {
            bail!(
                "runtime exited with {}",
                status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
            );
        }

        let text = std::fs::read_to_string(last_message.path())
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            bail!("runtime produced no final message");
        }

        let usage = TokenUsage::estimate(prompt, &text);
        let events = vec![
            Ok(StreamEvent::Delta(text)),
            Ok(StreamEvent::Usage(usage)),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
