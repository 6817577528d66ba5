// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The interactive REPL: slash commands and prompt dispatch.
//!
//! Unrecognized input starting with `/` is rejected; anything else goes
//! through the execution pipeline.  Command handlers return the text to
//! print, so they stay unit-testable without a terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use freja_config::{PolicyMode, QualityTarget, Store};
use freja_core::{classify, ActionEvent, Intent, Pipeline, Router, SessionStatus};
use freja_gateway::LiveRunRegistry;
use freja_model::{InvokeOptions, ProviderId};

pub enum ReplAction {
    Continue,
    Exit,
}

pub struct Repl {
    pub store: Store,
    pub router: Arc<Router>,
    pub pipeline: Arc<Pipeline>,
    pub registry: Arc<LiveRunRegistry>,
    stats_enabled: AtomicBool,
}

impl Repl {
    pub fn new(
        store: Store,
        router: Arc<Router>,
        pipeline: Arc<Pipeline>,
        registry: Arc<LiveRunRegistry>,
    ) -> Self {
        Self {
            store,
            router,
            pipeline,
            registry,
            stats_enabled: AtomicBool::new(false),
        }
    }

    /// Handle one input line.  The returned string is printed verbatim.
    pub async fn handle_line(&self, line: &str) -> (ReplAction, String) {
        let line = line.trim();
        if line.is_empty() {
            return (ReplAction::Continue, String::new());
        }

        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.split_whitespace();
            let head = parts.next().unwrap_or("");
            let args: Vec<&str> = parts.collect();
            match head {
                "exit" => return (ReplAction::Exit, "bye".into()),
                "clear" => {
                    return (ReplAction::Continue, "\x1b[2J\x1b[H".into());
                }
                "back" | "b" => {
                    return (ReplAction::Continue, self.cmd_back());
                }
                "executor" => {
                    return (
                        ReplAction::Continue,
                        self.cmd_executor(args.first() == Some(&"all")),
                    );
                }
                "scheduler" => {
                    return (ReplAction::Continue, self.cmd_scheduler(&args));
                }
                "policy" => {
                    return (ReplAction::Continue, self.cmd_policy(&args));
                }
                "eval" => {
                    return (ReplAction::Continue, self.cmd_eval(&args).await);
                }
                "stats" => {
                    let now = !self.stats_enabled.load(Ordering::SeqCst);
                    self.stats_enabled.store(now, Ordering::SeqCst);
                    return (
                        ReplAction::Continue,
                        format!("per-prompt stats {}", if now { "on" } else { "off" }),
                    );
                }
                "ai" | "model" | "connect" | "skills" => {
                    return (
                        ReplAction::Continue,
                        format!("/{head} opens an interactive flow; not available in this build"),
                    );
                }
                "telegram" => {
                    return (
                        ReplAction::Continue,
                        "telegram loop is managed at startup (set FREJA_TELEGRAM_BOT_TOKEN)".into(),
                    );
                }
                _ => {}
            }

            match classify(line) {
                // Provider slash forms set the sticky override.
                Intent::ProviderSlash {
                    provider,
                    model,
                    prompt,
                } => {
                    let note = self.lock_provider(provider, model);
                    return match prompt {
                        None => (ReplAction::Continue, note),
                        Some(p) => {
                            let answer = self.run_prompt(&p).await;
                            (ReplAction::Continue, format!("{note}\n{answer}"))
                        }
                    };
                }
                // `/cmd`, `/run`, `/shell`, `/fs` shell forms go to the
                // pipeline, which re-classifies and polices them.
                Intent::Shell { explicit: true, .. } => {
                    return (ReplAction::Continue, self.run_prompt(line).await);
                }
                _ => {
                    return (
                        ReplAction::Continue,
                        format!(
                            "unknown command: /{head} (try /scheduler, /policy, /eval, /executor)"
                        ),
                    );
                }
            }
        }

        (ReplAction::Continue, self.run_prompt(line).await)
    }

    async fn run_prompt(&self, prompt: &str) -> String {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ActionEvent>();
        let printer = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                match ev {
                    ActionEvent::Activity(a) => eprintln!("[{a}]"),
                    ActionEvent::Status(s) => eprintln!("  … {s}"),
                    // Deltas stream to stdout as they arrive.
                    ActionEvent::Delta(d) => {
                        use std::io::Write;
                        print!("{d}");
                        let _ = std::io::stdout().flush();
                    }
                    ActionEvent::Done => println!(),
                }
            }
        });

        let result = self.pipeline.handle(prompt, &tx).await;
        drop(tx);
        let _ = printer.await;

        match result {
            Ok(text) => {
                if self.stats_enabled.load(Ordering::SeqCst) {
                    format!("{text}\n{}", self.stats_line())
                } else {
                    text
                }
            }
            Err(e) => format!("freja > Error: {e}"),
        }
    }

    fn stats_line(&self) -> String {
        match freja_scheduler::tail(&self.store, 1).pop() {
            Some(e) => format!(
                "[{}:{} tokens={} cost=${:.6} latency={}ms]",
                e.provider, e.model_id, e.total_tokens, e.est_usd_cost, e.latency_ms
            ),
            None => "[no telemetry yet]".into(),
        }
    }

    fn lock_provider(&self, provider: ProviderId, model: Option<String>) -> String {
        let mut cfg = self.store.load_router_config();
        cfg.selected_override.enabled = true;
        cfg.selected_override.provider = Some(provider.as_str().to_string());
        match &model {
            Some(m) => {
                cfg.selected_override.mode = freja_config::ProviderRouteMode::Fixed;
                cfg.selected_override.fixed_model_id = Some(m.clone());
            }
            None => {
                cfg.selected_override.mode = freja_config::ProviderRouteMode::Auto;
                cfg.selected_override.fixed_model_id = None;
            }
        }
        if let Err(e) = self.store.save_router_config(&cfg) {
            return format!("failed to save router config: {e}");
        }
        format!(
            "Selected {} ({})",
            provider.display_name(),
            model.unwrap_or_else(|| "auto model".into())
        )
    }

    fn cmd_back(&self) -> String {
        let mut cfg = self.store.load_router_config();
        cfg.selected_override = Default::default();
        match self.store.save_router_config(&cfg) {
            Ok(()) => "Back to automatic routing.".into(),
            Err(e) => format!("failed to save router config: {e}"),
        }
    }

    // ── /executor ─────────────────────────────────────────────────────────────

    fn cmd_executor(&self, all: bool) -> String {
        let Some(session) = self.pipeline.executor_log.current_view() else {
            return "no executor sessions yet".into();
        };
        let status = match session.status {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        let mut out = vec![format!(
            "[{}] {} — {} ({})",
            session.started_at.format("%H:%M:%S"),
            session.actor,
            session.objective,
            status
        )];
        let events: Vec<_> = session.events.iter().collect();
        let shown = if all {
            events.as_slice()
        } else {
            &events[events.len().saturating_sub(10)..]
        };
        for e in shown {
            out.push(format!("  {} {}", e.at.format("%H:%M:%S"), e.summary));
        }
        if let Some(r) = &session.result_summary {
            out.push(format!("result: {r}"));
        }
        if let Some(e) = &session.error_message {
            out.push(format!("error: {e}"));
        }
        out.join("\n")
    }

    // ── /scheduler ────────────────────────────────────────────────────────────

    fn cmd_scheduler(&self, args: &[&str]) -> String {
        let mut cfg = self.store.load_scheduler_config();
        let reply = match args {
            [] => {
                let mut lines = vec![format!(
                    "scheduler: {} quality={} budget={}",
                    if cfg.enabled { "on" } else { "off" },
                    cfg.quality_target.as_str(),
                    cfg.max_usd_per_task
                        .map(|b| format!("${b}"))
                        .unwrap_or_else(|| "none".into()),
                )];
                for row in freja_scheduler::leaderboard(&self.store, 10) {
                    lines.push(format!(
                        "  {} runs={} success={:.0}% cost=${:.6} latency={:.0}ms",
                        row.key,
                        row.runs,
                        row.success_rate * 100.0,
                        row.avg_cost,
                        row.avg_latency_ms
                    ));
                }
                return lines.join("\n");
            }
            ["on"] => {
                cfg.enabled = true;
                "scheduler on".to_string()
            }
            ["off"] => {
                cfg.enabled = false;
                "scheduler off".to_string()
            }
            ["quality", q] => match QualityTarget::parse(q) {
                Some(t) => {
                    cfg.quality_target = t;
                    format!("quality target: {}", t.as_str())
                }
                None => return "usage: /scheduler quality <economy|balanced|high>".into(),
            },
            ["budget", "none"] => {
                cfg.max_usd_per_task = None;
                "budget cleared".to_string()
            }
            ["budget", usd] => match usd.parse::<f64>() {
                Ok(b) if b > 0.0 => {
                    cfg.max_usd_per_task = Some(b);
                    format!("budget: ${b} per task")
                }
                _ => return "usage: /scheduler budget <usd|none>".into(),
            },
            ["reset"] => {
                cfg = Default::default();
                "scheduler reset".to_string()
            }
            _ => {
                return "usage: /scheduler [on|off|quality <e/b/h>|budget <usd|none>|reset]".into()
            }
        };
        match self.store.save_scheduler_config(&cfg.normalize()) {
            Ok(()) => reply,
            Err(e) => format!("failed to save scheduler config: {e}"),
        }
    }

    // ── /policy ───────────────────────────────────────────────────────────────

    fn cmd_policy(&self, args: &[&str]) -> String {
        let mut cfg = self.store.load_policy_config();
        let reply = match args {
            [] => {
                return format!(
                    "policy: {} mode={} read_only={} confirm[download={} install={} deploy={} workspace_write={}] blocked={}",
                    if cfg.enabled { "on" } else { "off" },
                    cfg.mode.as_str(),
                    cfg.read_only_workspace,
                    cfg.require_confirmation.download,
                    cfg.require_confirmation.install,
                    cfg.require_confirmation.deploy,
                    cfg.require_confirmation.workspace_write,
                    cfg.blocked_command_patterns.len(),
                );
            }
            ["on"] => {
                cfg.enabled = true;
                "policy on".to_string()
            }
            ["off"] => {
                cfg.enabled = false;
                "policy off".to_string()
            }
            [mode @ ("strict" | "balanced" | "relaxed")] => {
                let m = PolicyMode::parse(mode).unwrap_or_default();
                cfg.apply_mode(m);
                format!("policy mode: {}", m.as_str())
            }
            ["confirm", target, flag @ ("on" | "off")] => {
                let on = *flag == "on";
                let c = &mut cfg.require_confirmation;
                match *target {
                    "download" => c.download = on,
                    "install" => c.install = on,
                    "deploy" => c.deploy = on,
                    "workspace-write" => c.workspace_write = on,
                    _ => {
                        return "usage: /policy confirm <download|install|deploy|workspace-write> <on|off>"
                            .into()
                    }
                }
                format!("confirm {target}: {flag}")
            }
            ["block", pattern] => {
                cfg.blocked_command_patterns.push(pattern.to_string());
                format!("blocked pattern added: {pattern}")
            }
            ["unblock", pattern] => {
                cfg.blocked_command_patterns.retain(|p| p != pattern);
                format!("blocked pattern removed: {pattern}")
            }
            ["reset"] => {
                cfg = Default::default();
                "policy reset".to_string()
            }
            _ => {
                return "usage: /policy [strict|balanced|relaxed|on|off|confirm <target> <on/off>|block <regex>|unblock <regex>|reset]"
                    .into()
            }
        };
        match self.store.save_policy_config(&cfg.normalize()) {
            Ok(()) => reply,
            Err(e) => format!("failed to save policy config: {e}"),
        }
    }

    // ── /eval ─────────────────────────────────────────────────────────────────

    async fn cmd_eval(&self, args: &[&str]) -> String {
        use freja_core::eval;
        match args.first().copied() {
            Some("init") => {
                let cases = eval::starter_cases();
                match eval::save_cases(&self.store, &cases) {
                    Ok(()) => format!("wrote {} starter cases", cases.len()),
                    Err(e) => format!("failed to write cases: {e}"),
                }
            }
            Some("run") => {
                if eval::is_blocked(&self.store) {
                    return "eval is blocked by a failing run; /eval unblock to continue".into();
                }
                let cases = eval::load_cases(&self.store);
                if cases.is_empty() {
                    return "no eval cases; run /eval init first".into();
                }
                let router_cfg = self.store.load_router_config();
                let sched_cfg = self.store.load_scheduler_config();
                let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
                let mut results = Vec::new();
                for case in &cases {
                    let started = std::time::Instant::now();
                    match self
                        .router
                        .route(
                            &case.prompt,
                            &router_cfg,
                            &sched_cfg,
                            &InvokeOptions::default(),
                            &tx,
                        )
                        .await
                    {
                        Ok(outcome) => {
                            let (passed, reasons) = eval::judge(case, &outcome.text);
                            results.push(eval::EvalResult {
                                id: case.id.clone(),
                                passed,
                                reasons,
                                provider: Some(outcome.provider),
                                model: Some(outcome.model_id),
                                latency_ms: outcome.latency_ms,
                            });
                        }
                        Err(e) => results.push(eval::EvalResult {
                            id: case.id.clone(),
                            passed: false,
                            reasons: vec![format!("routing error: {e}")],
                            provider: None,
                            model: None,
                            latency_ms: started.elapsed().as_millis() as u64,
                        }),
                    }
                }
                match eval::finish_run(&self.store, results) {
                    Ok(run) => format!(
                        "eval: {:.0}% pass ({} failed, {} blocked, threshold {:.0}%)",
                        run.pass_rate * 100.0,
                        run.failed,
                        run.blocked,
                        run.threshold * 100.0
                    ),
                    Err(e) => format!("failed to record eval run: {e}"),
                }
            }
            Some("leaderboard") => {
                let rows = freja_scheduler::leaderboard(&self.store, 10);
                if rows.is_empty() {
                    return "no telemetry yet".into();
                }
                rows.iter()
                    .map(|r| {
                        format!(
                            "{} success={:.0}% cost=${:.6}",
                            r.key,
                            r.success_rate * 100.0,
                            r.avg_cost
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Some("trend") => {
                let runs = eval::history(&self.store, 10);
                if runs.is_empty() {
                    return "no eval runs yet".into();
                }
                runs.iter()
                    .map(|r| format!("{} {:.0}%", r.at.format("%m-%d %H:%M"), r.pass_rate * 100.0))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Some("unblock") => match eval::unblock(&self.store) {
                Ok(()) => "eval unblocked".into(),
                Err(e) => format!("failed to unblock: {e}"),
            },
            _ => "usage: /eval [init|run|leaderboard|trend|unblock]".into(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
