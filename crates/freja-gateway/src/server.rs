// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Embedded HTTP server exposing live runs.
//!
//! Routes:
//! - `GET /health` — liveness + run count
//! - `GET /telegram/live/<id>` — HTML view (newest 50 events first)
//! - `GET /telegram/live/<id>.json` — JSON dump with composed share link
//!
//! Share links are composed in preference order: the public base URL from
//! the environment, the loopback address, then up to three LAN IPv4
//! interface addresses.

use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use tracing::info;

use crate::live_run::{LiveRun, LiveRunRegistry};

/// Default listen port; `FREJA_LIVE_PORT` overrides.
pub const DEFAULT_PORT: u16 = 4173;

/// Events shown on the HTML view.
const HTML_EVENT_LIMIT: usize = 50;

pub fn resolve_port() -> u16 {
    std::env::var("FREJA_LIVE_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[derive(Clone)]
struct AppState {
    registry: Arc<LiveRunRegistry>,
    port: u16,
}

/// Run the server until the process exits.
pub async fn serve(registry: Arc<LiveRunRegistry>, port: u16) -> anyhow::Result<()> {
    let state = AppState { registry, port };
    let app = Router::new()
        .route("/health", get(health))
        .route("/telegram/live/:id", get(live_view))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "live-run server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "runs": state.registry.len() }))
}

async fn live_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let (id, want_json) = match id.strip_suffix(".json") {
        Some(stripped) => (stripped.to_string(), true),
        None => (id, false),
    };

    let Some(run) = state.registry.snapshot(&id) else {
        return (StatusCode::NOT_FOUND, "run not found").into_response();
    };

    if want_json {
        let link = share_links(&run.id, state.port)
            .into_iter()
            .next()
            .unwrap_or_default();
        let mut v = serde_json::to_value(&run).unwrap_or_else(|_| json!({}));
        v["share_link"] = json!(link);
        Json(v).into_response()
    } else {
        Html(render_html(&run)).into_response()
    }
}

/// Candidate share URLs in preference order, deduped.
pub fn share_links(run_id: &str, port: u16) -> Vec<String> {
    let path = format!("/telegram/live/{run_id}");
    let mut links: Vec<String> = Vec::new();

    if let Ok(base) = std::env::var("FREJA_PUBLIC_BASE_URL") {
        let base = base.trim_end_matches('/');
        if !base.is_empty() {
            links.push(format!("{base}{path}"));
        }
    }
    links.push(format!("http://127.0.0.1:{port}{path}"));
    for ip in lan_ipv4_addresses().into_iter().take(3) {
        links.push(format!("http://{ip}:{port}{path}"));
    }

    let mut deduped: Vec<String> = Vec::new();
    for l in links {
        if !deduped.contains(&l) {
            deduped.push(l);
        }
    }
    deduped
}

fn lan_ipv4_addresses() -> Vec<Ipv4Addr> {
    let Ok(ifaces) = if_addrs::get_if_addrs() else {
        return Vec::new();
    };
    ifaces
        .into_iter()
        .filter(|i| !i.is_loopback())
        .filter_map(|i| match i.addr {
            if_addrs::IfAddr::V4(a) => Some(a.ip),
            _ => None,
        })
        .collect()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_html(run: &LiveRun) -> String {
    let events: Vec<String> = run
        .events
        .iter()
        .rev()
        .take(HTML_EVENT_LIMIT)
        .map(|e| {
            format!(
                "<li><span class=\"t\">{}</span> {}</li>",
                e.at.format("%H:%M:%S"),
                escape_html(&e.text)
            )
        })
        .collect();

    let result_section = match (&run.result_preview, &run.error) {
        (Some(r), _) => format!("<h2>Result</h2><pre>{}</pre>", escape_html(r)),
        (None, Some(e)) => format!("<h2>Error</h2><pre>{}</pre>", escape_html(e)),
        _ => String::new(),
    };

    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"3\">\
         <title>freja live run</title>\
         <style>body{{font-family:monospace;margin:2em;max-width:60em}}\
         .t{{color:#888}}pre{{white-space:pre-wrap}}</style></head><body>\
         <h1>{actor}</h1>\
         <p><b>status:</b> {status} {detail}</p>\
         <h2>Prompt</h2><pre>{prompt}</pre>\
         {result}\
         <h2>Events</h2><ul>{events}</ul>\
         </body></html>",
        actor = escape_html(&run.actor),
        status = escape_html(&run.status),
        detail = escape_html(&run.detail),
        prompt = escape_html(&run.prompt),
        result = result_section,
        events = events.join("\n"),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_events(n: usize) -> LiveRun {
        let reg = LiveRunRegistry::new();
        let id = reg.create(1, "the prompt", "OpenAI: GPT-4o");
        for i in 0..n {
            reg.push_event(&id, &format!("event {i}"));
        }
        reg.snapshot(&id).unwrap()
    }

    #[test]
    fn html_shows_newest_events_first_capped_at_50() {
        let run = run_with_events(80);
        let html = render_html(&run);
        assert!(html.contains("event 79"), "newest event shown");
        assert!(!html.contains("event 10</li>"), "old events beyond 50 hidden");
        let newest = html.find("event 79").unwrap();
        let older = html.find("event 50").unwrap();
        assert!(newest < older, "events are reverse chronological");
    }

    #[test]
    fn html_escapes_untrusted_text() {
        let reg = LiveRunRegistry::new();
        let id = reg.create(1, "<script>alert(1)</script>", "a");
        let run = reg.snapshot(&id).unwrap();
        let html = render_html(&run);
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn html_shows_result_when_completed() {
        let reg = LiveRunRegistry::new();
        let id = reg.create(1, "p", "a");
        reg.complete(&id, "final words");
        let html = render_html(&reg.snapshot(&id).unwrap());
        assert!(html.contains("<h2>Result</h2>"));
        assert!(html.contains("final words"));
    }

    #[test]
    fn html_shows_error_when_failed() {
        let reg = LiveRunRegistry::new();
        let id = reg.create(1, "p", "a");
        reg.fail(&id, "exploded");
        let html = render_html(&reg.snapshot(&id).unwrap());
        assert!(html.contains("<h2>Error</h2>"));
        assert!(html.contains("exploded"));
    }

    #[test]
    fn share_links_start_with_loopback_without_public_base() {
        // The public base env var is not set in tests.
        std::env::remove_var("FREJA_PUBLIC_BASE_URL");
        let links = share_links("abc123", 4173);
        assert_eq!(links[0], "http://127.0.0.1:4173/telegram/live/abc123");
    }

    #[test]
    fn share_links_are_deduped() {
        std::env::remove_var("FREJA_PUBLIC_BASE_URL");
        let links = share_links("abc", 4173);
        let mut seen = std::collections::HashSet::new();
        for l in &links {
            assert!(seen.insert(l.clone()), "duplicate link {l}");
        }
    }

    #[test]
    fn share_links_cap_lan_addresses_at_three() {
        std::env::remove_var("FREJA_PUBLIC_BASE_URL");
        let links = share_links("abc", 4173);
        // loopback + at most 3 LAN entries
        assert!(links.len() <= 4);
    }

    #[test]
    fn resolve_port_defaults_without_env() {
        std::env::remove_var("FREJA_LIVE_PORT");
        assert_eq!(resolve_port(), DEFAULT_PORT);
    }
}
