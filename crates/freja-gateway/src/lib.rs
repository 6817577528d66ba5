// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod live_run;
pub mod server;

pub use live_run::{LiveRun, LiveRunRegistry, RunEvent};
pub use server::{resolve_port, serve, share_links, DEFAULT_PORT};
