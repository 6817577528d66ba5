// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod score;
pub mod telemetry;

pub use score::{complexity, estimated_task_cost, reorder, score, ScoredCandidate};
pub use telemetry::{estimate_cost, leaderboard, record, tail, LeaderboardRow, TelemetryEntry};
