// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod schema;
pub mod store;

pub use schema::{
    known_provider_id, ConfirmTargets, LastUsed, PolicyConfig, PolicyMode, ProviderRouteConfig,
    ProviderRouteMode, QualityTarget, RouterConfig, SchedulerConfig, SelectedOverride,
    PROVIDER_IDS,
};
pub use store::Store;
