// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod generative;
mod exec;
mod messages;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use exec::ExecRuntimeProvider;
pub use messages::MessagesProvider;
pub use mock::{ScriptedMockProvider, ScriptedReply};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{
    ChatProvider, Credential, InvokeOptions, ProgressFn, ProviderId, ResponseStream, WireProtocol,
};
pub use types::{approx_tokens, InputModality, ModelDescriptor, StreamEvent, TokenUsage};

use anyhow::Context;

/// Construct the adapter for a (provider, model, credential) triple.
///
/// The wire protocol is selected by the provider id; the credential must
/// have been resolved immediately beforehand (handles are not cached across
/// prompts).
pub fn adapter_for(
    provider: ProviderId,
    model: ModelDescriptor,
    cred: &Credential,
) -> anyhow::Result<Box<dyn ChatProvider>> {
    match provider.wire_protocol() {
        WireProtocol::OpenAiCompat => {
            let key = cred
                .api_key
                .clone()
                .with_context(|| format!("no credential for {provider}"))?;
            Ok(Box::new(OpenAiCompatProvider::new(
                provider,
                model,
                key,
                cred.base_url.clone(),
            )))
        }
        WireProtocol::Messages => {
            let key = cred
                .api_key
                .clone()
                .context("no credential for anthropic")?;
            Ok(Box::new(MessagesProvider::new(
                model,
                key,
                cred.base_url.clone(),
            )))
        }
        WireProtocol::GenerativeSse => {
            let key = cred.api_key.clone().context("no credential for gemini")?;
            Ok(Box::new(GenerativeProvider::new(
                model,
                key,
                cred.base_url.clone(),
            )))
        }
        WireProtocol::Exec => Ok(Box::new(ExecRuntimeProvider::new(model))),
    }
}

use generative::GenerativeProvider;

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cred() -> Credential {
        Credential {
            api_key: Some("k".into()),
            base_url: None,
        }
    }

    #[test]
    fn adapter_for_every_provider_constructs() {
        for id in ProviderId::all() {
            let model = catalog::default_model(*id).unwrap();
            let adapter = adapter_for(*id, model, &cred()).unwrap();
            assert_eq!(adapter.id(), *id);
        }
    }

    #[test]
    fn adapter_for_openai_without_key_fails() {
        let model = catalog::default_model(ProviderId::Openai).unwrap();
        let err = adapter_for(ProviderId::Openai, model, &Credential::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("no credential"));
    }

    #[test]
    fn adapter_for_codex_needs_no_key() {
        let model = catalog::default_model(ProviderId::Codex).unwrap();
        assert!(adapter_for(ProviderId::Codex, model, &Credential::default()).is_ok());
    }

    #[test]
    fn adapter_model_name_uses_catalog_display_name() {
        let model = catalog::default_model(ProviderId::Anthropic).unwrap();
        let adapter = adapter_for(ProviderId::Anthropic, model, &cred()).unwrap();
        assert_eq!(adapter.model_name(), "Claude Sonnet 4.5");
    }
}
