//! LLM provider implementations for Duet.
//!
//! Providers implement the `duet_core::Provider` trait. The collaborator
//! gateway only ever sees that trait; [`build_from_config`] picks the
//! concrete backend.

pub mod anthropic;

use std::sync::Arc;

use duet_config::AppConfig;
use duet_core::provider::Provider;

pub use anthropic::AnthropicProvider;

/// Build the configured provider, or `None` when no credential is set.
///
/// A missing credential is not an error here: the gateway reports it on
/// every request instead, before any network attempt.
pub fn build_from_config(config: &AppConfig) -> Option<Arc<dyn Provider>> {
    let api_key = config.api_key.as_deref().filter(|k| !k.trim().is_empty())?;

    let mut provider = AnthropicProvider::new(api_key).with_timeout(config.request_timeout_secs);
    if let Some(url) = &config.api_url {
        provider = provider.with_base_url(url);
    }
    Some(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_no_provider() {
        let config = AppConfig::default();
        assert!(build_from_config(&config).is_none());

        let config = AppConfig {
            api_key: Some("   ".into()),
            ..AppConfig::default()
        };
        assert!(build_from_config(&config).is_none());
    }

    #[test]
    fn key_builds_anthropic() {
        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            api_url: Some("http://localhost:9999/".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
