//! Builds a [`ProviderChain`] from [`LlmConfig`], wiring one adapter per
//! provider id referenced anywhere in the model chain.

use std::collections::HashMap;
use std::sync::Arc;

use agentcore_domain::config::LlmConfig;
use agentcore_domain::error::{Error, Result};

use crate::anthropic::AnthropicAdapter;
use crate::chain::ProviderChain;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::ChatAdapter;

/// Construct adapters for every provider id present in `config.model_chain`
/// and `config.pro_fallback_model`, failing fast if a referenced provider
/// has no configured API key.
pub fn build_chain(config: &LlmConfig) -> Result<ProviderChain> {
    let mut provider_ids: Vec<&str> = Vec::new();
    for model_ref in config.model_chain.iter().chain(std::iter::once(&config.pro_fallback_model)) {
        if let Some((provider_id, _)) = agentcore_domain::config::split_model_ref(model_ref) {
            if !provider_ids.contains(&provider_id) {
                provider_ids.push(provider_id);
            }
        }
    }

    let mut adapters: HashMap<String, Arc<dyn ChatAdapter>> = HashMap::new();
    for provider_id in provider_ids {
        let adapter: Arc<dyn ChatAdapter> = match provider_id {
            "anthropic" => {
                let key = config.anthropic_api_key.clone().ok_or_else(|| {
                    Error::Config("ANTHROPIC_API_KEY not set but referenced in model chain".into())
                })?;
                Arc::new(AnthropicAdapter::new(key))
            }
            "chutes" => {
                let key = config.chutes_api_key.clone().ok_or_else(|| {
                    Error::Config("CHUTES_API_KEY not set but referenced in model chain".into())
                })?;
                Arc::new(OpenAiCompatAdapter::chutes(key))
            }
            "openrouter" => {
                let key = config.openrouter_api_key.clone().ok_or_else(|| {
                    Error::Config("OPENROUTER_API_KEY not set but referenced in model chain".into())
                })?;
                Arc::new(OpenAiCompatAdapter::openrouter(key))
            }
            "moonshot" => {
                let key = config.moonshot_api_key.clone().ok_or_else(|| {
                    Error::Config("MOONSHOT_API_KEY not set but referenced in model chain".into())
                })?;
                Arc::new(OpenAiCompatAdapter::moonshot(key))
            }
            other => {
                return Err(Error::Config(format!("unknown provider id '{other}' in model chain")));
            }
        };
        adapters.insert(provider_id.to_string(), adapter);
    }

    Ok(ProviderChain::new(
        adapters,
        config.max_retries,
        config.base_backoff_ms,
        config.max_outer_retries,
        config.test_mode,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_a_config_error() {
        let mut config = LlmConfig::default();
        config.model_chain = vec!["chutes/deepseek-v3".to_string()];
        config.chutes_api_key = None;
        config.anthropic_api_key = None;
        config.openrouter_api_key = None;
        config.pro_fallback_model = "chutes/deepseek-v3".to_string();
        let err = build_chain(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builds_one_adapter_per_distinct_provider() {
        let mut config = LlmConfig::default();
        config.model_chain = vec!["chutes/a".to_string(), "chutes/b".to_string(), "anthropic/c".to_string()];
        config.pro_fallback_model = "chutes/a".to_string();
        config.chutes_api_key = Some("k1".into());
        config.anthropic_api_key = Some("k2".into());
        let chain = build_chain(&config).unwrap();
        // Both chutes refs resolve through the same adapter instance
        // keyed by provider id, so this should not error building twice.
        drop(chain);
    }
}
