//! The fallback-chain orchestrator: walks an ordered
//! `[primary, ...fallbacks]` model list, retrying each model with
//! backoff, advancing past ones that fail in ways a retry can't fix,
//! and re-entering the whole chain up to 3 more times with a
//! clarifying sentence appended to the system prompt if every model
//! in the chain failed.

use std::collections::HashMap;
use std::sync::Arc;

use agentcore_domain::capability::ToolCallMode;
use agentcore_domain::config::{is_free_model, split_model_ref};
use agentcore_domain::error::{ProviderError, ProviderErrorKind};
use agentcore_domain::message::{AssistantBlock, Turn};
use agentcore_domain::tool::ToolDefinition;

use crate::traits::{ChatAdapter, GenerateMetadata, GenerateRequest, ToolChoice};
use crate::util::backoff_duration;

const CLARIFYING_SENTENCE: &str =
    "\n\nPlease provide a complete response to the user's request.";

/// Outcome of one `generate` call through the chain: the successful
/// model ref is surfaced alongside the usual `generate` return value so
/// callers can log which link in the chain answered, and whether the
/// reply used the native or JSON-emulated tool-calling path.
pub struct ChainOutcome {
    pub model_ref: String,
    pub tool_call_mode: ToolCallMode,
    pub blocks: Vec<AssistantBlock>,
    pub metadata: GenerateMetadata,
}

pub struct ProviderChain {
    adapters: HashMap<String, Arc<dyn ChatAdapter>>,
    max_retries: u32,
    base_backoff_ms: u64,
    max_outer_retries: u32,
    test_mode: bool,
}

impl ProviderChain {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ChatAdapter>>,
        max_retries: u32,
        base_backoff_ms: u64,
        max_outer_retries: u32,
        test_mode: bool,
    ) -> Self {
        Self {
            adapters,
            max_retries,
            base_backoff_ms,
            max_outer_retries,
            test_mode,
        }
    }

    fn adapter_for(&self, model_ref: &str) -> Option<(Arc<dyn ChatAdapter>, &str)> {
        let (provider_id, model_name) = split_model_ref(model_ref)?;
        self.adapters.get(provider_id).map(|a| (a.clone(), model_name))
    }

    /// When tools are requested, a free-tier primary (`:free` suffix)
    /// may reject tool calls outright, so paid/tool-capable models are
    /// tried before free ones. Stable partition: relative order within
    /// each group is preserved, matching the original's
    /// `primary_supports_tools`/`_is_free_model` reordering.
    fn effective_chain(model_chain: &[String], tools_requested: bool) -> Vec<String> {
        if !tools_requested || !model_chain.first().map(|m| is_free_model(m)).unwrap_or(false) {
            return model_chain.to_vec();
        }
        let (paid, free): (Vec<String>, Vec<String>) =
            model_chain.iter().cloned().partition(|m| !is_free_model(m));
        paid.into_iter().chain(free).collect()
    }

    /// Run the full retry/fallback protocol for one logical turn.
    ///
    /// `model_chain` is `[primary, ...fallbacks]`; the caller (the
    /// agent runtime) is responsible for having already swapped the
    /// primary to a Pro fallback model if the credit ledger required it.
    ///
    /// `force_json_emulated` lets a connection opt out of a provider's
    /// native tool-calling support (the `use_native_tool_calling=false`
    /// query parameter) without mutating the shared, stateless
    /// adapter — the override is per-call, not per-adapter.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate(
        &self,
        model_chain: &[String],
        messages: &[Turn],
        max_tokens: u32,
        system_prompt: Option<&str>,
        temperature: f32,
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        force_json_emulated: bool,
    ) -> Result<ChainOutcome, ProviderError> {
        let mut last_err: Option<ProviderError> = None;
        let ordered_chain = Self::effective_chain(model_chain, !tools.is_empty());

        for outer_attempt in 0..=self.max_outer_retries {
            let system = match outer_attempt {
                0 => system_prompt.map(|s| s.to_string()),
                _ => Some(format!(
                    "{}{}",
                    system_prompt.unwrap_or_default(),
                    CLARIFYING_SENTENCE
                )),
            };

            for model_ref in &ordered_chain {
                let Some((adapter, model_name)) = self.adapter_for(model_ref) else {
                    tracing::warn!(model_ref, "no adapter registered for provider, skipping");
                    continue;
                };

                let mut mode = if !force_json_emulated && adapter.supports_native_tools() {
                    ToolCallMode::Native
                } else {
                    ToolCallMode::JsonEmulated
                };

                let mut attempt = 0u32;
                loop {
                    let req = GenerateRequest {
                        messages,
                        max_tokens,
                        system_prompt: system.as_deref(),
                        temperature,
                        tools,
                        tool_choice: tool_choice.clone(),
                        tool_call_mode: mode,
                    };

                    match adapter.generate(model_name, &req).await {
                        Ok((blocks, metadata)) => {
                            return Ok(ChainOutcome {
                                model_ref: model_ref.clone(),
                                tool_call_mode: mode,
                                blocks,
                                metadata,
                            });
                        }
                        Err(err) => {
                            tracing::warn!(
                                model = model_ref.as_str(),
                                kind = ?err.kind,
                                attempt,
                                "generate attempt failed"
                            );
                            let kind = err.kind;
                            last_err = Some(err);

                            match kind {
                                ProviderErrorKind::ContextLength => break,
                                ProviderErrorKind::Auth => break,
                                ProviderErrorKind::ToolsUnsupported => {
                                    if mode == ToolCallMode::Native {
                                        mode = ToolCallMode::JsonEmulated;
                                        continue;
                                    }
                                    break;
                                }
                                ProviderErrorKind::TargetExhausted
                                | ProviderErrorKind::Transient => {
                                    attempt += 1;
                                    if attempt >= self.max_retries {
                                        break;
                                    }
                                    let wait = backoff_duration(
                                        self.base_backoff_ms,
                                        attempt,
                                        self.test_mode,
                                    );
                                    tokio::time::sleep(wait).await;
                                    continue;
                                }
                                ProviderErrorKind::MalformedResponse | ProviderErrorKind::Fatal => {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ProviderError::new(
                "chain",
                "none",
                "no model in chain produced a response",
                ProviderErrorKind::Fatal,
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_domain::message::{ToolCallRef, UserBlock};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn effective_chain_moves_free_primary_behind_paid_models_when_tools_requested() {
        let chain = vec![
            "openrouter/llama-3.1-70b:free".to_string(),
            "chutes/deepseek-v3".to_string(),
            "anthropic/claude-sonnet".to_string(),
        ];
        let ordered = ProviderChain::effective_chain(&chain, true);
        assert_eq!(
            ordered,
            vec![
                "chutes/deepseek-v3".to_string(),
                "anthropic/claude-sonnet".to_string(),
                "openrouter/llama-3.1-70b:free".to_string(),
            ]
        );
    }

    #[test]
    fn effective_chain_unchanged_when_no_tools_requested() {
        let chain = vec!["openrouter/llama-3.1-70b:free".to_string(), "chutes/deepseek-v3".to_string()];
        assert_eq!(ProviderChain::effective_chain(&chain, false), chain);
    }

    #[test]
    fn effective_chain_unchanged_when_primary_already_paid() {
        let chain = vec!["anthropic/claude-sonnet".to_string(), "openrouter/llama-3.1-70b:free".to_string()];
        assert_eq!(ProviderChain::effective_chain(&chain, true), chain);
    }

    struct FlakyAdapter {
        id: &'static str,
        native: bool,
        fail_times: AtomicU32,
        kind: ProviderErrorKind,
    }

    #[async_trait]
    impl ChatAdapter for FlakyAdapter {
        fn id(&self) -> &str {
            self.id
        }
        fn supports_native_tools(&self) -> bool {
            self.native
        }
        async fn generate(
            &self,
            model: &str,
            _req: &GenerateRequest<'_>,
        ) -> Result<(Vec<AssistantBlock>, GenerateMetadata), ProviderError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::new(self.id, model, "nope", self.kind));
            }
            Ok((
                vec![AssistantBlock::Text { text: "ok".into() }],
                GenerateMetadata::default(),
            ))
        }
    }

    fn turns() -> Vec<Turn> {
        vec![Turn::User(vec![UserBlock::Text { text: "hi".into() }])]
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let mut adapters: HashMap<String, Arc<dyn ChatAdapter>> = HashMap::new();
        adapters.insert(
            "chutes".into(),
            Arc::new(FlakyAdapter {
                id: "chutes",
                native: true,
                fail_times: AtomicU32::new(1),
                kind: ProviderErrorKind::Transient,
            }),
        );
        let chain = ProviderChain::new(adapters, 3, 10, 3, true);
        let outcome = chain
            .generate(
                &["chutes/m".to_string()],
                &turns(),
                100,
                None,
                0.0,
                &[],
                ToolChoice::Auto,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.model_ref, "chutes/m");
    }

    #[tokio::test]
    async fn context_length_advances_to_next_model_without_retry() {
        let mut adapters: HashMap<String, Arc<dyn ChatAdapter>> = HashMap::new();
        adapters.insert(
            "chutes".into(),
            Arc::new(FlakyAdapter {
                id: "chutes",
                native: true,
                fail_times: AtomicU32::new(99),
                kind: ProviderErrorKind::ContextLength,
            }),
        );
        adapters.insert(
            "openrouter".into(),
            Arc::new(FlakyAdapter {
                id: "openrouter",
                native: true,
                fail_times: AtomicU32::new(0),
                kind: ProviderErrorKind::Transient,
            }),
        );
        let chain = ProviderChain::new(adapters, 3, 10, 3, true);
        let outcome = chain
            .generate(
                &["chutes/m".to_string(), "openrouter/m".to_string()],
                &turns(),
                100,
                None,
                0.0,
                &[],
                ToolChoice::Auto,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.model_ref, "openrouter/m");
    }

    #[tokio::test]
    async fn exhausts_all_models_and_outer_retries_then_fails() {
        let mut adapters: HashMap<String, Arc<dyn ChatAdapter>> = HashMap::new();
        adapters.insert(
            "chutes".into(),
            Arc::new(FlakyAdapter {
                id: "chutes",
                native: true,
                fail_times: AtomicU32::new(99),
                kind: ProviderErrorKind::Fatal,
            }),
        );
        let chain = ProviderChain::new(adapters, 1, 1, 1, true);
        let err = chain
            .generate(
                &["chutes/m".to_string()],
                &turns(),
                100,
                Some("base"),
                0.0,
                &[],
                ToolChoice::Auto,
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Fatal);
    }

    #[tokio::test]
    async fn tools_unsupported_switches_to_emulated_on_native_adapter() {
        struct SwitchAdapter {
            switched: std::sync::atomic::AtomicBool,
        }
        #[async_trait]
        impl ChatAdapter for SwitchAdapter {
            fn id(&self) -> &str {
                "chutes"
            }
            fn supports_native_tools(&self) -> bool {
                true
            }
            async fn generate(
                &self,
                model: &str,
                req: &GenerateRequest<'_>,
            ) -> Result<(Vec<AssistantBlock>, GenerateMetadata), ProviderError> {
                if req.tool_call_mode == ToolCallMode::Native {
                    return Err(ProviderError::new(
                        "chutes",
                        model,
                        "tools not supported",
                        ProviderErrorKind::ToolsUnsupported,
                    ));
                }
                self.switched.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok((
                    vec![AssistantBlock::ToolCall(ToolCallRef {
                        id: "1".into(),
                        name: "calc".into(),
                        input: serde_json::json!({}),
                    })],
                    GenerateMetadata::default(),
                ))
            }
        }

        let mut adapters: HashMap<String, Arc<dyn ChatAdapter>> = HashMap::new();
        adapters.insert(
            "chutes".into(),
            Arc::new(SwitchAdapter { switched: std::sync::atomic::AtomicBool::new(false) }),
        );
        let chain = ProviderChain::new(adapters, 3, 10, 3, true);
        let outcome = chain
            .generate(
                &["chutes/m".to_string()],
                &turns(),
                100,
                None,
                0.0,
                &[],
                ToolChoice::Auto,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.tool_call_mode, ToolCallMode::JsonEmulated);
    }
}
