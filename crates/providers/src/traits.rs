//! The provider-agnostic `generate` contract (C6).

use agentcore_domain::capability::ToolCallMode;
use agentcore_domain::message::{AssistantBlock, Turn};
use agentcore_domain::tool::ToolDefinition;

/// How the caller wants the model to select a tool, mirroring the wire
/// concept every provider exposes in some form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    Any,
    Tool(String),
    None,
}

/// Input to one `generate` call, already resolved to a concrete model
/// and tool-calling mode by the caller (the fallback chain in
/// [`crate::chain`] picks the mode).
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    pub messages: &'a [Turn],
    pub max_tokens: u32,
    pub system_prompt: Option<&'a str>,
    pub temperature: f32,
    pub tools: &'a [ToolDefinition],
    pub tool_choice: ToolChoice,
    pub tool_call_mode: ToolCallMode,
}

/// Usage + diagnostic metadata returned alongside the assistant blocks.
#[derive(Debug, Clone, Default)]
pub struct GenerateMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub raw_response: serde_json::Value,
}

/// A single HTTP-backed model adapter. Exactly one attempt, no retry —
/// the retry/fallback ladder lives one layer up in
/// [`crate::chain::ProviderChain`].
#[async_trait::async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Adapter identifier, e.g. `"anthropic"`, `"chutes"`, `"openrouter"`,
    /// `"moonshot"` — the left-hand side of a `"provider/model"` ref.
    fn id(&self) -> &str;

    /// Whether this adapter can make native structured tool calls at
    /// all (independent of whether the *caller* asked for them).
    fn supports_native_tools(&self) -> bool;

    async fn generate(
        &self,
        model: &str,
        req: &GenerateRequest<'_>,
    ) -> Result<(Vec<AssistantBlock>, GenerateMetadata), agentcore_domain::error::ProviderError>;
}
