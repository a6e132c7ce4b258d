/// Shared error type used across all crates in this workspace.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("store: {0}")]
    Store(String),

    #[error("path escape: {0}")]
    PathEscape(String),

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("turn alternation violated: expected {expected} turn next")]
    TurnAlternation { expected: &'static str },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a provider failure, used to drive the retry ladder.
///
/// The ladder is a pure function of `kind`; nothing downstream inspects
/// the original source error beyond logging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rate limit / capacity exhausted on the current model. Retry same model.
    TargetExhausted,
    /// Prompt too long for the model's context window. Do not retry; advance model.
    ContextLength,
    /// Network blip, 5xx, or other transient condition. Retry with backoff.
    Transient,
    /// Model/endpoint does not support tool calling in the requested mode.
    ToolsUnsupported,
    /// 401/403. Never retried.
    Auth,
    /// Response could not be parsed into the expected shape.
    MalformedResponse,
    /// Anything else unrecoverable.
    Fatal,
}

impl ProviderErrorKind {
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::TargetExhausted | ProviderErrorKind::Transient
        )
    }
}

#[derive(thiserror::Error, Debug)]
#[error("provider {provider} ({model}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
        kind: ProviderErrorKind,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    /// Classify a raw provider error message and HTTP status into a kind.
    ///
    /// Mirrors the phrase-matching heuristics used by the original system,
    /// since most OpenAI-compatible backends don't expose a structured
    /// error taxonomy over the wire.
    pub fn classify(status: Option<u16>, body: &str) -> ProviderErrorKind {
        let lower = body.to_lowercase();

        if matches!(status, Some(401) | Some(403)) {
            return ProviderErrorKind::Auth;
        }

        const CONTEXT_PHRASES: &[&str] = &[
            "maximum context length",
            "context_length_exceeded",
            "token limit",
            "reduce the length",
            "too many tokens",
        ];
        if CONTEXT_PHRASES.iter().any(|p| lower.contains(p)) {
            return ProviderErrorKind::ContextLength;
        }

        const EXHAUSTION_PHRASES: &[&str] = &[
            "rate limit",
            "rate_limit",
            "quota exceeded",
            "too many requests",
            "target exhausted",
            "capacity",
            "overloaded",
        ];
        if matches!(status, Some(429)) || EXHAUSTION_PHRASES.iter().any(|p| lower.contains(p)) {
            return ProviderErrorKind::TargetExhausted;
        }

        const TOOLS_PHRASES: &[&str] = &[
            "does not support tools",
            "does not support function",
            "tool choice is not supported",
            "function calling is not enabled",
        ];
        if TOOLS_PHRASES.iter().any(|p| lower.contains(p)) {
            return ProviderErrorKind::ToolsUnsupported;
        }

        match status {
            Some(s) if s >= 500 => ProviderErrorKind::Transient,
            Some(408) => ProviderErrorKind::Transient,
            None => ProviderErrorKind::Transient,
            _ => ProviderErrorKind::Fatal,
        }
    }
}
