//! Logical request and reply types.
//!
//! A caller describes *what* it wants (a chat completion or an embedding)
//! with these types; the provider adapters translate them into each
//! upstream's wire shape. Replies come back normalized: text for chat,
//! float vectors for embeddings, plus a token usage record and the
//! provider-of-record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions and context.
    System,
    /// User input.
    User,
    /// Model output.
    Assistant,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call generation parameters.
///
/// The recognized set is forwarded to every family that accepts it:
/// `temperature`, `max_tokens`, `top_p` for chat, `encoding_format` for
/// embeddings. Anything else goes into `extra` and is merged verbatim into
/// the request body for upstreams that accept additional members.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub encoding_format: Option<String>,
    /// Vendor-specific pass-through parameters.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationParams {
    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn with_max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn with_top_p(mut self, value: f32) -> Self {
        self.top_p = Some(value);
        self
    }

    pub fn with_encoding_format(mut self, value: impl Into<String>) -> Self {
        self.encoding_format = Some(value.into());
        self
    }

    /// Add a vendor-specific parameter forwarded verbatim.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// The two request shapes a provider instance can serve.
///
/// `generate` is not a kind of its own: the facade wraps the prompt as a
/// single user message and dispatches it as [`RequestKind::Chat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Chat,
    Embed,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Chat => f.write_str("chat"),
            RequestKind::Embed => f.write_str("embed"),
        }
    }
}

/// How many dispatch attempts a single logical request may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// At most one additional attempt, on a different instance when one
    /// is available. No back-off.
    Once,
    /// Up to `attempts` attempts with exponential back-off (250 ms base,
    /// 4 s cap) between them.
    Fixed { attempts: u32 },
    /// Retry until success or cancellation; same back-off as `Fixed`.
    Infinite,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed { attempts: 3 }
    }
}

impl RetryPolicy {
    /// Upper bound on attempts, `None` for unbounded.
    pub(crate) fn max_attempts(&self) -> Option<u32> {
        match self {
            RetryPolicy::Once => Some(2),
            RetryPolicy::Fixed { attempts } => Some((*attempts).max(1)),
            RetryPolicy::Infinite => None,
        }
    }

    pub(crate) fn waits_for_revival(&self) -> bool {
        matches!(self, RetryPolicy::Infinite)
    }

    pub(crate) fn backs_off(&self) -> bool {
        !matches!(self, RetryPolicy::Once)
    }
}

/// Input for an embedding request.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    /// The texts to embed, in order.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            EmbeddingInput::Single(text) => vec![text.as_str()],
            EmbeddingInput::Batch(texts) => texts.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, EmbeddingInput::Single(_))
    }
}

impl From<&str> for EmbeddingInput {
    fn from(text: &str) -> Self {
        EmbeddingInput::Single(text.to_string())
    }
}

impl From<String> for EmbeddingInput {
    fn from(text: String) -> Self {
        EmbeddingInput::Single(text)
    }
}

impl From<Vec<String>> for EmbeddingInput {
    fn from(texts: Vec<String>) -> Self {
        EmbeddingInput::Batch(texts)
    }
}

impl From<Vec<&str>> for EmbeddingInput {
    fn from(texts: Vec<&str>) -> Self {
        EmbeddingInput::Batch(texts.into_iter().map(str::to_string).collect())
    }
}

/// One logical request, created per call and discarded after the reply.
#[derive(Debug, Clone)]
pub enum LogicalRequest {
    Chat {
        messages: Vec<Message>,
        params: GenerationParams,
    },
    Embed {
        input: EmbeddingInput,
        params: GenerationParams,
    },
}

impl LogicalRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            LogicalRequest::Chat { .. } => RequestKind::Chat,
            LogicalRequest::Embed { .. } => RequestKind::Embed,
        }
    }
}

/// Token usage reported by the upstream. Counts are zero when the
/// upstream omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The kind-matched payload of a normalized reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    /// Assistant text for chat and generate calls.
    Text(String),
    /// One vector per input text, input order preserved.
    Vectors(Vec<Vec<f32>>),
}

/// A provider reply normalized out of the vendor wire shape.
#[derive(Debug, Clone)]
pub struct NormalizedReply {
    pub payload: ReplyPayload,
    pub usage: Usage,
    /// Instance id (`family#index`) that served the request.
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "hello");
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn message_wire_shape() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn retry_policy_attempt_bounds() {
        assert_eq!(RetryPolicy::Once.max_attempts(), Some(2));
        assert_eq!(RetryPolicy::default().max_attempts(), Some(3));
        assert_eq!(RetryPolicy::Fixed { attempts: 0 }.max_attempts(), Some(1));
        assert_eq!(RetryPolicy::Infinite.max_attempts(), None);
    }

    #[test]
    fn usage_tolerates_missing_fields() {
        let usage: Usage =
            serde_json::from_value(serde_json::json!({"prompt_tokens": 3, "total_tokens": 3}))
                .unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 3);
    }

    #[test]
    fn embedding_input_conversions() {
        assert!(EmbeddingInput::from("one").is_single());
        let batch = EmbeddingInput::from(vec!["a".to_string(), "b".to_string()]);
        assert!(!batch.is_single());
        assert_eq!(batch.texts(), vec!["a", "b"]);
    }
}
