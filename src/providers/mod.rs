//! Provider adapter layer.
//!
//! Each upstream family is one variant of [`Family`]. An adapter is a pure
//! translation: [`Family::build_request`] turns a logical request into the
//! family's wire shape, [`Family::parse_response`] turns the reply JSON
//! back into a normalized payload. Adapters hold no state and never retry;
//! rate limiting, retries, and health live in the balancer.
//!
//! Four of the six families speak the OpenAI-compatible schema and share
//! the codec in [`openai`]; [`anthropic`] and [`gemini`] have their own
//! wire shapes.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::models::{LogicalRequest, ReplyPayload, RequestKind, Usage};

pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod openai;

/// An upstream provider family. One family shares a single wire codec and
/// capability set across all of its configured key instances.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    OpenAi,
    Mistral,
    Anthropic,
    Gemini,
    Groq,
    Together,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::OpenAi,
        Family::Mistral,
        Family::Anthropic,
        Family::Gemini,
        Family::Groq,
        Family::Together,
    ];

    /// The configuration name of this family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::OpenAi => "openai",
            Family::Mistral => "mistral",
            Family::Anthropic => "anthropic",
            Family::Gemini => "gemini",
            Family::Groq => "groq",
            Family::Together => "together",
        }
    }

    /// Parse a configuration name, tolerating surrounding whitespace and
    /// case differences.
    pub fn parse(name: &str) -> Option<Family> {
        let name = name.trim().to_ascii_lowercase();
        Family::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Public API base used when a caller does not supply one (builder
    /// conveniences and the environment fallback).
    pub fn default_base(&self) -> &'static str {
        match self {
            Family::OpenAi => "https://api.openai.com/v1",
            Family::Mistral => "https://api.mistral.ai/v1",
            Family::Anthropic => "https://api.anthropic.com",
            Family::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Family::Groq => "https://api.groq.com/openai/v1",
            Family::Together => "https://api.together.xyz/v1",
        }
    }

    /// Whether this family can serve the given request kind.
    pub fn supports(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Chat => true,
            RequestKind::Embed => !matches!(self, Family::Anthropic | Family::Groq),
        }
    }

    /// Build the HTTP request for a logical call against one endpoint.
    ///
    /// Callers must check [`Family::supports`] first; asking an
    /// embeddings-less family for an embed request is an error.
    pub fn build_request(
        &self,
        endpoint: &Endpoint,
        request: &LogicalRequest,
    ) -> Result<WireRequest, ProviderError> {
        match (self, request) {
            (
                Family::OpenAi | Family::Mistral | Family::Groq | Family::Together,
                LogicalRequest::Chat { messages, params },
            ) => Ok(openai::chat_request(endpoint, messages, params)),
            (
                Family::OpenAi | Family::Mistral | Family::Together,
                LogicalRequest::Embed { input, params },
            ) => Ok(openai::embed_request(endpoint, input, params)),
            (Family::Anthropic, LogicalRequest::Chat { messages, params }) => {
                Ok(anthropic::chat_request(endpoint, messages, params))
            }
            (Family::Gemini, LogicalRequest::Chat { messages, params }) => {
                Ok(gemini::chat_request(endpoint, messages, params))
            }
            (Family::Gemini, LogicalRequest::Embed { input, .. }) => {
                Ok(gemini::embed_request(endpoint, input))
            }
            (family, LogicalRequest::Embed { .. }) => Err(ProviderError::Unsupported {
                message: format!("{family} does not support embeddings"),
            }),
        }
    }

    /// Parse a 2xx response body into a normalized payload and usage.
    pub fn parse_response(
        &self,
        kind: RequestKind,
        body: serde_json::Value,
    ) -> Result<ProviderReply, ProviderError> {
        match (self, kind) {
            (
                Family::OpenAi | Family::Mistral | Family::Groq | Family::Together,
                RequestKind::Chat,
            ) => openai::parse_chat(body),
            (Family::OpenAi | Family::Mistral | Family::Together, RequestKind::Embed) => {
                openai::parse_embed(body)
            }
            (Family::Anthropic, RequestKind::Chat) => anthropic::parse_chat(body),
            (Family::Gemini, RequestKind::Chat) => gemini::parse_chat(body),
            (Family::Gemini, RequestKind::Embed) => gemini::parse_embed(body),
            (family, RequestKind::Embed) => Err(ProviderError::Unsupported {
                message: format!("{family} does not support embeddings"),
            }),
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The static part of a provider instance: where to call and as whom.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

/// A fully built HTTP request, ready for the executor.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

/// A parsed reply before the balancer attaches the provider-of-record.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub payload: ReplyPayload,
    pub usage: Usage,
}

/// Join an API base and a path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_names_round_trip() {
        for family in Family::ALL {
            assert_eq!(Family::parse(family.as_str()), Some(family));
        }
        assert_eq!(Family::parse(" OpenAI "), Some(Family::OpenAi));
        assert_eq!(Family::parse("unknown"), None);
    }

    #[test]
    fn capability_matrix() {
        for family in Family::ALL {
            assert!(family.supports(RequestKind::Chat));
        }
        assert!(!Family::Anthropic.supports(RequestKind::Embed));
        assert!(!Family::Groq.supports(RequestKind::Embed));
        assert!(Family::OpenAi.supports(RequestKind::Embed));
        assert!(Family::Gemini.supports(RequestKind::Embed));
        assert!(Family::Together.supports(RequestKind::Embed));
    }

    #[test]
    fn join_url_handles_trailing_slash() {
        assert_eq!(join_url("http://x/v1/", "/chat"), "http://x/v1/chat");
        assert_eq!(join_url("http://x/v1", "/chat"), "http://x/v1/chat");
    }
}
