//! Anthropic Messages API codec.
//!
//! Distinct from the OpenAI shape: the system prompt is a top-level field
//! rather than a message role, the `anthropic-version` header is
//! mandatory, and `max_tokens` is a required body field. The family has
//! no embeddings endpoint.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;
use crate::models::{GenerationParams, Message, ReplyPayload, Role, Usage};
use crate::providers::{join_url, Endpoint, ProviderReply, WireRequest};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn chat_request(
    endpoint: &Endpoint,
    messages: &[Message],
    params: &GenerationParams,
) -> WireRequest {
    let mut system = String::new();
    let mut turns = Vec::new();
    for message in messages {
        match message.role {
            Role::System => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&message.content);
            }
            Role::User => turns.push(json!({"role": "user", "content": message.content})),
            Role::Assistant => {
                turns.push(json!({"role": "assistant", "content": message.content}))
            }
        }
    }

    let mut body = json!({
        "model": endpoint.model,
        "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": turns,
        "stream": false,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(temperature) = params.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = params.top_p {
        body["top_p"] = json!(top_p);
    }
    for (key, value) in &params.extra {
        body[key.as_str()] = value.clone();
    }

    WireRequest {
        method: Method::POST,
        url: join_url(&endpoint.api_base, "/v1/messages"),
        headers: vec![
            ("x-api-key", endpoint.api_key.clone()),
            ("anthropic-version", API_VERSION.to_string()),
        ],
        body,
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub(crate) fn parse_chat(body: serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let response: MessagesResponse =
        serde_json::from_value(body).map_err(|e| ProviderError::Format {
            message: format!("messages response: {e}"),
        })?;

    let text = response
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    Ok(ProviderReply {
        payload: ReplyPayload::Text(text),
        usage: Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            api_key: "sk-ant".to_string(),
            api_base: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
        }
    }

    #[test]
    fn system_turns_lift_to_top_level_field() {
        let messages = [
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("more"),
        ];
        let wire = chat_request(&endpoint(), &messages, &GenerationParams::default());

        assert_eq!(wire.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(wire.body["system"], json!("be brief"));
        assert_eq!(wire.body["max_tokens"], json!(DEFAULT_MAX_TOKENS));
        assert_eq!(
            wire.body["messages"],
            json!([
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "more"},
            ])
        );
    }

    #[test]
    fn version_header_present() {
        let wire = chat_request(&endpoint(), &[Message::user("hi")], &GenerationParams::default());
        assert!(wire
            .headers
            .iter()
            .any(|(name, value)| *name == "anthropic-version" && value == API_VERSION));
        assert!(wire
            .headers
            .iter()
            .any(|(name, value)| *name == "x-api-key" && value == "sk-ant"));
    }

    #[test]
    fn parse_joins_text_blocks_and_sums_usage() {
        let reply = parse_chat(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "hel"},
                {"type": "text", "text": "lo"}
            ],
            "model": "claude-3-5-haiku-latest",
            "usage": {"input_tokens": 7, "output_tokens": 3}
        }))
        .unwrap();

        assert_eq!(reply.payload, ReplyPayload::Text("hello".to_string()));
        assert_eq!(reply.usage.prompt_tokens, 7);
        assert_eq!(reply.usage.completion_tokens, 3);
        assert_eq!(reply.usage.total_tokens, 10);
    }
}
