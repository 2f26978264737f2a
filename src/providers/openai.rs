//! OpenAI-compatible wire codec.
//!
//! Shared by the `openai`, `mistral`, `groq`, and `together` families,
//! which differ only in base URL and capability set. Chat goes to
//! `/chat/completions`, embeddings to `/embeddings`; authentication is a
//! bearer token.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;
use crate::models::{EmbeddingInput, GenerationParams, Message, ReplyPayload, Usage};
use crate::providers::{join_url, Endpoint, ProviderReply, WireRequest};

pub(crate) fn chat_request(
    endpoint: &Endpoint,
    messages: &[Message],
    params: &GenerationParams,
) -> WireRequest {
    let mut body = json!({
        "model": endpoint.model,
        "messages": messages,
        "stream": false,
    });
    if let Some(temperature) = params.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = params.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(top_p) = params.top_p {
        body["top_p"] = json!(top_p);
    }
    for (key, value) in &params.extra {
        body[key.as_str()] = value.clone();
    }

    WireRequest {
        method: Method::POST,
        url: join_url(&endpoint.api_base, "/chat/completions"),
        headers: vec![("authorization", format!("Bearer {}", endpoint.api_key))],
        body,
    }
}

pub(crate) fn embed_request(
    endpoint: &Endpoint,
    input: &EmbeddingInput,
    params: &GenerationParams,
) -> WireRequest {
    let input_value = match input {
        EmbeddingInput::Single(text) => json!(text),
        EmbeddingInput::Batch(texts) => json!(texts),
    };
    let mut body = json!({
        "model": endpoint.model,
        "input": input_value,
    });
    if let Some(format) = &params.encoding_format {
        body["encoding_format"] = json!(format);
    }
    for (key, value) in &params.extra {
        body[key.as_str()] = value.clone();
    }

    WireRequest {
        method: Method::POST,
        url: join_url(&endpoint.api_base, "/embeddings"),
        headers: vec![("authorization", format!("Bearer {}", endpoint.api_key))],
        body,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub(crate) fn parse_chat(body: serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let completion: ChatCompletion =
        serde_json::from_value(body).map_err(|e| ProviderError::Format {
            message: format!("chat completion: {e}"),
        })?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Format {
            message: "chat completion carried no choices".to_string(),
        })?;

    Ok(ProviderReply {
        payload: ReplyPayload::Text(choice.message.content.unwrap_or_default()),
        usage: completion.usage.unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct EmbeddingList {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

pub(crate) fn parse_embed(body: serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let list: EmbeddingList = serde_json::from_value(body).map_err(|e| ProviderError::Format {
        message: format!("embedding list: {e}"),
    })?;

    // The upstream may interleave; `index` is authoritative for input order.
    let mut items = list.data;
    items.sort_by_key(|item| item.index);
    let vectors = items.into_iter().map(|item| item.embedding).collect();

    Ok(ProviderReply {
        payload: ReplyPayload::Vectors(vectors),
        usage: list.usage.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        Endpoint {
            api_key: "sk-test".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn chat_request_shape() {
        let params = GenerationParams::default()
            .with_temperature(0.5)
            .with_max_tokens(64)
            .with_extra("seed", json!(7));
        let wire = chat_request(&endpoint(), &[Message::user("hi")], &params);

        assert_eq!(wire.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            wire.headers,
            vec![("authorization", "Bearer sk-test".to_string())]
        );
        assert_eq!(wire.body["model"], "gpt-4o-mini");
        assert_eq!(wire.body["stream"], json!(false));
        assert_eq!(wire.body["temperature"], json!(0.5));
        assert_eq!(wire.body["max_tokens"], json!(64));
        assert_eq!(wire.body["seed"], json!(7));
        assert_eq!(
            wire.body["messages"],
            json!([{"role": "user", "content": "hi"}])
        );
    }

    #[test]
    fn embed_request_carries_encoding_format() {
        let params = GenerationParams::default().with_encoding_format("float");
        let wire = embed_request(&endpoint(), &EmbeddingInput::from("abc"), &params);
        assert_eq!(wire.url, "https://api.openai.com/v1/embeddings");
        assert_eq!(wire.body["input"], json!("abc"));
        assert_eq!(wire.body["encoding_format"], json!("float"));
    }

    #[test]
    fn parse_chat_extracts_first_choice() {
        let reply = parse_chat(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 15, "total_tokens": 25}
        }))
        .unwrap();

        assert_eq!(reply.payload, ReplyPayload::Text("hello".to_string()));
        assert_eq!(reply.usage.total_tokens, 25);
    }

    #[test]
    fn parse_chat_rejects_empty_choices() {
        let err = parse_chat(json!({"choices": []})).unwrap_err();
        assert!(matches!(err, ProviderError::Format { .. }));
    }

    #[test]
    fn parse_embed_orders_vectors_by_index() {
        let reply = parse_embed(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "embedding": [2.0], "index": 1},
                {"object": "embedding", "embedding": [1.0], "index": 0}
            ],
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }))
        .unwrap();

        assert_eq!(
            reply.payload,
            ReplyPayload::Vectors(vec![vec![1.0], vec![2.0]])
        );
        assert_eq!(reply.usage.total_tokens, 4);
    }
}
