//! Gemini generative language API codec.
//!
//! The model id is part of the URL path, bodies carry `contents` with
//! `parts`, usage arrives as camelCase `usageMetadata`, and embeddings
//! live under separate `:embedContent` / `:batchEmbedContents` paths
//! producing `values` vectors. The upstream rejects unknown body members,
//! so the extras map is not forwarded for this family.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::error::ProviderError;
use crate::models::{EmbeddingInput, GenerationParams, Message, ReplyPayload, Role, Usage};
use crate::providers::{Endpoint, ProviderReply, WireRequest};

fn model_url(endpoint: &Endpoint, operation: &str) -> String {
    format!(
        "{}/models/{}:{}",
        endpoint.api_base.trim_end_matches('/'),
        endpoint.model,
        operation
    )
}

fn auth_headers(endpoint: &Endpoint) -> Vec<(&'static str, String)> {
    vec![("x-goog-api-key", endpoint.api_key.clone())]
}

pub(crate) fn chat_request(
    endpoint: &Endpoint,
    messages: &[Message],
    params: &GenerationParams,
) -> WireRequest {
    let contents: Vec<serde_json::Value> = messages
        .iter()
        .map(|message| {
            // No system role on this wire; system turns are sent as user turns.
            let role = match message.role {
                Role::Assistant => "model",
                Role::System | Role::User => "user",
            };
            json!({"role": role, "parts": [{"text": message.content}]})
        })
        .collect();

    let mut generation_config = serde_json::Map::new();
    if let Some(temperature) = params.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = params.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(top_p) = params.top_p {
        generation_config.insert("topP".to_string(), json!(top_p));
    }

    let mut body = json!({"contents": contents});
    if !generation_config.is_empty() {
        body["generationConfig"] = serde_json::Value::Object(generation_config);
    }

    WireRequest {
        method: Method::POST,
        url: model_url(endpoint, "generateContent"),
        headers: auth_headers(endpoint),
        body,
    }
}

pub(crate) fn embed_request(endpoint: &Endpoint, input: &EmbeddingInput) -> WireRequest {
    match input {
        EmbeddingInput::Single(text) => WireRequest {
            method: Method::POST,
            url: model_url(endpoint, "embedContent"),
            headers: auth_headers(endpoint),
            body: json!({"content": {"parts": [{"text": text}]}}),
        },
        EmbeddingInput::Batch(texts) => {
            let requests: Vec<serde_json::Value> = texts
                .iter()
                .map(|text| {
                    json!({
                        "model": format!("models/{}", endpoint.model),
                        "content": {"parts": [{"text": text}]},
                    })
                })
                .collect();
            WireRequest {
                method: Method::POST,
                url: model_url(endpoint, "batchEmbedContents"),
                headers: auth_headers(endpoint),
                body: json!({"requests": requests}),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
    total_token_count: u32,
}

pub(crate) fn parse_chat(body: serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let response: GenerateResponse =
        serde_json::from_value(body).map_err(|e| ProviderError::Format {
            message: format!("generateContent response: {e}"),
        })?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Format {
            message: "generateContent response carried no candidates".to_string(),
        })?;
    let text = candidate
        .content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");

    let usage = response.usage_metadata.unwrap_or_default();
    Ok(ProviderReply {
        payload: ReplyPayload::Text(text),
        usage: Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        },
    })
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

pub(crate) fn parse_embed(body: serde_json::Value) -> Result<ProviderReply, ProviderError> {
    // Single and batch calls come back through the same path; the body
    // shape tells them apart.
    let vectors = if body.get("embeddings").is_some() {
        let response: BatchEmbedResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Format {
                message: format!("batchEmbedContents response: {e}"),
            })?;
        response.embeddings.into_iter().map(|e| e.values).collect()
    } else {
        let response: EmbedResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Format {
                message: format!("embedContent response: {e}"),
            })?;
        vec![response.embedding.values]
    };

    Ok(ProviderReply {
        payload: ReplyPayload::Vectors(vectors),
        usage: Usage::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            api_key: "g-key".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
        }
    }

    #[test]
    fn model_id_lands_in_the_path() {
        let wire = chat_request(&endpoint(), &[Message::user("hi")], &GenerationParams::default());
        assert_eq!(
            wire.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert!(wire
            .headers
            .iter()
            .any(|(name, value)| *name == "x-goog-api-key" && value == "g-key"));
    }

    #[test]
    fn chat_body_uses_contents_and_parts() {
        let params = GenerationParams::default().with_temperature(0.2).with_max_tokens(16);
        let wire = chat_request(
            &endpoint(),
            &[Message::user("hi"), Message::assistant("hello")],
            &params,
        );
        assert_eq!(
            wire.body["contents"],
            json!([
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]},
            ])
        );
        assert_eq!(wire.body["generationConfig"]["maxOutputTokens"], json!(16));
    }

    #[test]
    fn parse_chat_reads_camel_case_usage() {
        let reply = parse_chat(json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "pong"}]}, "finishReason": "STOP"}
            ],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1, "totalTokenCount": 3}
        }))
        .unwrap();

        assert_eq!(reply.payload, ReplyPayload::Text("pong".to_string()));
        assert_eq!(reply.usage.total_tokens, 3);
    }

    #[test]
    fn batch_embed_uses_sibling_path_and_preserves_order() {
        let input = EmbeddingInput::from(vec!["a", "b"]);
        let wire = embed_request(&endpoint(), &input);
        assert!(wire.url.ends_with(":batchEmbedContents"));
        assert_eq!(wire.body["requests"].as_array().unwrap().len(), 2);

        let reply = parse_embed(json!({
            "embeddings": [{"values": [1.0]}, {"values": [2.0]}]
        }))
        .unwrap();
        assert_eq!(
            reply.payload,
            ReplyPayload::Vectors(vec![vec![1.0], vec![2.0]])
        );
    }

    #[test]
    fn single_embed_produces_one_vector() {
        let wire = embed_request(&endpoint(), &EmbeddingInput::from("x"));
        assert!(wire.url.ends_with(":embedContent"));

        let reply = parse_embed(json!({"embedding": {"values": [0.5, 0.25]}})).unwrap();
        assert_eq!(reply.payload, ReplyPayload::Vectors(vec![vec![0.5, 0.25]]));
    }
}
