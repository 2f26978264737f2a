//! Facade-level flows: batch ordering, generate/chat equivalence, and
//! embeddings through the client surface.

use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_fanout::{
    CallOptions, EmbeddingOutput, Family, FanoutClient, InstanceConfig, Message, RetryPolicy,
};

fn chat_ok_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 2, "completion_tokens": 2, "total_tokens": 4}
    })
}

async fn client_for(server: &MockServer) -> FanoutClient {
    FanoutClient::builder()
        .with_instance(InstanceConfig::new(Family::OpenAi, "k", "m").with_api_base(server.uri()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn batch_results_stay_index_aligned_with_failures_in_place() {
    let server = MockServer::start().await;
    // q2 always fails; everything else succeeds. Mount order decides.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("q2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_ok_body("answered")))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let results = client
        .batch(
            vec!["q1".to_string(), "q2".to_string(), "q3".to_string()],
            // Two attempts keep q2's error count below the circuit
            // threshold so its failures cannot starve q1 and q3.
            CallOptions::default().with_retry(RetryPolicy::Fixed { attempts: 2 }),
        )
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap(), "answered");
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap(), "answered");
}

#[tokio::test]
async fn generate_sends_the_same_payload_as_single_user_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_ok_body("same")))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let options = CallOptions::default();

    let from_generate = client
        .generate("What is 2 + 2?", options.clone())
        .await
        .unwrap();
    let from_chat = client
        .chat(vec![Message::user("What is 2 + 2?")], options)
        .await
        .unwrap();
    assert_eq!(from_generate, from_chat);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn single_embedding_yields_one_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "embedding": [0.5, 0.25], "index": 0}],
            "model": "m",
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let output = assert_ok!(client.embed("hello", CallOptions::default()).await);
    assert_eq!(output, EmbeddingOutput::Single(vec![0.5, 0.25]));
}

#[tokio::test]
async fn batch_embedding_preserves_input_order() {
    let server = MockServer::start().await;
    // Vectors arrive interleaved; `index` must restore input order.
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "embedding": [2.0], "index": 1},
                {"object": "embedding", "embedding": [1.0], "index": 0}
            ],
            "model": "m",
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let output = assert_ok!(
        client
            .embed(vec!["first", "second"], CallOptions::default())
            .await
    );
    assert_eq!(output, EmbeddingOutput::Batch(vec![vec![1.0], vec![2.0]]));
}

#[tokio::test]
async fn embeddings_route_around_families_without_embedding_support() {
    let chat_only = MockServer::start().await;
    let embedding_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "embedding": [1.0], "index": 0}],
            "model": "m",
            "usage": {"prompt_tokens": 1, "total_tokens": 1}
        })))
        .mount(&embedding_server)
        .await;

    // groq is declared first but cannot embed; together takes the call.
    let client = FanoutClient::builder()
        .with_instance(InstanceConfig::new(Family::Groq, "k", "m").with_api_base(chat_only.uri()))
        .with_instance(
            InstanceConfig::new(Family::Together, "k", "m").with_api_base(embedding_server.uri()),
        )
        .build()
        .unwrap();

    let output = client.embed("text", CallOptions::default()).await.unwrap();
    assert_eq!(output, EmbeddingOutput::Single(vec![1.0]));
    assert!(chat_only.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn chat_stats_accumulate_per_instance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_ok_body("ok")))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    for _ in 0..3 {
        client.generate("hi", CallOptions::default()).await.unwrap();
    }

    let stats = client.stats();
    let instance = &stats.families[&Family::OpenAi][0];
    assert_eq!(instance.total_requests, 3);
    assert_eq!(instance.total_tokens, 12);
}
