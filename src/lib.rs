//! # llm-fanout
//!
//! A client-side fan-out layer in front of multiple LLM HTTP endpoints.
//! A caller submits one logical request (chat completion, free-form
//! generation, or text embedding); the library picks one healthy upstream
//! key, speaks the provider's native wire shape, and returns a domain
//! value: a string for generations, float vectors for embeddings. It is
//! built to be safe from many concurrent callers against pools of API
//! keys with per-key rate limits.
//!
//! ## What it does
//!
//! - **Provider pool and selection**: every configured key is one
//!   instance with live state; the next request goes to the least-loaded
//!   active instance, with error-weighted scoring and a last-used
//!   tiebreak for approximate round-robin.
//! - **Rate limiting, retries, circuit breaking**: a sliding 60-second
//!   window per key, per-request retry policies (`Once`, `Fixed`,
//!   `Infinite`) with exponential back-off, and a circuit that opens
//!   after three consecutive failures and closes on a successful health
//!   probe.
//! - **Output validation**: structured (JSON, optionally
//!   schema-checked), free-text predicate, and pattern validators that
//!   can reject a reply, re-prompt with an addendum, and retry.
//! - **Provider adapters**: six upstream families behind one flat
//!   [`Family`] enum, each speaking its exact vendor wire shape.
//!
//! ## Quick start
//!
//! ```no_run
//! use llm_fanout::{CallOptions, FanoutClient, Message};
//!
//! # async fn run() -> Result<(), llm_fanout::ClientError> {
//! let client = FanoutClient::builder()
//!     .with_openai("sk-...", "gpt-4o-mini")
//!     .with_gemini("...", "gemini-1.5-flash")
//!     .build()?;
//!
//! let text = client
//!     .chat(
//!         vec![
//!             Message::system("You are terse."),
//!             Message::user("What is the capital of France?"),
//!         ],
//!         CallOptions::default(),
//!     )
//!     .await?;
//!
//! let vectors = client
//!     .embed(vec!["first", "second"], CallOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Pools are usually loaded from a YAML file with a top-level `llm` map:
//!
//! ```yaml
//! llm:
//!   use: openai, gemini
//!   openai:
//!     - { api_key: "sk-...", api_base: "https://api.openai.com/v1", model: "gpt-4o-mini", rate_limit: 20 }
//!   gemini:
//!     - { api_key: "...", api_base: "https://generativelanguage.googleapis.com/v1beta", model: "gemini-1.5-flash" }
//! ```
//!
//! ```no_run
//! # fn run() -> Result<(), llm_fanout::ClientError> {
//! let client = llm_fanout::FanoutClient::from_yaml_file("config.yaml")?;
//! # Ok(())
//! # }
//! ```
//!
//! With no file, `FanoutClient::from_env` builds a single-instance pool
//! from `OPENAI_API_KEY`.
//!
//! ## Validation
//!
//! ```no_run
//! use llm_fanout::{CallOptions, FanoutClient, FieldType, Schema, Validator};
//!
//! # async fn run(client: FanoutClient) -> Result<(), llm_fanout::ClientError> {
//! let validator = Validator::structured_with_schema(
//!     Schema::new().field("result", FieldType::Number),
//!     true,
//! );
//! let json = client
//!     .generate(
//!         "Compute 6 * 7. Reply as JSON with a `result` field.",
//!         CallOptions::default().with_validator(validator),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Blocking use
//!
//! [`BlockingClient`] wraps the async facade for synchronous callers and
//! refuses to run inside an ambient tokio runtime rather than deadlock.

pub mod balancer;
pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod providers;
pub mod validation;

pub use balancer::{BalancerOptions, LoadBalancer};
pub use blocking::BlockingClient;
pub use client::{CallOptions, EmbeddingOutput, FanoutClient, FanoutClientBuilder};
pub use config::{InstanceConfig, PoolConfig, DEFAULT_RATE_LIMIT};
pub use error::{ClientError, ProviderError};
pub use models::{
    EmbeddingInput, GenerationParams, LogicalRequest, Message, NormalizedReply, ReplyPayload,
    RequestKind, RetryPolicy, Role, Usage,
};
pub use pool::{InstanceStats, ProviderPool, StatsSnapshot};
pub use providers::Family;
pub use validation::{FieldType, Schema, ValidationOutcome, Validator};

/// Result type for fan-out operations.
pub type Result<T> = std::result::Result<T, ClientError>;
