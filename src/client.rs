//! The client facade.
//!
//! [`FanoutClient`] is a thin, stateless surface over one
//! [`LoadBalancer`]: `chat`, `generate`, `embed`, `batch`, and `stats`.
//! It owns the validation retry loop; everything about selection, rate
//! limits, and provider retries lives in the balancer.
//!
//! ```no_run
//! use llm_fanout::{CallOptions, FanoutClient};
//!
//! # async fn run() -> Result<(), llm_fanout::ClientError> {
//! let client = FanoutClient::builder()
//!     .with_openai("sk-...", "gpt-4o-mini")
//!     .with_anthropic("sk-ant-...", "claude-3-5-haiku-latest")
//!     .build()?;
//!
//! let answer = client
//!     .generate("Name a prime number.", CallOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::balancer::{BalancerOptions, LoadBalancer};
use crate::config::{InstanceConfig, PoolConfig};
use crate::error::{ClientError, ProviderError};
use crate::models::{
    EmbeddingInput, GenerationParams, LogicalRequest, Message, ReplyPayload, RetryPolicy,
};
use crate::pool::{ProviderPool, StatsSnapshot};
use crate::providers::Family;
use crate::validation::{ValidationOutcome, Validator};

/// Per-call options shared by every facade operation.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub params: GenerationParams,
    pub retry: RetryPolicy,
    /// Pin selection to one family.
    pub provider: Option<Family>,
    /// Output validator for chat and generate. Ignored by embed.
    pub validator: Option<Validator>,
    /// Validation retries after the first reply, default 3.
    pub max_validator_retries: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            params: GenerationParams::default(),
            retry: RetryPolicy::default(),
            provider: None,
            validator: None,
            max_validator_retries: 3,
        }
    }
}

impl CallOptions {
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_provider(mut self, family: Family) -> Self {
        self.provider = Some(family);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_max_validator_retries(mut self, retries: u32) -> Self {
        self.max_validator_retries = retries;
        self
    }
}

/// Embedding result: one vector for a single input, an order-preserving
/// list for a batch input.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutput {
    Single(Vec<f32>),
    Batch(Vec<Vec<f32>>),
}

impl EmbeddingOutput {
    /// Flatten to a list of vectors regardless of input shape.
    pub fn into_vectors(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingOutput::Single(vector) => vec![vector],
            EmbeddingOutput::Batch(vectors) => vectors,
        }
    }
}

/// Stateless facade over one load balancer. Cloning shares the pool.
#[derive(Clone)]
pub struct FanoutClient {
    balancer: Arc<LoadBalancer>,
}

impl FanoutClient {
    pub fn builder() -> FanoutClientBuilder {
        FanoutClientBuilder::default()
    }

    /// Build a client from a parsed pool configuration.
    pub fn from_config(config: PoolConfig) -> Result<Self, ClientError> {
        FanoutClientBuilder::default().with_config(config).build()
    }

    /// Build a client from a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Self::from_config(PoolConfig::from_yaml_file(path)?)
    }

    /// Build a client from a YAML configuration string.
    pub fn from_yaml_str(text: &str) -> Result<Self, ClientError> {
        Self::from_config(PoolConfig::from_yaml_str(text)?)
    }

    /// Build a single-instance client from the environment fallback.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_config(PoolConfig::from_env()?)
    }

    /// Send a conversation and return the assistant's text.
    ///
    /// With a validator set, the reply must pass validation; on rejection
    /// the bad assistant turn and a user turn carrying the validator's
    /// addendum are appended and the conversation is re-dispatched, at
    /// most `max_validator_retries` more times.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        options: CallOptions,
    ) -> Result<String, ClientError> {
        let CallOptions {
            params,
            retry,
            provider,
            validator,
            max_validator_retries,
        } = options;

        let mut transcript = messages;
        let mut retries_left = max_validator_retries;

        loop {
            let request = LogicalRequest::Chat {
                messages: transcript.clone(),
                params: params.clone(),
            };
            let reply = self.balancer.dispatch(&request, retry, provider).await?;
            let text = match reply.payload {
                ReplyPayload::Text(text) => text,
                ReplyPayload::Vectors(_) => {
                    return Err(ClientError::Provider {
                        provider: reply.provider,
                        source: ProviderError::Format {
                            message: "chat reply carried embedding data".to_string(),
                        },
                    });
                }
            };

            let Some(validator) = &validator else {
                return Ok(text);
            };
            match validator.validate(&text) {
                ValidationOutcome::Pass { text, .. } => return Ok(text),
                ValidationOutcome::Fail { message, addendum } => {
                    if retries_left == 0 {
                        return Err(ClientError::ValidationExhausted {
                            last_reply: text,
                            error: message,
                        });
                    }
                    retries_left -= 1;
                    tracing::debug!(
                        error = %message,
                        retries_left,
                        "reply failed validation, re-prompting"
                    );
                    transcript.push(Message::assistant(text));
                    transcript.push(Message::user(addendum));
                }
            }
        }
    }

    /// Convenience wrapper: a single user turn.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        options: CallOptions,
    ) -> Result<String, ClientError> {
        self.chat(vec![Message::user(prompt)], options).await
    }

    /// Embed one text or a batch of texts. A single input yields one
    /// vector; a batch yields vectors in input order. Validators are
    /// never applied to embeddings.
    pub async fn embed(
        &self,
        input: impl Into<EmbeddingInput>,
        options: CallOptions,
    ) -> Result<EmbeddingOutput, ClientError> {
        let input = input.into();
        let single = input.is_single();
        let request = LogicalRequest::Embed {
            input,
            params: options.params,
        };
        let reply = self
            .balancer
            .dispatch(&request, options.retry, options.provider)
            .await?;

        match reply.payload {
            ReplyPayload::Vectors(vectors) => {
                if single {
                    let vector =
                        vectors
                            .into_iter()
                            .next()
                            .ok_or_else(|| ClientError::Provider {
                                provider: reply.provider,
                                source: ProviderError::Format {
                                    message: "embedding reply carried no vectors".to_string(),
                                },
                            })?;
                    Ok(EmbeddingOutput::Single(vector))
                } else {
                    Ok(EmbeddingOutput::Batch(vectors))
                }
            }
            ReplyPayload::Text(_) => Err(ClientError::Provider {
                provider: reply.provider,
                source: ProviderError::Format {
                    message: "embedding reply carried text".to_string(),
                },
            }),
        }
    }

    /// Dispatch all prompts concurrently. The output is index-aligned
    /// with the input; a prompt that fails every attempt yields an error
    /// in its slot rather than failing the whole batch.
    pub async fn batch(
        &self,
        prompts: Vec<String>,
        options: CallOptions,
    ) -> Vec<Result<String, ClientError>> {
        let calls = prompts.into_iter().map(|prompt| {
            let options = options.clone();
            async move { self.generate(prompt, options).await }
        });
        futures::future::join_all(calls).await
    }

    /// Best-effort snapshot of per-instance counters, keyed by family.
    pub fn stats(&self) -> StatsSnapshot {
        self.balancer.stats()
    }
}

/// Builder for [`FanoutClient`], one convenience method per family.
#[derive(Debug, Default)]
pub struct FanoutClientBuilder {
    instances: Vec<InstanceConfig>,
    request_timeout: Option<Duration>,
}

impl FanoutClientBuilder {
    /// Append every instance from a parsed configuration.
    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.instances.extend(config.instances);
        self
    }

    /// Append one fully specified instance.
    pub fn with_instance(mut self, instance: InstanceConfig) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_openai(self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.with_instance(InstanceConfig::new(Family::OpenAi, api_key, model))
    }

    pub fn with_mistral(self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.with_instance(InstanceConfig::new(Family::Mistral, api_key, model))
    }

    pub fn with_anthropic(self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.with_instance(InstanceConfig::new(Family::Anthropic, api_key, model))
    }

    pub fn with_gemini(self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.with_instance(InstanceConfig::new(Family::Gemini, api_key, model))
    }

    pub fn with_groq(self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.with_instance(InstanceConfig::new(Family::Groq, api_key, model))
    }

    pub fn with_together(self, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        self.with_instance(InstanceConfig::new(Family::Together, api_key, model))
    }

    /// Total timeout for each HTTP call, default 60 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<FanoutClient, ClientError> {
        let pool = ProviderPool::new(PoolConfig {
            instances: self.instances,
        })?;
        let mut options = BalancerOptions::default();
        if let Some(timeout) = self.request_timeout {
            options.request_timeout = timeout;
        }
        Ok(FanoutClient {
            balancer: Arc::new(LoadBalancer::new(pool, options)?),
        })
    }
}
