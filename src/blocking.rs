//! Blocking twins of the async facade.
//!
//! [`BlockingClient`] owns a private runtime and runs each async call to
//! completion on it. Calling in from inside an ambient tokio runtime
//! would deadlock the caller's executor, so both construction and every
//! call detect that case and fail loudly instead.

use std::path::Path;

use crate::client::{CallOptions, EmbeddingOutput, FanoutClient};
use crate::error::ClientError;
use crate::models::{EmbeddingInput, Message};
use crate::pool::StatsSnapshot;

pub struct BlockingClient {
    inner: FanoutClient,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient").finish_non_exhaustive()
    }
}

impl BlockingClient {
    /// Wrap an async client. Fails when called from inside a runtime.
    pub fn new(inner: FanoutClient) -> Result<Self, ClientError> {
        ensure_blocking_context()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::config(format!("failed to build blocking runtime: {e}")))?;
        Ok(Self { inner, runtime })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Self::new(FanoutClient::from_yaml_file(path)?)
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(FanoutClient::from_env()?)
    }

    pub fn chat(&self, messages: Vec<Message>, options: CallOptions) -> Result<String, ClientError> {
        self.run(self.inner.chat(messages, options))?
    }

    pub fn generate(
        &self,
        prompt: impl Into<String>,
        options: CallOptions,
    ) -> Result<String, ClientError> {
        self.run(self.inner.generate(prompt.into(), options))?
    }

    pub fn embed(
        &self,
        input: impl Into<EmbeddingInput>,
        options: CallOptions,
    ) -> Result<EmbeddingOutput, ClientError> {
        self.run(self.inner.embed(input.into(), options))?
    }

    pub fn batch(
        &self,
        prompts: Vec<String>,
        options: CallOptions,
    ) -> Result<Vec<Result<String, ClientError>>, ClientError> {
        self.run(self.inner.batch(prompts, options))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats()
    }

    fn run<T>(&self, call: impl std::future::Future<Output = T>) -> Result<T, ClientError> {
        ensure_blocking_context()?;
        Ok(self.runtime.block_on(call))
    }
}

fn ensure_blocking_context() -> Result<(), ClientError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(ClientError::config(
            "blocking calls are not allowed inside an async runtime; use FanoutClient instead",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn async_client() -> FanoutClient {
        FanoutClient::builder()
            .with_openai("sk-test", "gpt-4o-mini")
            .build()
            .unwrap()
    }

    #[test]
    fn constructs_outside_a_runtime() {
        let client = BlockingClient::new(async_client()).unwrap();
        assert_eq!(
            client.stats().families[&crate::providers::Family::OpenAi].len(),
            1
        );
    }

    #[tokio::test]
    async fn refuses_construction_inside_a_runtime() {
        let err = BlockingClient::new(async_client()).unwrap_err();
        assert!(matches!(err, ClientError::Config { .. }));
    }

    #[test]
    fn refuses_calls_from_inside_a_runtime() {
        // Built outside, smuggled into a runtime, called there.
        let client = BlockingClient::new(async_client()).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = runtime
            .block_on(async { client.generate("hi", CallOptions::default()) })
            .unwrap_err();
        assert!(matches!(err, ClientError::Config { .. }));
    }
}
