use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use thiserror::Error;
use tracing::instrument;

use crate::config::LlmConfig;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub type SharedAnswerClient = Arc<dyn AnswerClient>;

/// The answer service failed; the cause is kept as display text only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error: {0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn from_cause(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

#[async_trait]
pub trait AnswerClient: Send + Sync {
    /// One blocking round trip: answer `question` grounded on `context`.
    async fn ask(&self, question: &str, context: &str) -> Result<String, ServiceError>;
}

/// Body of the single user message sent with every question.
pub fn user_message(question: &str, context: &str) -> String {
    format!("{context}\n\nQ: {question}")
}

/// Offline stand-in used when no answer service is configured.
#[derive(Debug, Default, Clone)]
pub struct EchoAnswerClient;

#[async_trait]
impl AnswerClient for EchoAnswerClient {
    async fn ask(&self, question: &str, context: &str) -> Result<String, ServiceError> {
        Ok(format!(
            "[offline answer] {} characters of context available for: {question}",
            context.chars().count()
        ))
    }
}

impl EchoAnswerClient {
    pub fn shared() -> SharedAnswerClient {
        Arc::new(Self)
    }
}

/// OpenAI-compatible chat completion client.
pub struct OpenAiAnswerClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
}

impl OpenAiAnswerClient {
    pub fn new(config: &LlmConfig) -> Self {
        let mut openai = OpenAIConfig::new().with_api_key(config.api_key.clone());
        if let Some(base_url) = &config.base_url {
            openai = openai.with_api_base(base_url.clone());
        }

        // A zero elapsed-time budget stops the client's rate-limit retries after one attempt.
        let single_attempt = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: AsyncOpenAiClient::with_config(openai).with_backoff(single_attempt),
            model: config.model.clone(),
        }
    }

    pub fn shared_from_env() -> anyhow::Result<SharedAnswerClient> {
        let config = LlmConfig::from_env()?;
        Ok(Arc::new(Self::new(&config)))
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn chat(&self, question: &str, context: &str) -> anyhow::Result<String> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()?;
        let user_turn = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message(question, context))
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![system_message.into(), user_turn.into()])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .context("chat completion returned no choices")?;
        let content = choice
            .message
            .content
            .as_deref()
            .context("chat completion returned an empty message")?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl AnswerClient for OpenAiAnswerClient {
    async fn ask(&self, question: &str, context: &str) -> Result<String, ServiceError> {
        self.chat(question, context)
            .await
            .map_err(|err| ServiceError::from_cause(format!("{err:#}")))
    }
}

/// Build the OpenAI-compatible client, optionally falling back to the echo client.
pub fn build_answer_client_from_env(default_to_echo: bool) -> anyhow::Result<SharedAnswerClient> {
    match OpenAiAnswerClient::shared_from_env() {
        Ok(client) => Ok(client),
        Err(err) if default_to_echo => {
            tracing::warn!(?err, "Falling back to EchoAnswerClient");
            Ok(EchoAnswerClient::shared())
        }
        Err(err) => Err(err),
    }
}
