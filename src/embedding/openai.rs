// src/embedding/openai.rs
//
// HTTP client for OpenAI-compatible embedding and chat-completion endpoints.
//
// Configuration (environment variables):
// - TRIAGE_API_KEY: API key for the model provider
// - TRIAGE_API_BASE: API base URL (default: https://api.openai.com/v1)
// - TRIAGE_EMBEDDING_MODEL: embedding model id (default: text-embedding-3-large)
// - TRIAGE_CHAT_MODEL: chat model id (default: gpt-4o)
// - TRIAGE_REQUEST_TIMEOUT_SECS: per-request timeout (default: 60)

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use super::{ChatCompletionProvider, EmbeddingProvider};
use crate::config::env_or;
use crate::error::ClassifyError;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TRIAGE_API_KEY").context("TRIAGE_API_KEY is not set")?;
        Ok(OpenAiConfig {
            api_base: env::var("TRIAGE_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key,
            embedding_model: env::var("TRIAGE_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-large".to_string()),
            chat_model: env::var("TRIAGE_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            request_timeout: Duration::from_secs(env_or("TRIAGE_REQUEST_TIMEOUT_SECS", 60)),
        })
    }
}

/// Client for both model calls the pipeline makes: one embedding request per
/// text, one chat completion per judge invocation. No internal retries.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(OpenAiClient { client, config })
    }

    pub fn from_env() -> Result<Self> {
        OpenAiClient::new(OpenAiConfig::from_env()?)
    }

    fn describe_transport_error(err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            format!("network error: {}", err)
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifyError> {
        let url = format!("{}/embeddings", self.config.api_base);
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifyError::EmbeddingUnavailable(Self::describe_transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::EmbeddingUnavailable(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            ClassifyError::EmbeddingUnavailable(format!("malformed embedding response: {}", e))
        })?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                ClassifyError::EmbeddingUnavailable("embedding response had no data".to_string())
            })?;

        debug!("Embedded {} chars into {} dims", text.len(), vector.len());
        Ok(vector)
    }
}

#[async_trait]
impl ChatCompletionProvider for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ClassifyError> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let request = ChatCompletionRequest {
            model: &self.config.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifyError::JudgeUnavailable(Self::describe_transport_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::JudgeUnavailable(format!(
                "chat endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            ClassifyError::JudgeUnavailable(format!("malformed completion response: {}", e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ClassifyError::JudgeUnavailable("completion response had no choices".to_string())
            })
    }
}
