//! An OpenAI-chat-completions-compatible `LlmProvider` (§6, §9).
//!
//! The core treats the LLM as an opaque collaborator behind a trait; this
//! module is the one concrete implementation the binary ships so `nlsql
//! ask` has something to call without a caller wiring its own. Any
//! OpenAI-shaped endpoint (OpenAI itself, a local llama.cpp/Ollama server
//! with an OpenAI-compatible route, etc.) works by pointing `--llm-url` at
//! it.

use async_trait::async_trait;
use nlsql_core::{Completion, CompletionParams, LlmError, LlmProvider, Message, Role};
use serde::Deserialize;
use serde_json::json;

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_context_tokens: u32,
    max_output_tokens: u32,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            max_context_tokens: 8_000,
            max_output_tokens: 1_024,
        }
    }

    pub fn with_max_context_tokens(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    async fn chat(&self, messages: &[Message], params: &CompletionParams, force_json: bool) -> Result<Completion, LlmError> {
        let body = json!({
            "model": self.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "response_format": if force_json { json!({"type": "json_object"}) } else { json!(null) },
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
        });

        let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .timeout(params.timeout)
            .send()
            .await
            .map_err(|e| LlmError::ProviderError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderError(format!("{status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| LlmError::ProviderError(e.to_string()))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| LlmError::ProviderError("empty choices array".to_string()))?;

        Ok(Completion { content: choice.message.content, finish_reason: choice.finish_reason.unwrap_or_default() })
    }
}

fn message_json(message: &Message) -> serde_json::Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    json!({"role": role, "content": message.content})
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, messages: &[Message], params: &CompletionParams) -> Result<Completion, LlmError> {
        self.chat(messages, params, false).await
    }

    /// Parses the completion as JSON; on a non-JSON response, retries once
    /// with a stricter "JSON only" system message appended, then fails (§6).
    async fn complete_json(
        &self,
        messages: &[Message],
        params: &CompletionParams,
        schema_hint: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let completion = self.chat(messages, params, true).await?;
        if let Ok(value) = serde_json::from_str(&completion.content) {
            return Ok(value);
        }

        log::warn!("llm response was not valid JSON, retrying with a stricter system message");
        let mut retry_messages = messages.to_vec();
        retry_messages.push(Message::system(format!(
            "Respond with JSON only, matching this shape exactly: {schema_hint}. No prose, no markdown fences."
        )));
        let retry = self.chat(&retry_messages, params, true).await?;
        serde_json::from_str(&retry.content).map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    fn name(&self) -> &str {
        &self.model
    }
}
