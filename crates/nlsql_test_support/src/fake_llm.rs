use async_trait::async_trait;
use nlsql_core::{Completion, CompletionParams, LlmError, LlmProvider, Message};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct FakeLlmStats {
    pub call_count: usize,
    pub last_messages: Vec<Message>,
}

struct FakeLlmState {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    call_count: Mutex<usize>,
    last_messages: Mutex<Vec<Message>>,
}

/// Fakes `LlmProvider` (§6) with a queue of scripted responses consumed in
/// order; once exhausted, the last queued response repeats.
pub struct FakeLlmProvider {
    name: String,
    max_context_tokens: u32,
    max_output_tokens: u32,
    state: FakeLlmState,
}

impl FakeLlmProvider {
    pub fn new() -> Self {
        Self {
            name: "fake-llm".to_string(),
            max_context_tokens: 8_000,
            max_output_tokens: 1_024,
            state: FakeLlmState {
                responses: Mutex::new(VecDeque::new()),
                call_count: Mutex::new(0),
                last_messages: Mutex::new(Vec::new()),
            },
        }
    }

    pub fn with_response(self, response: impl Into<String>) -> Self {
        mutex_lock(&self.state.responses).push_back(Ok(response.into()));
        self
    }

    pub fn with_error(self, error: LlmError) -> Self {
        mutex_lock(&self.state.responses).push_back(Err(error));
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn stats(&self) -> FakeLlmStats {
        FakeLlmStats {
            call_count: *mutex_lock(&self.state.call_count),
            last_messages: mutex_lock(&self.state.last_messages).clone(),
        }
    }

    fn next_response(&self) -> Result<String, LlmError> {
        let mut queue = mutex_lock(&self.state.responses);
        match queue.len() {
            0 => Ok(String::new()),
            1 => queue.front().cloned().unwrap(),
            _ => queue.pop_front().unwrap(),
        }
    }
}

impl Default for FakeLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for FakeLlmProvider {
    async fn complete(&self, messages: &[Message], _params: &CompletionParams) -> Result<Completion, LlmError> {
        *mutex_lock(&self.state.call_count) += 1;
        *mutex_lock(&self.state.last_messages) = messages.to_vec();

        let content = self.next_response()?;
        Ok(Completion { content, finish_reason: "stop".to_string() })
    }

    async fn complete_json(
        &self,
        messages: &[Message],
        params: &CompletionParams,
        _schema_hint: &str,
    ) -> Result<serde_json::Value, LlmError> {
        let completion = self.complete(messages, params).await?;
        serde_json::from_str(&completion.content).map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
