use crate::cancel::Cancellation;
use crate::prompt::{GenerationParams, Normalized, Prompt, ResultShape};
use crate::provider::{ChatRequest, CompletionResponse, Message, Provider};
use crate::retry::RetryPolicy;
use crate::stream::FragmentStream;
use crate::ClientError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const DEFAULT_MODEL: &str = "ernie-4.0-turbo-8k";
pub const NO_CHOICES: &str = "no choices in response";
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Sorry, the AI service is temporarily unavailable. Please try again later.";

/// Outcome of a non-streaming call.
///
/// Either `error` is `None` and `content` is the model's reply (possibly
/// empty), or `error` holds the diagnostic text and `content` whatever is
/// safe to show a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatResult {
    pub content: String,
    pub usage: serde_json::Value,
    pub model: String,
    pub finish_reason: String,
    pub error: Option<String>,
}

impl ChatResult {
    fn failed(error: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// What [`ChatClient::chat`] returns, depending on the prompt shape and
/// whether streaming was asked for.
#[derive(Debug)]
pub enum ChatOutput {
    Text(String),
    Structured(ChatResult),
    Stream(FragmentStream),
}

impl ChatOutput {
    /// Reduce to displayable text, draining a stream if needed.
    pub async fn into_text(self) -> String {
        match self {
            ChatOutput::Text(s) => s,
            ChatOutput::Structured(r) => r.content,
            ChatOutput::Stream(s) => match s.collect_text().await {
                Ok(s) => s,
                Err(e) => e,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub model: String,
    pub retry: RetryPolicy,
    pub fallback_message: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            retry: RetryPolicy::default(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// Chat-completion client with retrying single-shot calls and
/// non-retrying streaming calls.
///
/// Holds no per-conversation state and no interior mutability, so a shared
/// `&ChatClient` may serve concurrent calls.
#[derive(Clone)]
pub struct ChatClient {
    provider: Arc<dyn Provider>,
    settings: ClientSettings,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.provider.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatClient {
    pub fn new(provider: impl Provider + 'static, settings: ClientSettings) -> Self {
        Self {
            provider: Arc::new(provider),
            settings,
        }
    }

    pub fn with_provider(provider: Arc<dyn Provider>, settings: ClientSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Single entry point.
    ///
    /// Plain-text prompts (`OneShot`, `SingleTurn`) come back as
    /// `ChatOutput::Text`, conversations as `ChatOutput::Structured`, and any
    /// prompt with `params.stream` set as `ChatOutput::Stream`. Only a
    /// malformed prompt or out-of-range parameters yield `Err`.
    pub async fn chat(&self, prompt: Prompt, params: GenerationParams) -> Result<ChatOutput, ClientError> {
        self.chat_with(prompt, params, self.settings.retry, Cancellation::none())
            .await
    }

    /// Like [`chat`](Self::chat) with a retry bound for this call only.
    pub async fn chat_with_retries(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        max_retries: u32,
    ) -> Result<ChatOutput, ClientError> {
        let retry = self.settings.retry.with_max_retries(max_retries);
        self.chat_with(prompt, params, retry, Cancellation::none())
            .await
    }

    /// Like [`chat`](Self::chat) with an explicit retry policy and cancellation.
    pub async fn chat_with(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        retry: RetryPolicy,
        cancel: Cancellation,
    ) -> Result<ChatOutput, ClientError> {
        params.validate()?;
        let Normalized { messages, shape } = prompt.normalize()?;
        let req = self.build_request(messages, params);

        if req.stream {
            return Ok(ChatOutput::Stream(self.stream_request(req, cancel)));
        }

        let result = self.complete_request(req, retry, &cancel).await;
        Ok(match shape {
            ResultShape::PlainText => ChatOutput::Text(result.content),
            ResultShape::Structured => ChatOutput::Structured(result),
        })
    }

    /// Non-streaming call returning the structured result regardless of
    /// prompt shape.
    pub async fn complete(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        cancel: Cancellation,
    ) -> Result<ChatResult, ClientError> {
        params.validate()?;
        let Normalized { messages, .. } = prompt.normalize()?;
        let mut req = self.build_request(messages, params);
        req.stream = false;
        Ok(self.complete_request(req, self.settings.retry, &cancel).await)
    }

    /// Streaming call regardless of `params.stream`.
    ///
    /// The relay runs as a Tokio task, so this is async like the other calls
    /// and must be awaited inside a runtime.
    pub async fn stream(
        &self,
        prompt: Prompt,
        params: GenerationParams,
        cancel: Cancellation,
    ) -> Result<FragmentStream, ClientError> {
        params.validate()?;
        let Normalized { messages, .. } = prompt.normalize()?;
        let mut req = self.build_request(messages, params);
        req.stream = true;
        Ok(self.stream_request(req, cancel))
    }

    /// Append `user_input` to `history`, send the whole history, and return
    /// the reply text. The assistant reply is not appended; the caller decides
    /// what to keep.
    pub async fn chat_with_history(&self, history: &mut Vec<Message>, user_input: &str) -> String {
        history.push(Message::user(user_input));
        let prompt = Prompt::conversation(history.clone());
        match self.chat(prompt, GenerationParams::default()).await {
            Ok(out) => out.into_text().await,
            Err(e) => {
                warn!(error = %e, "history chat rejected");
                String::new()
            }
        }
    }

    /// One-shot call with its own retry bound that always yields displayable text.
    pub async fn safe_call(&self, system: &str, user: &str, max_retries: u32) -> String {
        let prompt = Prompt::one_shot(system, user);
        match self
            .chat_with_retries(prompt, GenerationParams::default(), max_retries)
            .await
        {
            Ok(out) => out.into_text().await,
            Err(e) => {
                warn!(error = %e, "safe call rejected");
                self.settings.fallback_message.clone()
            }
        }
    }

    fn build_request(&self, messages: Vec<Message>, params: GenerationParams) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: params.stream,
            options: params.options,
        }
    }

    fn stream_request(&self, req: ChatRequest, cancel: Cancellation) -> FragmentStream {
        debug!(provider = self.provider.name(), model = %req.model, "starting streaming chat");
        FragmentStream::spawn(self.provider.as_ref(), req, cancel)
    }

    async fn complete_request(&self, req: ChatRequest, retry: RetryPolicy, cancel: &Cancellation) -> ChatResult {
        let attempts = retry.attempts();
        let mut attempt = 0;

        loop {
            if let Some(e) = cancel.check() {
                return self.give_up(e);
            }

            debug!(provider = self.provider.name(), attempt = attempt + 1, attempts, "chat attempt");
            let outcome = tokio::select! {
                r = self.provider.complete(req.clone()) => r,
                e = cancel.fired() => return self.give_up(e),
            };

            let err = match outcome {
                Ok(resp) => return into_result(resp),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return self.give_up(err);
            }

            warn!(attempt = attempt + 1, attempts, error = %err, "chat request failed");
            let Some(delay) = retry.backoff(attempt) else {
                error!(attempts, error = %err, "chat request failed after all retries");
                return self.give_up(err);
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                e = cancel.fired() => return self.give_up(e),
            }
            attempt += 1;
        }
    }

    fn give_up(&self, e: ClientError) -> ChatResult {
        ChatResult::failed(e.to_string(), self.settings.fallback_message.clone())
    }
}

fn into_result(resp: CompletionResponse) -> ChatResult {
    let CompletionResponse { choices, usage, model, .. } = resp;
    let Some(choice) = choices.into_iter().next() else {
        warn!("{NO_CHOICES}");
        return ChatResult::failed(NO_CHOICES, "");
    };
    ChatResult {
        content: choice.message.content.unwrap_or_default(),
        usage: usage.unwrap_or(serde_json::Value::Null),
        model: model.unwrap_or_default(),
        finish_reason: choice.finish_reason.unwrap_or_default(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Choice;

    #[test]
    fn first_choice_is_extracted() {
        let mut resp = CompletionResponse::text("Hi there");
        resp.model = Some("ernie".into());
        resp.usage = Some(serde_json::json!({"total_tokens": 4}));
        resp.choices.push(Choice::default());

        let r = into_result(resp);
        assert!(r.is_ok());
        assert_eq!(r.content, "Hi there");
        assert_eq!(r.model, "ernie");
        assert_eq!(r.finish_reason, "stop");
        assert_eq!(r.usage["total_tokens"], 4);
    }

    #[test]
    fn no_choices_is_an_error_result_with_empty_content() {
        let r = into_result(CompletionResponse::default());
        assert_eq!(r.error.as_deref(), Some(NO_CHOICES));
        assert_eq!(r.content, "");
    }
}
