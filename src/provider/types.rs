use crate::ClientError;
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Request body sent to the endpoint, one per attempt.
///
/// `options` is flattened into the top-level JSON object so that arbitrary
/// endpoint parameters (`max_tokens`, `penalty_score`, ...) pass through
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// `{"error": {...}}` object the endpoint may send with a 2xx status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    /// String on v2 (`"invalid_model"`), numeric on older endpoints.
    #[serde(default)]
    pub code: serde_json::Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<ApiError> for ClientError {
    fn from(e: ApiError) -> Self {
        let code = match e.code {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => "unknown".to_string(),
            other => other.to_string(),
        };
        ClientError::Api {
            code,
            message: e.message.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionChunk {
    /// Delta text of the first choice, if any and non-empty.
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: Delta {
                    content: Some(text.into()),
                },
            }],
            error: None,
        }
    }
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(text.into()),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
            model: None,
            error: None,
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<CompletionChunk, ClientError>>;

/// Transport seam between the invoker and a remote endpoint.
///
/// One call to either method is one attempt; retrying is the caller's job.
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue a single non-streaming request.
    fn complete(&self, req: ChatRequest) -> BoxFuture<'static, Result<CompletionResponse, ClientError>>;

    /// Open a streaming request. Errors before the first chunk are returned
    /// directly; later ones arrive inside the stream.
    fn stream_chat(&self, req: ChatRequest) -> BoxFuture<'static, Result<ChunkStream, ClientError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_flattens_passthrough_options() {
        let mut options = BTreeMap::new();
        options.insert("max_output_tokens".to_string(), json!(256));
        let req = ChatRequest {
            model: "ernie-4.0-turbo-8k".into(),
            messages: vec![Message::system("be brief"), Message::user("hi")],
            temperature: 0.5,
            top_p: 0.9,
            stream: false,
            options,
        };

        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["max_output_tokens"], json!(256));
        assert_eq!(v["messages"][0]["role"], json!("system"));
        assert_eq!(v["messages"][1]["content"], json!("hi"));
        assert_eq!(v["stream"], json!(false));
    }

    #[test]
    fn parses_openai_style_response() {
        let body = r#"{
            "id": "as-1",
            "model": "ernie-4.0-turbo-8k",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }"#;
        let r: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(r.choices[0].message.content.as_deref(), Some("Hi there"));
        assert_eq!(r.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(r.usage.unwrap()["total_tokens"], json!(5));
    }

    #[test]
    fn chunk_without_delta_content_has_no_text() {
        let c: CompletionChunk =
            serde_json::from_str(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(c.delta_text(), None);

        let c: CompletionChunk = serde_json::from_str(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap();
        assert_eq!(c.delta_text(), None);

        let c: CompletionChunk = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(c.delta_text(), None);
    }

    #[test]
    fn error_object_in_body_is_kept() {
        let r: CompletionResponse =
            serde_json::from_str(r#"{"error":{"code":"invalid_model","message":"model not found","type":"invalid_request_error"}}"#)
                .unwrap();
        assert!(r.choices.is_empty());
        assert_eq!(
            ClientError::from(r.error.unwrap()),
            ClientError::Api { code: "invalid_model".into(), message: "model not found".into() }
        );

        let c: CompletionChunk = serde_json::from_str(r#"{"error":{"code":336501,"message":"rate limit"}}"#).unwrap();
        assert_eq!(ClientError::from(c.error.unwrap()).to_string(), "API error 336501: rate limit");
    }
}
