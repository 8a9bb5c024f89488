//! Call shapes accepted by the client and their canonical message form.

use crate::provider::{Message, Role};
use crate::ClientError;
use serde_json::Value;
use std::collections::BTreeMap;

/// What a caller hands to [`crate::ChatClient::chat`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// A system instruction followed by one user turn.
    OneShot { system: String, user: String },
    /// A lone user turn.
    SingleTurn { text: String },
    /// A full ordered conversation, sent as-is.
    Conversation { messages: Vec<Message> },
}

/// How the facade hands back a non-streaming result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    PlainText,
    Structured,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub messages: Vec<Message>,
    pub shape: ResultShape,
}

impl Prompt {
    pub fn one_shot(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::OneShot {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn single(text: impl Into<String>) -> Self {
        Self::SingleTurn { text: text.into() }
    }

    pub fn conversation(messages: Vec<Message>) -> Self {
        Self::Conversation { messages }
    }

    /// Build a prompt from loosely supplied parts, as a front end collects
    /// them.
    ///
    /// A message list wins on its own; otherwise a user text is required and
    /// an optional system text turns it into a one-shot. Anything else (a
    /// system text alone, nothing at all, a list mixed with texts) is an
    /// `InvalidArgument`.
    pub fn from_parts(
        system: Option<String>,
        user: Option<String>,
        messages: Option<Vec<Message>>,
    ) -> Result<Self, ClientError> {
        match (system, user, messages) {
            (None, None, Some(messages)) => Ok(Self::Conversation { messages }),
            (Some(system), Some(user), None) => Ok(Self::OneShot { system, user }),
            (None, Some(text), None) => Ok(Self::SingleTurn { text }),
            (Some(_), None, None) => Err(ClientError::invalid("system text given without user text")),
            (None, None, None) => Err(ClientError::invalid("no prompt given")),
            (_, _, Some(_)) => Err(ClientError::invalid(
                "a message list cannot be combined with system or user text",
            )),
        }
    }

    /// Canonicalize into an ordered message list. Pure; performs no I/O.
    pub fn normalize(self) -> Result<Normalized, ClientError> {
        match self {
            Prompt::OneShot { system, user } => Ok(Normalized {
                messages: vec![Message::system(system), Message::user(user)],
                shape: ResultShape::PlainText,
            }),
            Prompt::SingleTurn { text } => Ok(Normalized {
                messages: vec![Message::user(text)],
                shape: ResultShape::PlainText,
            }),
            Prompt::Conversation { messages } => {
                match messages.last() {
                    None => return Err(ClientError::invalid("conversation has no messages")),
                    Some(m) if m.role == Role::Assistant => {
                        return Err(ClientError::invalid("conversation must not end with an assistant turn"))
                    }
                    Some(_) => {}
                }
                Ok(Normalized {
                    messages,
                    shape: ResultShape::Structured,
                })
            }
        }
    }
}

/// Sampling parameters for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
    /// Passed through verbatim as top-level request fields.
    pub options: BTreeMap<String, Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            stream: false,
            options: BTreeMap::new(),
        }
    }
}

impl GenerationParams {
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ClientError::invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ClientError::invalid(format!(
                "top_p must be within (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}
