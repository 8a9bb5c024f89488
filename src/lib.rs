//! Resilient chat-completion client for the Qianfan v2 (OpenAI-compatible)
//! inference API.
//!
//! Three call shapes ([`Prompt`]) are normalized into one ordered message
//! list. Non-streaming calls retry transport failures with exponential
//! backoff and always come back as a value; streaming calls never retry and
//! end with at most one error fragment.

pub mod cancel;
pub mod client;
pub mod config;
mod error;
pub mod paths;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod stream;

pub use cancel::{CancelHandle, Cancellation};
pub use client::{ChatClient, ChatOutput, ChatResult, ClientSettings};
pub use error::ClientError;
pub use prompt::{GenerationParams, Prompt};
pub use provider::{Message, Provider, Role};
pub use retry::RetryPolicy;
pub use stream::{FragmentStream, StreamFragment};
