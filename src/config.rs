use crate::client::{ChatClient, ClientSettings, DEFAULT_FALLBACK_MESSAGE, DEFAULT_MODEL};
use crate::provider::stub::StubProvider;
use crate::provider::Provider;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::ClientError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Inference model (default: ernie-4.0-turbo-8k)
    pub model: Option<String>,

    /// Application id sent as the `appid` header.
    pub app_id: Option<String>,

    pub bearer_token: Option<String>,

    /// Total attempts per non-streaming call.
    pub max_retries: Option<u32>,

    pub base_url: Option<String>,

    /// Provider identifier ("qianfan" or "stub").
    pub provider: Option<String>,

    /// Backoff unit in milliseconds; waits are 1, 2, 4, ... units.
    pub backoff_unit_ms: Option<u64>,

    pub request_timeout_secs: Option<u64>,

    /// Text returned to users once all retries fail.
    pub fallback_message: Option<String>,
}

impl Config {
    /// Read `config.toml` from the qianfan config dir.
    ///
    /// A missing file is `Ok(None)`: defaults and `QIANFAN_*` variables are
    /// enough to run.
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("cannot read qianfan config {}", path.display())),
        };
        toml::from_str(&text)
            .map(Some)
            .with_context(|| format!("invalid qianfan config {}", path.display()))
    }

    /// Let `QIANFAN_*` environment variables override file values.
    pub fn apply_env(mut self) -> Self {
        self.apply_env_with(|k| std::env::var(k).ok());
        self
    }

    fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        let var = |k: &str| get(k).filter(|v| !v.is_empty());
        if let Some(v) = var("QIANFAN_BEARER_TOKEN") {
            self.bearer_token = Some(v);
        }
        if let Some(v) = var("QIANFAN_APP_ID") {
            self.app_id = Some(v);
        }
        if let Some(v) = var("QIANFAN_MODEL") {
            self.model = Some(v);
        }
        if let Some(v) = var("QIANFAN_BASE_URL") {
            self.base_url = Some(v);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(60))
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            model: self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            retry: RetryPolicy::new(
                self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                Duration::from_millis(self.backoff_unit_ms.unwrap_or(1000)),
            ),
            fallback_message: self
                .fallback_message
                .clone()
                .unwrap_or_else(|| DEFAULT_FALLBACK_MESSAGE.to_string()),
        }
    }
}

impl ChatClient {
    /// Build a client for the provider named in `cfg` (default "qianfan").
    pub fn from_config(http: reqwest::Client, cfg: &Config) -> Result<Self, ClientError> {
        let provider = build_provider(http, cfg)?;
        Ok(Self::with_provider(provider, cfg.client_settings()))
    }
}

fn build_provider(http: reqwest::Client, cfg: &Config) -> Result<Arc<dyn Provider>, ClientError> {
    match cfg.provider.as_deref().unwrap_or("qianfan") {
        "qianfan" => {
            #[cfg(feature = "qianfan")]
            {
                use crate::provider::qianfan::{QianfanProvider, DEFAULT_BASE_URL};

                let token = cfg.bearer_token.as_deref().ok_or_else(|| {
                    ClientError::invalid("no bearer token (set QIANFAN_BEARER_TOKEN or config.toml bearer_token)")
                })?;
                let p = QianfanProvider::new(
                    http,
                    cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
                    token,
                    cfg.app_id.as_deref(),
                    cfg.request_timeout(),
                )?;
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "qianfan"))]
            {
                let _ = http;
                Err(ClientError::invalid("qianfan provider is not enabled in this build"))
            }
        }
        "stub" => Ok(Arc::new(StubProvider::echo())),
        other => Err(ClientError::invalid(format!("unknown provider: {other}"))),
    }
}
