//! Outbound call transport: one GET per timed call.
//! Transports are registered under a symbolic key and picked from config at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flussu_core::config::TimedCallConfig;
use flussu_core::{FlussuError, Result};
use thiserror::Error;

/// Why an outbound call produced no usable body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Render as the `ERROR:[code]:reason` string stored on the record.
    pub fn to_result_string(&self) -> String {
        match self {
            TransportError::Status { code, body } if body.trim().is_empty() => {
                format!("ERROR:[{code}]:HTTP error")
            }
            TransportError::Status { code, body } => format!("ERROR:[{code}]:{}", body.trim()),
            TransportError::Timeout(after) => {
                format!("ERROR:[-1]:Timed out after {}ms", after.as_millis())
            }
            TransportError::Request(reason) => format!("ERROR:[-1]:{reason}"),
        }
    }
}

/// Performs the outbound GET for a resolved URI.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch `uri` and return the raw response body.
    async fn get(&self, uri: &str) -> std::result::Result<String, TransportError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str, use_proxy: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout);
        if !use_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| FlussuError::Transport(format!("Client error: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &TimedCallConfig) -> Result<Self> {
        Self::new(config.timeout(), &config.user_agent, config.use_proxy)
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, uri: &str) -> std::result::Result<String, TransportError> {
        let resp = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_error(e))?;
        if status.is_success() {
            tracing::debug!("✅ GET {} → {}", uri, status);
            Ok(body)
        } else {
            Err(TransportError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }
}

/// Transports by symbolic key.
#[derive(Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in transports.
    pub fn from_config(config: &TimedCallConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register("http", Arc::new(HttpTransport::from_config(config)?));
        Ok(registry)
    }

    pub fn register(&mut self, key: &str, transport: Arc<dyn Transport>) {
        self.transports.insert(key.to_string(), transport);
    }

    /// Look up a transport by key.
    pub fn get(&self, key: &str) -> Result<Arc<dyn Transport>> {
        self.transports.get(key).cloned().ok_or_else(|| {
            FlussuError::Config(format!(
                "Unknown transport '{key}' (available: {})",
                self.keys().join(", ")
            ))
        })
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.transports.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
