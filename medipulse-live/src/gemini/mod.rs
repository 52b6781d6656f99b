//! Gemini Live API provider.
//!
//! Implements [`LiveConnector`](crate::LiveConnector) and
//! [`LiveTransport`](crate::LiveTransport) over Google's WebSocket-based
//! `BidiGenerateContent` endpoint.
//!
//! - Input audio: 16kHz mono PCM
//! - Output audio: 24kHz mono PCM
//! - Tool calls arrive as `toolCall.functionCalls` and are answered one
//!   `toolResponse` message per invocation
//!
//! # Example
//!
//! ```rust,ignore
//! use medipulse_live::gemini::{GeminiBackend, GeminiLiveConnector};
//! use medipulse_live::{LiveConfig, LiveConnector};
//!
//! let backend = GeminiBackend::from_env()?;
//! let connector = GeminiLiveConnector::with_default_model(backend);
//! let transport = connector.connect(LiveConfig::default()).await?;
//! transport.close().await?;
//! ```

mod model;
mod session;

pub use model::GeminiLiveConnector;
pub use session::GeminiLiveSession;

use crate::error::{LiveError, Result};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Gemini Live API WebSocket URL.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model for Gemini Live.
pub const DEFAULT_MODEL: &str = crate::config::DEFAULT_MODEL;

/// Available prebuilt voices (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Environment variables checked for an API key, in order.
pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Credentials and endpoint for the Gemini Live API.
#[derive(Debug)]
pub struct GeminiBackend {
    api_key: SecretString,
    endpoint: String,
}

impl GeminiBackend {
    /// Use `api_key` against the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: SecretString::from(api_key.into()), endpoint: GEMINI_LIVE_URL.to_string() }
    }

    /// Read the API key from the first non-empty variable in [`API_KEY_VARS`].
    pub fn from_env() -> Result<Self> {
        API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .map(Self::new)
            .ok_or_else(|| {
                LiveError::config(format!("no API key set (tried {})", API_KEY_VARS.join(", ")))
            })
    }

    /// Point at a different WebSocket endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The configured endpoint, without credentials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint URL with the key attached as a query parameter.
    pub(crate) fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| LiveError::config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LiveError::config(format!("endpoint must be ws:// or wss://, got {}", url.scheme())));
        }
        url.query_pairs_mut().append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

/// Install the process-wide rustls crypto provider once.
pub(crate) fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        // Another component may already have installed one.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
