//! Core LiveConnector trait definition.

use crate::config::LiveConfig;
use crate::error::Result;
use crate::session::BoxedTransport;
use async_trait::async_trait;

/// A factory for live network sessions.
///
/// Each provider implements this to open its own transport. The config
/// passed to [`connect`](LiveConnector::connect) already carries the
/// rendered instruction and the tool declarations for the session.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Get the provider name (e.g., "gemini").
    fn provider(&self) -> &str;

    /// Get the model identifier.
    fn model_id(&self) -> &str;

    /// Open a new session and complete its setup handshake.
    async fn connect(&self, config: LiveConfig) -> Result<BoxedTransport>;
}

/// A shared connector type for thread-safe access.
pub type BoxedConnector = std::sync::Arc<dyn LiveConnector>;
