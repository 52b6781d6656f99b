//! Gemini Live connector implementation.

use crate::config::LiveConfig;
use crate::error::Result;
use crate::model::LiveConnector;
use crate::session::BoxedTransport;
use async_trait::async_trait;

use super::session::GeminiLiveSession;
use super::{DEFAULT_MODEL, GEMINI_VOICES, GeminiBackend};

/// Opens Gemini Live sessions.
///
/// # Example
///
/// ```rust,ignore
/// use medipulse_live::gemini::{GeminiBackend, GeminiLiveConnector};
///
/// let connector = GeminiLiveConnector::new(
///     GeminiBackend::new("key"),
///     "models/gemini-2.5-flash-native-audio-preview-09-2025",
/// );
/// let transport = connector.connect(config).await?;
/// ```
#[derive(Debug)]
pub struct GeminiLiveConnector {
    backend: GeminiBackend,
    model_id: String,
}

impl GeminiLiveConnector {
    /// Create a new connector for `model_id`.
    pub fn new(backend: GeminiBackend, model_id: impl Into<String>) -> Self {
        Self { backend, model_id: qualify_model(model_id.into()) }
    }

    /// Create with the default Live model.
    pub fn with_default_model(backend: GeminiBackend) -> Self {
        Self::new(backend, DEFAULT_MODEL)
    }

    /// Get the backend configuration.
    pub fn backend(&self) -> &GeminiBackend {
        &self.backend
    }

    /// Prebuilt voices the service offers.
    pub fn available_voices(&self) -> &'static [&'static str] {
        GEMINI_VOICES
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn connect(&self, config: LiveConfig) -> Result<BoxedTransport> {
        let model = match &config.model {
            Some(model) => qualify_model(model.clone()),
            None => self.model_id.clone(),
        };
        let session = GeminiLiveSession::connect(&self.backend, &model, config).await?;
        Ok(Box::new(session))
    }
}

/// The setup message wants the `models/` resource prefix.
fn qualify_model(model: String) -> String {
    if model.starts_with("models/") { model } else { format!("models/{model}") }
}
