//! Core LiveTransport trait definition.

use crate::audio::PcmPayload;
use crate::error::Result;
use crate::events::{ServerEvent, ToolResponse};
use async_trait::async_trait;

/// One open, bidirectional network session with the remote model.
///
/// Implementations must be safe to use from a single consumer task that
/// awaits [`next_event`](LiveTransport::next_event) in a `select!` loop:
/// `next_event` has to be cancel-safe, and sends may be issued while no
/// receive is in flight.
///
/// # Example
///
/// ```rust,ignore
/// use medipulse_live::{LiveTransport, ServerEvent};
///
/// async fn drain(transport: &dyn LiveTransport) -> Result<()> {
///     while let Some(event) = transport.next_event().await {
///         match event? {
///             ServerEvent::Audio { data } => { /* decode and play */ }
///             ServerEvent::ToolCall { calls } => { /* dispatch each */ }
///             _ => {}
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Get the session ID.
    fn session_id(&self) -> &str;

    /// Check if the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Send one encoded microphone frame.
    async fn send_audio(&self, frame: &PcmPayload) -> Result<()>;

    /// Send the result of one tool invocation.
    async fn send_tool_response(&self, response: &ToolResponse) -> Result<()>;

    /// Get the next event from the server.
    ///
    /// Returns `None` when the remote side closed the session.
    async fn next_event(&self) -> Option<Result<ServerEvent>>;

    /// Close the session gracefully.
    async fn close(&self) -> Result<()>;
}

/// A boxed transport for dynamic dispatch.
pub type BoxedTransport = Box<dyn LiveTransport>;
