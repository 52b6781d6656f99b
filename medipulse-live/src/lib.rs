//! # medipulse-live
//!
//! Real-time voice assistant sessions for the MediPulse health app.
//!
//! A session streams microphone audio to a remote conversational model,
//! plays the synthesized reply without gaps, and executes the model's
//! requests to change app data (profile edits, bookings and, for
//! administrators, specialist and appointment management) through
//! host-supplied handlers.
//!
//! ## Architecture
//!
//! ```text
//!   AudioInput ──► CapturePipeline ──┐                 ┌──► LiveTransport ──► model
//!                                    ├─► SessionActor ─┤
//!   AudioOutput ◄── PlaybackScheduler ◄┘       │       └──◄ ServerEvent  ◄──┘
//!                                              ▼
//!                               DispatchTable ──► ToolHandlers (host)
//! ```
//!
//! Everything a session owns lives inside one actor task. The host sees a
//! [`Session`] handle (or the [`LiveAssistant`] wrapper), a status channel,
//! and a [`SessionObserver`] for status and microphone level.
//!
//! ## Features
//!
//! - **`gemini`** (default): Gemini Live API transport over WebSocket
//! - **`desktop-audio`**: microphone and speaker through `cpal`
//!
//! ## Example
//!
//! ```rust,ignore
//! use medipulse_live::device::{CpalInput, CpalOutput};
//! use medipulse_live::gemini::{GeminiBackend, GeminiLiveConnector};
//! use medipulse_live::{AudioDevices, ContextSnapshot, LiveAssistant, LiveConfig, NoOpObserver};
//! use std::sync::Arc;
//!
//! let connector = GeminiLiveConnector::with_default_model(GeminiBackend::from_env()?);
//! let devices = AudioDevices::new(CpalInput::new(), CpalOutput::new());
//! let mut assistant = LiveAssistant::new(Arc::new(connector), devices, LiveConfig::default());
//!
//! let snapshot = ContextSnapshot::new("Amina");
//! assistant.connect(&snapshot, handlers, Arc::new(NoOpObserver)).await?;
//! // ...
//! assistant.disconnect().await;
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod model;
pub mod playback;
pub mod session;
pub mod telemetry;
pub mod tools;

// Provider implementations
#[cfg(feature = "gemini")]
pub mod gemini;

// Device backends
#[cfg(feature = "desktop-audio")]
pub mod device;

// Re-exports
pub use audio::{AudioFormat, PcmPayload, SampleBuffer};
pub use capture::{AudioInput, CapturePipeline, CapturedFrame, InputHandle, InputStream};
pub use config::{LiveConfig, LiveConfigBuilder, ToolDefinition};
pub use context::{Appointment, AppointmentStatus, ContextSnapshot, HealthMetric, MetricValue, Modality, Specialist};
pub use controller::{AudioDevices, LiveAssistant, NoOpObserver, Session, SessionObserver, SessionStatus};
pub use error::{LiveError, Result};
pub use events::{ServerEvent, ToolCall, ToolResponse, ToolResult};
pub use model::{BoxedConnector, LiveConnector};
pub use playback::{AudioOutput, OutputStream, PlaybackScheduler, ScheduledBuffer, VoiceId};
pub use session::{BoxedTransport, LiveTransport};
pub use tools::{
    AppointmentRemoval, AppointmentUpdate, AsyncFnToolHandler, Booking, DispatchTable, FnToolHandler, NewSpecialist,
    Privilege, ProfileUpdate, ToolArgs, ToolError, ToolHandler, ToolHandlers, ToolKind,
};
