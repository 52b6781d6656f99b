//! Session controller: lifecycle of one live voice conversation.
//!
//! A [`Session`] is a handle to a single actor task. The task owns every
//! resource of the conversation (microphone capture, playback scheduler,
//! network transport, in-flight tool calls) and is the only writer of their
//! state. It serializes its event sources with one `select!` loop:
//!
//! ```text
//!   control commands ──┐
//!   captured frames ───┤
//!   server events ─────┼──► SessionActor ──► status / volume observer
//!   finished tools ────┘
//! ```
//!
//! Outbound microphone audio is handed to a separate writer task, so a slow
//! network send never holds up control commands or teardown.
//!
//! Status moves `connecting → connected → {disconnected | error |
//! permission_denied}`. Failures are reported through the status channel and
//! the [`SessionObserver`], never returned across the session boundary.
//!
//! [`LiveAssistant`] wraps this for hosts that want the "at most one active
//! session" rule enforced for them.

use crate::audio::{self, OUTPUT_SAMPLE_RATE};
use crate::capture::{AudioInput, CapturePipeline, CapturedFrame, VolumeMeter};
use crate::config::LiveConfig;
use crate::context::ContextSnapshot;
use crate::error::{LiveError, Result};
use crate::audio::PcmPayload;
use crate::events::{ServerEvent, ToolResponse};
use crate::model::BoxedConnector;
use crate::playback::{AudioOutput, PlaybackScheduler};
use crate::session::LiveTransport;
use crate::tools::{DispatchTable, ToolHandlers};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

/// Connection state reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session, ready to connect.
    Idle,
    /// Acquiring the microphone and opening the network session.
    Connecting,
    /// Streaming in both directions.
    Connected,
    /// Ended by the user or the remote side.
    Disconnected,
    /// Ended by a device or network failure.
    Error,
    /// Microphone access was refused.
    PermissionDenied,
}

impl SessionStatus {
    /// Whether a session in this state still holds resources.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error | Self::PermissionDenied)
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host callbacks for status and microphone level.
///
/// Both are called from the session task and must not block.
pub trait SessionObserver: Send + Sync {
    /// Called on every status transition.
    fn on_status(&self, _status: SessionStatus) {}

    /// Called once per captured frame with the smoothed level in `[0, 1]`.
    fn on_volume(&self, _level: f32) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl SessionObserver for NoOpObserver {}

/// The microphone and speaker a session runs on.
#[derive(Clone)]
pub struct AudioDevices {
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn AudioOutput>,
}

impl AudioDevices {
    pub fn new(input: impl AudioInput + 'static, output: impl AudioOutput + 'static) -> Self {
        Self { input: Arc::new(input), output: Arc::new(output) }
    }
}

impl fmt::Debug for AudioDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDevices").finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Command {
    Disconnect,
}

/// Handle to one running live session.
///
/// Dropping the handle disconnects the session.
#[derive(Debug)]
pub struct Session {
    id: String,
    control: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawn a session task and begin connecting.
    ///
    /// The snapshot is rendered into the opening instruction and its
    /// privilege fixes the tool set for the session's lifetime.
    pub fn start(
        connector: BoxedConnector,
        devices: AudioDevices,
        mut config: LiveConfig,
        snapshot: &ContextSnapshot,
        handlers: ToolHandlers,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let table = Arc::new(DispatchTable::new(snapshot.privilege(), handlers));
        config.instruction = Some(snapshot.render_instruction());
        config.tools = Some(table.definitions());

        let id = uuid::Uuid::new_v4().to_string();
        let (control_tx, control_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connecting);

        let actor = SessionActor {
            connector,
            devices,
            config,
            table,
            observer,
            status: status_tx,
            control: control_rx,
        };
        let span = tracing::info_span!("live_session", session_id = %id);
        let task = tokio::spawn(actor.run().instrument(span));

        Self { id, control: control_tx, status: status_rx, task: Some(task) }
    }

    /// Local id of this session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the session has ended on its own and return how it ended.
    pub async fn closed(&mut self) -> SessionStatus {
        if let Ok(status) = self.status.wait_for(SessionStatus::is_terminal).await {
            return *status;
        }
        *self.status.borrow()
    }

    /// Tear the session down and wait for its resources to be released.
    ///
    /// During `connecting` the in-flight acquisition is allowed to settle
    /// first. Returns the final status.
    pub async fn disconnect(mut self) -> SessionStatus {
        // Full or closed both mean the actor is already stopping.
        let _ = self.control.try_send(Command::Disconnect);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(session_id = %self.id, error = %e, "Session task failed");
                return SessionStatus::Error;
            }
        }
        *self.status.borrow()
    }
}

/// Longest the actor waits on a tool response send.
const RESPONSE_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest teardown waits for the transport to close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound audio writer.
///
/// Frames are handed over without waiting and dropped while the writer is
/// behind, so a stalled network send never blocks the session task.
struct Uplink {
    frames: mpsc::Sender<PcmPayload>,
    task: JoinHandle<()>,
}

impl Uplink {
    fn spawn(transport: Arc<dyn LiveTransport>, capacity: usize) -> Self {
        let (frames, mut rx) = mpsc::channel::<PcmPayload>(capacity.max(1));
        let task = tokio::spawn(
            async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = transport.send_audio(&frame).await {
                        if !transport.is_connected() {
                            tracing::error!(error = %e, "Network session lost");
                            return;
                        }
                        tracing::debug!(error = %e, "Dropped outbound frame");
                    }
                }
            }
            .in_current_span(),
        );
        Self { frames, task }
    }

    /// Queue a frame. Returns `false` once the writer has stopped.
    fn push(&self, frame: PcmPayload) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("Uplink behind, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Cancel the writer, including a send that is stuck in flight.
    async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

enum Established {
    Ready,
    Cancelled,
}

#[derive(Default)]
struct Resources {
    capture: Option<CapturePipeline>,
    frames: Option<mpsc::Receiver<CapturedFrame>>,
    playback: Option<PlaybackScheduler>,
    transport: Option<Arc<dyn LiveTransport>>,
    uplink: Option<Uplink>,
}

impl Resources {
    /// Release capture, playback and transport in that order.
    ///
    /// Every step runs even if an earlier one fails.
    async fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                tracing::warn!(error = %e, "Failed to release microphone");
            }
        }
        self.frames = None;

        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.shutdown() {
                tracing::warn!(error = %e, "Failed to release audio output");
            }
        }

        if let Some(uplink) = self.uplink.take() {
            uplink.stop().await;
        }
        if let Some(transport) = self.transport.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to close network session"),
                Err(_) => tracing::warn!("Timed out closing network session"),
            }
        }
        tracing::info!("Session resources released");
    }
}

struct SessionActor {
    connector: BoxedConnector,
    devices: AudioDevices,
    config: LiveConfig,
    table: Arc<DispatchTable>,
    observer: Arc<dyn SessionObserver>,
    status: watch::Sender<SessionStatus>,
    control: mpsc::Receiver<Command>,
}

impl SessionActor {
    async fn run(mut self) {
        self.report(SessionStatus::Connecting);

        let mut resources = Resources::default();
        let outcome = match self.establish(&mut resources).await {
            Ok(Established::Ready) => {
                self.report(SessionStatus::Connected);
                self.pump(&mut resources).await
            }
            Ok(Established::Cancelled) => {
                tracing::info!("Connect cancelled");
                SessionStatus::Disconnected
            }
            Err(e) if e.is_permission_denied() => {
                tracing::warn!(error = %e, "Microphone permission denied");
                SessionStatus::PermissionDenied
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start session");
                SessionStatus::Error
            }
        };

        resources.teardown().await;
        self.report(outcome);
    }

    fn report(&self, status: SessionStatus) {
        tracing::info!(%status, "Session status changed");
        self.status.send_replace(status);
        self.observer.on_status(status);
    }

    /// Whether the host asked to stop, or dropped its handle.
    fn cancel_requested(&mut self) -> bool {
        match self.control.try_recv() {
            Ok(Command::Disconnect) => true,
            Err(mpsc::error::TryRecvError::Disconnected) => true,
            Err(mpsc::error::TryRecvError::Empty) => false,
        }
    }

    /// Acquire microphone, speaker and network session, in that order.
    ///
    /// Cancellation is checked between steps; a pending step always settles
    /// first.
    async fn establish(&mut self, resources: &mut Resources) -> Result<Established> {
        let (capture, frames) = CapturePipeline::start(
            self.devices.input.as_ref(),
            self.config.frame_samples,
            self.config.channel_capacity,
        )
        .await?;
        resources.capture = Some(capture);
        resources.frames = Some(frames);
        if self.cancel_requested() {
            return Ok(Established::Cancelled);
        }

        resources.playback = Some(PlaybackScheduler::open(self.devices.output.as_ref()).await?);
        if self.cancel_requested() {
            return Ok(Established::Cancelled);
        }

        let timeout = self.config.connect_timeout;
        tracing::info!(provider = %self.connector.provider(), model_id = %self.connector.model_id(), "Opening network session");
        let transport = tokio::time::timeout(timeout, self.connector.connect(self.config.clone()))
            .await
            .map_err(|_| LiveError::connection(format!("timed out after {:?} opening session", timeout)))??;
        let transport: Arc<dyn LiveTransport> = Arc::from(transport);
        resources.uplink = Some(Uplink::spawn(transport.clone(), self.config.channel_capacity));
        resources.transport = Some(transport);
        if self.cancel_requested() {
            return Ok(Established::Cancelled);
        }

        // Audio captured before the network opened has no replay value.
        if let Some(frames) = resources.frames.as_mut() {
            let mut stale = 0usize;
            while frames.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                tracing::debug!(stale, "Dropped frames captured before connect");
            }
        }

        Ok(Established::Ready)
    }

    /// Run the connected session until it ends; returns the final status.
    async fn pump(&mut self, resources: &mut Resources) -> SessionStatus {
        let Resources { frames, playback, transport, uplink, .. } = resources;
        let (Some(frames), Some(playback), Some(transport), Some(uplink)) =
            (frames.as_mut(), playback.as_mut(), transport.as_deref(), uplink.as_ref())
        else {
            tracing::error!("Session resources missing after connect");
            return SessionStatus::Error;
        };

        let mut meter = VolumeMeter::new();
        let mut tools: JoinSet<ToolResponse> = JoinSet::new();

        loop {
            tokio::select! {
                command = self.control.recv() => {
                    match command {
                        Some(Command::Disconnect) => tracing::info!("Disconnect requested"),
                        None => tracing::info!("Session handle dropped"),
                    }
                    break SessionStatus::Disconnected;
                }

                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        tracing::error!("Microphone stream ended unexpectedly");
                        break SessionStatus::Error;
                    };
                    self.observer.on_volume(meter.observe(frame.volume));
                    if !uplink.push(frame.payload) {
                        break SessionStatus::Error;
                    }
                }

                event = transport.next_event() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(event, playback, &mut tools),
                        Some(Err(e)) if transport.is_connected() => {
                            tracing::warn!(error = %e, "Ignoring malformed server message");
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Network session failed");
                            break SessionStatus::Error;
                        }
                        None => {
                            tracing::info!("Remote side closed the session");
                            break SessionStatus::Disconnected;
                        }
                    }
                }

                Some(joined) = tools.join_next(), if !tools.is_empty() => {
                    match joined {
                        Ok(response) => {
                            match tokio::time::timeout(RESPONSE_SEND_TIMEOUT, transport.send_tool_response(&response)).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    tracing::warn!(call_id = %response.id, tool = %response.name, error = %e, "Failed to send tool response");
                                    if !transport.is_connected() {
                                        break SessionStatus::Error;
                                    }
                                }
                                Err(_) => {
                                    tracing::warn!(call_id = %response.id, tool = %response.name, "Timed out sending tool response");
                                }
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Tool task failed"),
                    }
                }
            }
        }
    }

    fn handle_event(
        &self,
        event: ServerEvent,
        playback: &mut PlaybackScheduler,
        tools: &mut JoinSet<ToolResponse>,
    ) {
        match event {
            ServerEvent::Audio { data } => match audio::decode_payload(&data, OUTPUT_SAMPLE_RATE, 1) {
                Ok(buffer) if buffer.is_empty() => {}
                Ok(buffer) => {
                    if let Err(e) = playback.enqueue(&buffer) {
                        tracing::warn!(error = %e, "Failed to schedule response audio");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Dropping corrupt audio chunk"),
            },
            ServerEvent::Interrupted => playback.interrupt(),
            ServerEvent::ToolCall { calls } => {
                for call in calls {
                    tracing::debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
                    let table = self.table.clone();
                    tools.spawn(async move { table.dispatch(&call).await });
                }
            }
            ServerEvent::ToolCallCancellation { ids } => {
                tracing::info!(?ids, "Model withdrew tool calls");
            }
            ServerEvent::GoAway { time_left } => {
                tracing::warn!(time_left = ?time_left, "Server will close the session soon");
            }
            ServerEvent::Text { text } => tracing::debug!(%text, "Model text"),
            ServerEvent::TurnComplete => tracing::debug!("Model turn complete"),
            ServerEvent::SetupComplete => tracing::debug!("Setup complete"),
            ServerEvent::Unknown => tracing::trace!("Ignoring unknown server message"),
        }
    }
}

/// Owns at most one [`Session`] for a host UI.
pub struct LiveAssistant {
    connector: BoxedConnector,
    devices: AudioDevices,
    config: LiveConfig,
    session: Option<Session>,
}

impl LiveAssistant {
    pub fn new(connector: BoxedConnector, devices: AudioDevices, config: LiveConfig) -> Self {
        Self { connector, devices, config, session: None }
    }

    /// Start a session.
    ///
    /// Fails with [`LiveError::InvalidState`] while a session is connecting
    /// or connected. A session that already ended is released first.
    pub async fn connect(
        &mut self,
        snapshot: &ContextSnapshot,
        handlers: ToolHandlers,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<()> {
        if let Some(session) = &self.session {
            if session.status().is_active() {
                return Err(LiveError::invalid_state(format!(
                    "session {} is {}; disconnect first",
                    session.id(),
                    session.status()
                )));
            }
        }
        if let Some(previous) = self.session.take() {
            previous.disconnect().await;
        }

        self.session = Some(Session::start(
            self.connector.clone(),
            self.devices.clone(),
            self.config.clone(),
            snapshot,
            handlers,
            observer,
        ));
        Ok(())
    }

    /// Tear down the active session. No-op when there is none.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let status = session.disconnect().await;
            tracing::debug!(%status, "Assistant session ended");
        }
    }

    /// Status as the host should render it; an ended-by-user session reads as idle.
    pub fn status(&self) -> SessionStatus {
        match self.session.as_ref().map(Session::status) {
            None | Some(SessionStatus::Disconnected) => SessionStatus::Idle,
            Some(status) => status,
        }
    }

    /// The current session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Mutable access to the current session, e.g. to await [`Session::closed`].
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }
}

impl fmt::Debug for LiveAssistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveAssistant")
            .field("provider", &self.connector.provider())
            .field("session", &self.session)
            .finish()
    }
}
