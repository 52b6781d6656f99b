//! Scripted devices and an in-memory transport for session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use medipulse_live::{
    AudioFormat, AudioInput, AudioOutput, BoxedTransport, InputStream, LiveConfig, LiveConnector, LiveError,
    LiveTransport, OutputStream, PcmPayload, Result, SampleBuffer, ServerEvent, SessionObserver, SessionStatus,
    ToolResponse, VoiceId,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Grant,
    Deny,
    Fail,
}

/// A microphone whose samples are pushed by the test.
pub struct ScriptedInput {
    mode: InputMode,
    pub opens: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    /// Make releasing the microphone report an error.
    pub fail_release: Arc<AtomicBool>,
    feeder: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
}

impl ScriptedInput {
    pub fn new(mode: InputMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            opens: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            fail_release: Arc::new(AtomicBool::new(false)),
            feeder: Mutex::new(None),
        })
    }

    /// Feed one block of samples to the open stream.
    pub fn speak(&self, samples: Vec<f32>) -> bool {
        match self.feeder.lock().as_ref() {
            Some(tx) => tx.try_send(samples).is_ok(),
            None => false,
        }
    }

    /// End the stream as if the device vanished.
    pub fn unplug(&self) {
        self.feeder.lock().take();
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioInput for ScriptedInput {
    async fn open(&self, format: AudioFormat) -> Result<InputStream> {
        assert_eq!(format, AudioFormat::pcm16_16khz());
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            InputMode::Deny => return Err(LiveError::permission("user dismissed the prompt")),
            InputMode::Fail => return Err(LiveError::device("no microphone attached")),
            InputMode::Grant => {}
        }
        let (tx, rx) = mpsc::channel(64);
        *self.feeder.lock() = Some(tx);
        let releases = self.releases.clone();
        let fail_release = self.fail_release.clone();
        Ok(InputStream::new(rx, move || {
            releases.fetch_add(1, Ordering::SeqCst);
            if fail_release.load(Ordering::SeqCst) {
                return Err(LiveError::device("microphone driver refused to stop"));
            }
            Ok(())
        }))
    }
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct OutputState {
    pub now: f64,
    pub opens: usize,
    pub closes: usize,
    /// Start time of every buffer ever scheduled.
    pub scheduled: BTreeMap<VoiceId, f64>,
    pub stopped: Vec<VoiceId>,
    /// Make closing the output report an error.
    pub fail_close: bool,
}

impl OutputState {
    /// Buffers scheduled and never stopped.
    pub fn playing(&self) -> usize {
        self.scheduled.keys().filter(|id| !self.stopped.contains(id)).count()
    }
}

/// A speaker with a clock the test moves by hand.
#[derive(Clone, Default)]
pub struct ManualOutput {
    pub state: Arc<Mutex<OutputState>>,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        self.state.lock().now += seconds;
    }

    /// Open a stream directly, without going through a session.
    pub fn stream(&self) -> Box<dyn OutputStream> {
        self.state.lock().opens += 1;
        Box::new(ManualStream { state: self.state.clone() })
    }
}

#[async_trait]
impl AudioOutput for ManualOutput {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn OutputStream>> {
        assert_eq!(format, AudioFormat::pcm16_24khz());
        Ok(self.stream())
    }
}

struct ManualStream {
    state: Arc<Mutex<OutputState>>,
}

impl OutputStream for ManualStream {
    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn schedule(&mut self, id: VoiceId, _buffer: &SampleBuffer, start_at: f64) -> Result<()> {
        self.state.lock().scheduled.insert(id, start_at);
        Ok(())
    }

    fn stop(&mut self, id: VoiceId) -> Result<()> {
        self.state.lock().stopped.push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closes += 1;
        if state.fail_close {
            return Err(LiveError::device("speaker driver refused to close"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The far end of every transport a [`MockConnector`] opens.
#[derive(Default)]
pub struct Remote {
    inbound: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
    connected: AtomicBool,
    pub audio: Mutex<Vec<PcmPayload>>,
    /// Audio sends started, including ones that never finished.
    pub attempts: AtomicUsize,
    pub responses: Mutex<Vec<ToolResponse>>,
    pub closes: AtomicUsize,
}

impl Remote {
    /// Deliver an event to the session.
    pub fn push(&self, event: ServerEvent) {
        let sent = self.inbound.lock().as_ref().map(|tx| tx.send(event).is_ok()).unwrap_or(false);
        assert!(sent, "no open transport to push to");
    }

    /// Hang up from the server side.
    pub fn hang_up(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.inbound.lock().take();
    }

    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn audio_frames(&self) -> usize {
        self.audio.lock().len()
    }

    pub fn responses(&self) -> Vec<ToolResponse> {
        self.responses.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockConnector {
    pub remote: Arc<Remote>,
    pub connects: AtomicUsize,
    pub configs: Mutex<Vec<LiveConfig>>,
    fail: bool,
    delay: Option<Duration>,
    stall_audio: bool,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail: true, ..Self::default() })
    }

    /// Takes `delay` to open each session.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay: Some(delay), ..Self::default() })
    }

    /// Opens sessions whose audio sends never complete.
    pub fn stalling() -> Arc<Self> {
        Arc::new(Self { stall_audio: true, ..Self::default() })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Tool names declared on the most recent connect.
    pub fn declared_tools(&self) -> Vec<String> {
        self.configs
            .lock()
            .last()
            .and_then(|c| c.tools.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    pub fn last_instruction(&self) -> Option<String> {
        self.configs.lock().last().and_then(|c| c.instruction.clone())
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        "mock-live"
    }

    async fn connect(&self, config: LiveConfig) -> Result<BoxedTransport> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().push(config);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(LiveError::connection("handshake refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.remote.inbound.lock() = Some(tx);
        self.remote.connected.store(true, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            id: format!("mock-{n}"),
            remote: self.remote.clone(),
            inbound: tokio::sync::Mutex::new(rx),
            stall_audio: self.stall_audio,
        }))
    }
}

struct MockTransport {
    id: String,
    remote: Arc<Remote>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEvent>>,
    stall_audio: bool,
}

#[async_trait]
impl LiveTransport for MockTransport {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.remote.connected.load(Ordering::SeqCst)
    }

    async fn send_audio(&self, frame: &PcmPayload) -> Result<()> {
        if !self.is_connected() {
            return Err(LiveError::NotConnected);
        }
        self.remote.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall_audio {
            std::future::pending::<()>().await;
        }
        self.remote.audio.lock().push(frame.clone());
        Ok(())
    }

    async fn send_tool_response(&self, response: &ToolResponse) -> Result<()> {
        if !self.is_connected() {
            return Err(LiveError::NotConnected);
        }
        self.remote.responses.lock().push(response.clone());
        Ok(())
    }

    async fn next_event(&self) -> Option<Result<ServerEvent>> {
        self.inbound.lock().await.recv().await.map(Ok)
    }

    async fn close(&self) -> Result<()> {
        self.remote.closes.fetch_add(1, Ordering::SeqCst);
        self.remote.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingObserver {
    pub statuses: Mutex<Vec<SessionStatus>>,
    pub volumes: Mutex<Vec<f32>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.statuses.lock().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_status(&self, status: SessionStatus) {
        self.statuses.lock().push(status);
    }

    fn on_volume(&self, level: f32) {
        self.volumes.lock().push(level);
    }
}
