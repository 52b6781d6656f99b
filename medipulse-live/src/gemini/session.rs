use crate::audio::PcmPayload;
use crate::config::{LiveConfig, ToolDefinition};
use crate::error::{LiveError, Result};
use crate::events::{ServerEvent, ToolCall, ToolResponse};
use crate::session::LiveTransport;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{GeminiBackend, ensure_crypto_provider};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// Gemini-specific client message format.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<GeminiSetup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<GeminiRealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<GeminiToolResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiSetup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRealtimeInput {
    media_chunks: Vec<PcmPayload>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolResponse {
    function_responses: Vec<GeminiFunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiFunctionResponse {
    id: String,
    name: String,
    response: Value,
}

/// Gemini Live session.
///
/// Manages a WebSocket connection to Google's Gemini Live API. One server
/// message can carry several events; the extras wait in `pending` until the
/// next call to [`next_event`](LiveTransport::next_event).
pub struct GeminiLiveSession {
    session_id: String,
    connected: Arc<AtomicBool>,
    sender: Arc<Mutex<WsSink>>,
    receiver: Arc<Mutex<WsSource>>,
    pending: SyncMutex<VecDeque<ServerEvent>>,
}

impl GeminiLiveSession {
    /// Connect to the Gemini Live API and complete the setup handshake.
    pub async fn connect(backend: &GeminiBackend, model: &str, config: LiveConfig) -> Result<Self> {
        ensure_crypto_provider();

        let url = backend.request_url()?;
        let request = url.as_str().into_client_request().map_err(|e| {
            LiveError::connection(format!("Failed to create client request: {}", e))
        })?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| LiveError::connection(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = stream.split();

        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            connected: Arc::new(AtomicBool::new(true)),
            sender: Arc::new(Mutex::new(sink)),
            receiver: Arc::new(Mutex::new(source)),
            pending: SyncMutex::new(VecDeque::new()),
        };

        session.send_setup(model, config).await?;
        session.await_setup_complete().await?;
        tracing::info!(session_id = %session.session_id, model_id = %model, "Gemini Live session ready");

        Ok(session)
    }

    /// Send initial setup message.
    async fn send_setup(&self, model: &str, config: LiveConfig) -> Result<()> {
        let setup = GeminiClientMessage { setup: Some(build_setup(model, config)), ..Default::default() };

        tracing::info!(model_id = %model, "Sending setup message");
        if tracing::enabled!(tracing::Level::DEBUG) {
            let raw = serde_json::to_string(&setup)?;
            tracing::debug!(raw_setup = %raw, "Raw setup message");
        }
        self.send_raw(&setup).await
    }

    /// Wait for `setupComplete`, keeping anything that arrives earlier.
    async fn await_setup_complete(&self) -> Result<()> {
        loop {
            match self.receive_raw().await {
                Some(Ok(events)) => {
                    let mut ready = false;
                    {
                        let mut pending = self.pending.lock();
                        for event in events {
                            if event == ServerEvent::SetupComplete && !ready {
                                ready = true;
                            } else {
                                pending.push_back(event);
                            }
                        }
                    }
                    if ready {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(LiveError::connection("Session closed before setup completed"));
                }
            }
        }
    }

    /// Send a raw message.
    async fn send_raw<T: Serialize>(&self, value: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(LiveError::NotConnected);
        }
        let msg = serde_json::to_string(value)
            .map_err(|e| LiveError::protocol(format!("JSON serialize error: {}", e)))?;

        let mut sender = self.sender.lock().await;
        sender.send(Message::Text(msg.into())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            LiveError::connection(format!("Send error: {}", e))
        })?;

        Ok(())
    }

    /// Receive and translate the next message.
    async fn receive_raw(&self) -> Option<Result<Vec<ServerEvent>>> {
        let mut receiver = self.receiver.lock().await;

        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(translate_message(text.as_str())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => translate_message(&text),
                        Err(e) => Err(LiveError::protocol(format!("Invalid UTF-8 in binary message: {}", e))),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    self.connected.store(false, Ordering::SeqCst);
                    match frame {
                        Some(frame) => tracing::info!(
                            session_id = %self.session_id,
                            code = ?frame.code,
                            reason = frame.reason.as_str(),
                            "Server closed session"
                        ),
                        None => tracing::info!(session_id = %self.session_id, "Server closed session"),
                    }
                    return None;
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Some(Err(LiveError::connection(format!("Receive error: {}", e))));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl LiveTransport for GeminiLiveSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_audio(&self, frame: &PcmPayload) -> Result<()> {
        let msg = GeminiClientMessage {
            realtime_input: Some(GeminiRealtimeInput { media_chunks: vec![frame.clone()] }),
            ..Default::default()
        };
        self.send_raw(&msg).await
    }

    async fn send_tool_response(&self, response: &ToolResponse) -> Result<()> {
        let msg = GeminiClientMessage {
            tool_response: Some(GeminiToolResponse {
                function_responses: vec![GeminiFunctionResponse {
                    id: response.id.clone(),
                    name: response.name.clone(),
                    response: response.response_body(),
                }],
            }),
            ..Default::default()
        };
        tracing::debug!(call_id = %response.id, tool = %response.name, "Sending tool response");
        self.send_raw(&msg).await
    }

    async fn next_event(&self) -> Option<Result<ServerEvent>> {
        let queued = self.pending.lock().pop_front();
        if let Some(event) = queued {
            return Some(Ok(event));
        }

        match self.receive_raw().await? {
            Ok(events) => {
                let mut events = VecDeque::from(events);
                let first = events.pop_front().unwrap_or(ServerEvent::Unknown);
                self.pending.lock().extend(events);
                Some(Ok(first))
            }
            Err(e) => Some(Err(e)),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // A send stuck on the socket holds the sink; the socket is dropped with
        // the session either way.
        let Ok(mut sender) = self.sender.try_lock() else {
            tracing::debug!(session_id = %self.session_id, "Sink busy, closing without a close frame");
            return Ok(());
        };
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| LiveError::connection(format!("Close error: {}", e)))?;

        Ok(())
    }
}

impl std::fmt::Debug for GeminiLiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveSession")
            .field("session_id", &self.session_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

fn build_setup(model: &str, config: LiveConfig) -> GeminiSetup {
    let mut generation_config = json!({
        "responseModalities": config.modalities.unwrap_or_else(|| vec!["AUDIO".to_string()]),
    });

    if let Some(voice) = &config.voice {
        generation_config["speechConfig"] = json!({
            "voiceConfig": {
                "prebuiltVoiceConfig": {
                    "voiceName": voice
                }
            }
        });
    }

    if let Some(budget) = config.thinking_budget {
        generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
    }

    if let Some(temp) = config.temperature {
        generation_config["temperature"] = json!(temp);
    }

    GeminiSetup {
        model: model.to_string(),
        system_instruction: config
            .instruction
            .map(|text| GeminiContent { parts: vec![GeminiTextPart { text }] }),
        generation_config,
        tools: convert_tools(config.tools),
    }
}

fn convert_tools(tools: Option<Vec<ToolDefinition>>) -> Option<Vec<Value>> {
    tools.filter(|t| !t.is_empty()).map(|t_vec| {
        let function_declarations: Vec<Value> = t_vec
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description.unwrap_or_default(),
                    "parameters": t.parameters.unwrap_or_else(|| json!({ "type": "OBJECT", "properties": {} }))
                })
            })
            .collect();

        vec![json!({
            "functionDeclarations": function_declarations
        })]
    })
}

/// Translate one Gemini server message into events, in message order.
fn translate_message(raw: &str) -> Result<Vec<ServerEvent>> {
    tracing::trace!(%raw, "Translating Gemini message");
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LiveError::protocol(format!("Parse error: {}", e)))?;

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        let parts = content
            .get("modelTurn")
            .and_then(|t| t.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            if let Some(data) = part.get("inlineData").and_then(|d| d.get("data")).and_then(Value::as_str) {
                events.push(ServerEvent::Audio { data: data.to_string() });
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                events.push(ServerEvent::Text { text: text.to_string() });
            }
        }

        if flag(content, "interrupted") {
            events.push(ServerEvent::Interrupted);
        }
        if flag(content, "turnComplete") {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(calls) = value
        .get("toolCall")
        .and_then(|t| t.get("functionCalls"))
        .and_then(Value::as_array)
    {
        let calls: Vec<ToolCall> = calls
            .iter()
            .map(|call| {
                ToolCall::new(
                    call.get("id").and_then(Value::as_str).unwrap_or_default(),
                    call.get("name").and_then(Value::as_str).unwrap_or_default(),
                    call.get("args").cloned().unwrap_or(Value::Null),
                )
            })
            .collect();
        if !calls.is_empty() {
            events.push(ServerEvent::ToolCall { calls });
        }
    }

    if let Some(ids) = value
        .get("toolCallCancellation")
        .and_then(|c| c.get("ids"))
        .and_then(Value::as_array)
    {
        let ids = ids.iter().filter_map(Value::as_str).map(str::to_string).collect();
        events.push(ServerEvent::ToolCallCancellation { ids });
    }

    if let Some(go_away) = value.get("goAway") {
        let time_left = go_away.get("timeLeft").and_then(Value::as_str).map(str::to_string);
        events.push(ServerEvent::GoAway { time_left });
    }

    Ok(events)
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ToolResult;
    use serde_json::json;

    #[test]
    fn test_convert_tools() {
        let tools = vec![
            ToolDefinition::new("updateProfile")
                .with_description("Updates the user's profile")
                .with_parameters(json!({
                    "type": "OBJECT",
                    "properties": { "name": { "type": "STRING" } }
                })),
            ToolDefinition::new("no_params"),
        ];

        let result = convert_tools(Some(tools)).unwrap();
        let decls = result[0]["functionDeclarations"].as_array().unwrap();

        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0]["name"], "updateProfile");
        assert!(decls[0]["parameters"].get("properties").is_some());
        assert_eq!(decls[1]["description"], "");
        assert_eq!(decls[1]["parameters"]["type"], "OBJECT");
    }

    #[test]
    fn test_convert_tools_empty() {
        assert!(convert_tools(None).is_none());
        assert!(convert_tools(Some(vec![])).is_none());
    }

    #[test]
    fn test_setup_message_shape() {
        let config = LiveConfig::default()
            .with_instruction("Be brief.")
            .with_tools(vec![ToolDefinition::new("bookAppointment")]);
        let msg = GeminiClientMessage { setup: Some(build_setup("models/m", config)), ..Default::default() };
        let value = serde_json::to_value(&msg).unwrap();
        let setup = &value["setup"];

        assert_eq!(setup["model"], "models/m");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(setup["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "bookAppointment");
        assert!(value.get("realtimeInput").is_none());
    }

    #[test]
    fn test_audio_and_tool_response_messages() {
        let audio = GeminiClientMessage {
            realtime_input: Some(GeminiRealtimeInput { media_chunks: vec![crate::audio::encode_frame(&[0.0])] }),
            ..Default::default()
        };
        let value = serde_json::to_value(&audio).unwrap();
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(value["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");

        let response = ToolResponse {
            id: "fc-1".into(),
            name: "bookAppointment".into(),
            result: ToolResult::ok("appointment booked"),
        };
        let msg = GeminiClientMessage {
            tool_response: Some(GeminiToolResponse {
                function_responses: vec![GeminiFunctionResponse {
                    id: response.id.clone(),
                    name: response.name.clone(),
                    response: response.response_body(),
                }],
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"toolResponse": {"functionResponses": [{
                "id": "fc-1",
                "name": "bookAppointment",
                "response": {"result": {"status": "ok", "detail": "appointment booked"}}
            }]}})
        );
    }

    #[test]
    fn test_translate_setup_complete() {
        assert_eq!(translate_message(r#"{"setupComplete":{}}"#).unwrap(), vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn test_translate_parts_then_interrupt() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"text": "hello"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQA="}}
                ]},
                "interrupted": true,
                "turnComplete": true
            }
        })
        .to_string();

        assert_eq!(
            translate_message(&raw).unwrap(),
            vec![
                ServerEvent::Audio { data: "AAA=".into() },
                ServerEvent::Text { text: "hello".into() },
                ServerEvent::Audio { data: "AQA=".into() },
                ServerEvent::Interrupted,
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_translate_all_function_calls() {
        let raw = json!({
            "toolCall": {"functionCalls": [
                {"id": "a", "name": "updateProfile", "args": {"name": "Amal"}},
                {"id": "b", "name": "bookAppointment"}
            ]}
        })
        .to_string();

        let events = translate_message(&raw).unwrap();
        let ServerEvent::ToolCall { calls } = &events[0] else {
            panic!("expected tool call, got {events:?}");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ToolCall::new("a", "updateProfile", json!({"name": "Amal"})));
        assert_eq!(calls[1].args, Value::Null);
    }

    #[test]
    fn test_translate_cancellation_and_go_away() {
        let events = translate_message(r#"{"toolCallCancellation":{"ids":["a","b"]}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::ToolCallCancellation { ids: vec!["a".into(), "b".into()] }]);

        let events = translate_message(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::GoAway { time_left: Some("10s".into()) }]);
    }

    #[test]
    fn test_translate_unknown_and_malformed() {
        assert!(translate_message(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap().is_empty());
        assert!(matches!(translate_message("not json"), Err(LiveError::ProtocolError(_))));
    }
}
