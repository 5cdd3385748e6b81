use crate::config::ToolStreamVerbosity;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

pub const STREAM_ASSISTANT: &str = "assistant";
pub const STREAM_TOOL: &str = "tool";
pub const STREAM_LIFECYCLE: &str = "lifecycle";

pub const PHASE_END: &str = "end";
pub const PHASE_ERROR: &str = "error";

/// One sequenced event emitted by the dispatch pipeline for an agent run.
///
/// `stream` discriminates assistant text deltas, tool telemetry, and
/// lifecycle transitions; anything else is passed through opaquely.
/// `seq` is per run id, strictly increasing by 1 in the well-behaved case.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub run_id: String,
    pub seq: u64,
    pub stream: String,
    #[serde(default)]
    pub data: Value,
}

impl AgentEvent {
    pub fn text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }

    pub fn phase(&self) -> Option<&str> {
        self.data.get("phase").and_then(Value::as_str)
    }

    pub fn is_final_lifecycle(&self) -> bool {
        self.stream == STREAM_LIFECYCLE
            && matches!(self.phase(), Some(PHASE_END) | Some(PHASE_ERROR))
    }
}

/// Delivery hints for the general broadcast channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastOpts {
    /// The payload may be dropped for subscribers that cannot keep up.
    pub drop_if_slow: bool,
}

/// Fan-out seam the gateway wires to its UI/subscriber transport.
pub trait EventSink: Send + Sync {
    /// Fan out to every subscriber.
    fn broadcast(&self, payload: Value, opts: BroadcastOpts);

    /// Deliver only to the given connection ids.
    fn send_to_connections(&self, conn_ids: &HashSet<String>, payload: Value);

    /// Deliver to whoever is attached to one session.
    fn send_to_session(&self, session_key: &str, payload: Value);
}

/// Per-run policy and context lookups the event handler depends on.
///
/// Implementations must not panic; resolution failures are expected to fall
/// back to the conservative default (verbosity off, heartbeats hidden).
pub trait DispatchPolicy: Send + Sync {
    /// Tool-telemetry verbosity for a run, already reduced over the
    /// per-run / per-session / global precedence chain.
    fn tool_stream_verbosity(
        &self,
        run_id: &str,
        session_key: Option<&str>,
    ) -> ToolStreamVerbosity;

    /// Whether the run is a background heartbeat run.
    fn is_heartbeat_run(&self, run_id: &str) -> bool;

    /// Whether successful heartbeat chat output may reach the general
    /// broadcast.
    fn show_heartbeat_on_broadcast(&self) -> bool;

    /// Fallback session key for a run with no chat-run correlation.
    fn resolve_session_key(&self, run_id: &str) -> Option<String>;

    /// Drop any per-run agent context held outside this core.
    fn clear_run_context(&self, run_id: &str);
}

/// Streaming-assembly state carried on outbound chat payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Delta,
    Final,
    Error,
}

impl ChatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Final => "final",
            Self::Error => "error",
        }
    }
}

/// Outbound chat payload for UI and session subscribers.
pub(crate) fn chat_payload(
    run_id: &str,
    session_key: Option<&str>,
    seq: u64,
    state: ChatState,
    message_text: Option<&str>,
    error_message: Option<&str>,
    timestamp: u64,
) -> Value {
    let mut payload = json!({
        "type": "chat",
        "runId": run_id,
        "sessionKey": session_key,
        "seq": seq,
        "state": state.as_str(),
    });
    if let Some(text) = message_text {
        payload["message"] = json!({
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "timestamp": timestamp,
        });
    }
    if let Some(error) = error_message {
        payload["errorMessage"] = json!(error);
    }
    payload
}

/// Raw agent event as forwarded to subscribers, session key attached when
/// known.
pub(crate) fn event_payload(evt: &AgentEvent, session_key: Option<&str>, data: &Value) -> Value {
    json!({
        "type": "agent",
        "runId": evt.run_id,
        "sessionKey": session_key,
        "seq": evt.seq,
        "stream": evt.stream,
        "data": data,
    })
}
