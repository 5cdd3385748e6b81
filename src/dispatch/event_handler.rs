use crate::config::ToolStreamVerbosity;
use crate::dispatch::chat_runs::ChatRunState;
use crate::dispatch::events::{
    chat_payload, event_payload, AgentEvent, BroadcastOpts, ChatState, DispatchPolicy, EventSink,
    PHASE_ERROR, STREAM_ASSISTANT, STREAM_TOOL,
};
use crate::dispatch::tool_recipients::ToolEventRecipientRegistry;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum spacing between chat delta broadcasts for one client run.
pub const CHAT_DELTA_THROTTLE: Duration = Duration::from_millis(150);

/// The per-run event multiplexer.
///
/// Consumes sequenced agent-run events in arrival order per run and fans them
/// out to the general broadcast, the owning session's unicast path, and
/// tool-stream subscribers, while assembling streamed assistant deltas into
/// finalized chat messages.
pub struct AgentEventHandler {
    sink: Arc<dyn EventSink>,
    policy: Arc<dyn DispatchPolicy>,
    state: Arc<ChatRunState>,
    tool_recipients: Arc<ToolEventRecipientRegistry>,
    last_seq: Mutex<HashMap<String, u64>>,
}

impl AgentEventHandler {
    pub fn new(
        sink: Arc<dyn EventSink>,
        policy: Arc<dyn DispatchPolicy>,
        state: Arc<ChatRunState>,
        tool_recipients: Arc<ToolEventRecipientRegistry>,
    ) -> Self {
        Self {
            sink,
            policy,
            state,
            tool_recipients,
            last_seq: Mutex::new(HashMap::new()),
        }
    }

    /// Process one incoming agent event. Ordering is per run; events for
    /// different runs may interleave freely.
    pub fn handle(&self, evt: &AgentEvent) {
        // Correlation: a registered chat-run entry wins over the bare run id
        // and over the fallback resolver.
        let correlation = self.state.registry.peek(&evt.run_id);
        let client_run_id = correlation
            .as_ref()
            .map(|entry| entry.client_run_id.clone())
            .unwrap_or_else(|| evt.run_id.clone());
        let session_key = correlation
            .as_ref()
            .map(|entry| entry.session_key.clone())
            .or_else(|| self.policy.resolve_session_key(&evt.run_id));
        let aborted = self.state.is_aborted(&client_run_id, &evt.run_id);

        self.track_sequence(evt);

        if evt.stream == STREAM_TOOL {
            self.handle_tool_event(evt, session_key.as_deref());
            return;
        }

        let payload = event_payload(evt, session_key.as_deref(), &evt.data);
        self.sink
            .broadcast(payload.clone(), BroadcastOpts { drop_if_slow: true });
        if let Some(key) = session_key.as_deref() {
            self.sink.send_to_session(key, payload);
        }

        if evt.stream == STREAM_ASSISTANT && !aborted {
            if let Some(text) = evt.text() {
                // Buffer first, unconditionally: a skipped broadcast must not
                // leave stale text behind for the next allowed one.
                self.state.set_buffer(&client_run_id, text);
                if self
                    .state
                    .should_send_delta(&client_run_id, Instant::now(), CHAT_DELTA_THROTTLE)
                {
                    let payload = chat_payload(
                        &client_run_id,
                        session_key.as_deref(),
                        evt.seq,
                        ChatState::Delta,
                        Some(text),
                        None,
                        now_secs(),
                    );
                    self.emit_chat(&evt.run_id, session_key.as_deref(), payload);
                }
            }
        }

        if evt.is_final_lifecycle() {
            self.finalize_run(evt, aborted, session_key.as_deref());
        }
    }

    fn track_sequence(&self, evt: &AgentEvent) {
        let expected = {
            let mut last_seq = self.last_seq.lock();
            let last = last_seq.get(&evt.run_id).copied().unwrap_or(0);
            last_seq.insert(evt.run_id.clone(), evt.seq);
            last + 1
        };
        if evt.seq != expected {
            // Observability signal only; the event itself is still processed.
            self.sink.broadcast(
                json!({
                    "type": "error",
                    "reason": "seq gap",
                    "runId": evt.run_id,
                    "expected": expected,
                    "received": evt.seq,
                }),
                BroadcastOpts { drop_if_slow: true },
            );
        }
    }

    /// Tool telemetry is opt-in and private: gated by verbosity, delivered
    /// only to registered recipient connections and the owning session, never
    /// to the general broadcast.
    fn handle_tool_event(&self, evt: &AgentEvent, session_key: Option<&str>) {
        let verbosity = self.policy.tool_stream_verbosity(&evt.run_id, session_key);
        if verbosity == ToolStreamVerbosity::Off {
            return;
        }

        let data = if verbosity == ToolStreamVerbosity::Full {
            evt.data.clone()
        } else {
            strip_tool_results(&evt.data)
        };
        let payload = event_payload(evt, session_key, &data);

        if let Some(conn_ids) = self.tool_recipients.get(&evt.run_id) {
            if !conn_ids.is_empty() {
                self.sink.send_to_connections(&conn_ids, payload.clone());
            }
        }
        if let Some(key) = session_key {
            self.sink.send_to_session(key, payload);
        }
    }

    fn finalize_run(&self, evt: &AgentEvent, aborted: bool, fallback_session_key: Option<&str>) {
        let shifted = self.state.registry.shift(&evt.run_id);
        let client_run_id = shifted
            .as_ref()
            .map(|entry| entry.client_run_id.clone())
            .unwrap_or_else(|| evt.run_id.clone());
        let session_key = shifted
            .as_ref()
            .map(|entry| entry.session_key.as_str())
            .or(fallback_session_key);

        if aborted {
            // An aborted run's tail must not resurrect a reply.
            self.state.purge(&client_run_id, &evt.run_id);
        } else {
            let buffered = self.state.take_buffer(&client_run_id).unwrap_or_default();
            let text = buffered.trim();
            let is_error = evt.phase() == Some(PHASE_ERROR);
            let state = if is_error {
                ChatState::Error
            } else {
                ChatState::Final
            };
            let error_message = if is_error {
                Some(lifecycle_error_message(&evt.data))
            } else {
                None
            };
            let payload = chat_payload(
                &client_run_id,
                session_key,
                evt.seq,
                state,
                (!text.is_empty()).then_some(text),
                error_message.as_deref(),
                now_secs(),
            );
            self.emit_chat(&evt.run_id, session_key, payload);
            self.state.purge(&client_run_id, &evt.run_id);
        }

        self.tool_recipients.mark_final(&evt.run_id);
        self.policy.clear_run_context(&evt.run_id);
    }

    /// Chat payload delivery: the general broadcast is suppressed for hidden
    /// heartbeat runs, the session unicast always goes out.
    fn emit_chat(&self, run_id: &str, session_key: Option<&str>, payload: Value) {
        let suppress_broadcast =
            self.policy.is_heartbeat_run(run_id) && !self.policy.show_heartbeat_on_broadcast();
        if !suppress_broadcast {
            self.sink
                .broadcast(payload.clone(), BroadcastOpts { drop_if_slow: true });
        }
        if let Some(key) = session_key {
            self.sink.send_to_session(key, payload);
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Drop the bulky fields from a tool event for below-full verbosity.
fn strip_tool_results(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("result");
        map.remove("partialResult");
    }
    data
}

fn lifecycle_error_message(data: &Value) -> String {
    match data.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => "agent run failed".to_string(),
    }
}
