use crate::channels::{InboundMessage, OutboundSender};
use crate::config::Config;
use crate::session::{
    SendPolicy, SessionEntry, SessionKey, SessionKeyResolver, SessionStore, TranscriptWriter,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Model-selection fields shared with the dispatcher. Mutated in place as the
/// selection resolves so reply templates can reference the eventually-chosen
/// model without a second round trip.
#[derive(Debug, Clone, Default)]
pub struct ReplyModelInfo {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub model_full: Option<String>,
    pub thinking_level: Option<String>,
}

/// Everything the dispatch pipeline needs to execute one run for one inbound
/// message.
#[derive(Clone)]
pub struct DispatchRequest {
    pub run_id: String,
    pub session_id: String,
    pub session_key: String,
    pub channel_id: String,
    pub account_id: String,
    pub sender: String,
    /// Message body as received.
    pub body: String,
    /// Body prefixed with the receive time, for prompts that want it.
    pub annotated_body: String,
    pub timestamp: u64,
    pub model_info: Arc<Mutex<ReplyModelInfo>>,
}

/// One reply fragment surfaced by the dispatcher's delivery callback.
/// Only final fragments reach the channel; streaming partials are handled by
/// the event multiplexer.
#[derive(Debug, Clone)]
pub struct ReplyFragment {
    pub text: String,
    pub is_final: bool,
}

/// The external agent/prompt pipeline. Implementations run the model turn and
/// feed reply fragments through `deliver` as they materialize.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        request: DispatchRequest,
        cancel: CancellationToken,
        deliver: &(dyn Fn(ReplyFragment) + Send + Sync),
    ) -> Result<()>;
}

/// Entry point for inbound channel messages: resolves the session, persists
/// the user turn, runs the dispatch pipeline, and forwards the finalized
/// reply to the channel's outbound sender.
///
/// Nothing here propagates to the caller; every failure is logged and
/// converted into a default, a suppressed side effect, or a dropped message.
pub struct ChannelMessageHandler {
    config: Arc<Config>,
    store: Arc<SessionStore>,
    resolver: SessionKeyResolver,
    dispatcher: Arc<dyn AgentDispatcher>,
    outbound: Arc<dyn OutboundSender>,
}

impl ChannelMessageHandler {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn AgentDispatcher>,
        outbound: Arc<dyn OutboundSender>,
    ) -> Self {
        Self {
            config,
            store,
            resolver: SessionKeyResolver::new(),
            dispatcher,
            outbound,
        }
    }

    pub async fn handle(&self, channel_id: &str, account_id: &str, msg: InboundMessage) {
        let session_key = self.resolver.resolve(channel_id, &msg.from);

        let entry = match self.store.update(|map| {
            resolve_session_entry(map, &session_key, channel_id, &msg.from, &self.config)
        }) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(channel = channel_id, "Failed to update session store: {e}");
                return;
            }
        };

        let timestamp = msg.timestamp.unwrap_or_else(now_secs);
        let transcript = TranscriptWriter::new(
            self.transcript_path(&entry),
            entry.session_id.as_str(),
            self.config.workspace_dir.clone(),
        );
        if let Err(e) = transcript.append_user_message(&msg.text, timestamp) {
            // Durability loss must not block the conversation.
            tracing::warn!(
                session_id = entry.session_id.as_str(),
                "Failed to append transcript: {e}"
            );
        }

        let run_id = msg
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let model_info = Arc::new(Mutex::new(ReplyModelInfo {
            provider: entry.model_provider.clone(),
            model: entry.model.clone(),
            ..ReplyModelInfo::default()
        }));
        let request = DispatchRequest {
            run_id,
            session_id: entry.session_id.to_string(),
            session_key: session_key.as_str().to_string(),
            channel_id: channel_id.to_string(),
            account_id: account_id.to_string(),
            sender: msg.from.clone(),
            body: msg.text.clone(),
            annotated_body: annotate_body(&msg.text, timestamp),
            timestamp,
            model_info,
        };

        let finals: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&finals);
        let deliver = move |fragment: ReplyFragment| {
            if fragment.is_final && !fragment.text.trim().is_empty() {
                collected.lock().push(fragment.text);
            }
        };

        let cancel = CancellationToken::new();
        if let Err(e) = self.dispatcher.dispatch(request, cancel, &deliver).await {
            tracing::error!(
                channel = channel_id,
                session_key = session_key.as_str(),
                "Dispatch failed: {e}"
            );
            return;
        }

        let reply = finals.lock().join("\n\n");
        if reply.is_empty() {
            return;
        }
        if let Err(e) = self
            .outbound
            .send_reply(channel_id, account_id, &msg.from, &reply)
            .await
        {
            tracing::error!(channel = channel_id, to = msg.from.as_str(), "Failed to send reply: {e}");
        }
    }

    fn transcript_path(&self, entry: &SessionEntry) -> PathBuf {
        entry.session_file.clone().unwrap_or_else(|| {
            self.config
                .workspace_dir
                .join("sessions")
                .join(format!("{}.jsonl", entry.session_id))
        })
    }
}

/// Find-or-create under the store lock. Channel-originated sessions must
/// never silently fail to reply, so `send_policy` is forced to allow both on
/// creation and whenever an existing entry still carries the auto default.
fn resolve_session_entry(
    map: &mut HashMap<String, SessionEntry>,
    session_key: &SessionKey,
    channel_id: &str,
    sender: &str,
    config: &Config,
) -> SessionEntry {
    let now = Utc::now().to_rfc3339();

    for candidate in session_key.candidates() {
        if let Some(mut entry) = map.remove(&candidate) {
            entry.updated_at = now;
            entry.last_channel = Some(channel_id.to_string());
            entry.last_to = Some(sender.to_string());
            if matches!(entry.send_policy, None | Some(SendPolicy::Auto)) {
                entry.send_policy = Some(SendPolicy::Allow);
            }
            // Re-home under the exact key so later lookups hit directly.
            map.insert(session_key.as_str().to_string(), entry.clone());
            return entry;
        }
    }

    let entry = SessionEntry {
        updated_at: now,
        label: Some(sender.to_string()),
        origin: Some(channel_id.to_string()),
        last_channel: Some(channel_id.to_string()),
        last_to: Some(sender.to_string()),
        send_policy: Some(SendPolicy::Allow),
        context_tokens: config.context_tokens,
        model: config.default_model.clone(),
        model_provider: config.default_provider.clone(),
        ..SessionEntry::default()
    };
    map.insert(session_key.as_str().to_string(), entry.clone());
    entry
}

fn annotate_body(text: &str, timestamp: u64) -> String {
    let stamp = Utc
        .timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string());
    format!("[{stamp}] {text}")
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_body_prefixes_rfc3339_stamp() {
        let annotated = annotate_body("hi", 1_700_000_000);
        assert!(annotated.starts_with('['));
        assert!(annotated.ends_with("] hi"));
        assert!(annotated.contains("2023"));
    }

    #[test]
    fn new_session_gets_allow_policy_and_config_defaults() {
        let config = Config {
            default_model: Some("claude-sonnet-4".into()),
            default_provider: Some("anthropic".into()),
            ..Config::default()
        };
        let mut map = HashMap::new();
        let key = SessionKeyResolver::new().resolve("spixi", "wallet-abc");

        let entry = resolve_session_entry(&mut map, &key, "spixi", "wallet-abc", &config);

        assert_eq!(entry.send_policy, Some(SendPolicy::Allow));
        assert_eq!(entry.label.as_deref(), Some("wallet-abc"));
        assert_eq!(entry.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(entry.model_provider.as_deref(), Some("anthropic"));
        assert_eq!(entry.input_tokens, 0);
        assert_eq!(entry.total_tokens, 0);
        assert!(map.contains_key("direct:spixi:wallet-abc"));
    }

    #[test]
    fn existing_session_is_refreshed_and_auto_policy_overridden() {
        let config = Config::default();
        let key = SessionKeyResolver::new().resolve("spixi", "wallet-abc");
        let mut map = HashMap::new();
        let original = SessionEntry {
            send_policy: Some(SendPolicy::Auto),
            updated_at: "old".into(),
            ..SessionEntry::default()
        };
        let original_id = original.session_id.clone();
        map.insert(key.as_str().to_string(), original);

        let entry = resolve_session_entry(&mut map, &key, "spixi", "wallet-abc", &config);

        assert_eq!(entry.session_id, original_id);
        assert_eq!(entry.send_policy, Some(SendPolicy::Allow));
        assert_ne!(entry.updated_at, "old");
        assert_eq!(entry.last_channel.as_deref(), Some("spixi"));
        assert_eq!(entry.last_to.as_deref(), Some("wallet-abc"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn deny_policy_is_left_alone() {
        let config = Config::default();
        let key = SessionKeyResolver::new().resolve("spixi", "wallet-abc");
        let mut map = HashMap::new();
        map.insert(
            key.as_str().to_string(),
            SessionEntry {
                send_policy: Some(SendPolicy::Deny),
                ..SessionEntry::default()
            },
        );

        let entry = resolve_session_entry(&mut map, &key, "spixi", "wallet-abc", &config);
        assert_eq!(entry.send_policy, Some(SendPolicy::Deny));
    }

    #[test]
    fn case_drifted_sender_reuses_existing_session() {
        let config = Config::default();
        let resolver = SessionKeyResolver::new();
        let mut map = HashMap::new();

        let lower = resolver.resolve("spixi", "wallet-abc");
        let first = resolve_session_entry(&mut map, &lower, "spixi", "wallet-abc", &config);

        let drifted = resolver.resolve("spixi", "Wallet-ABC");
        let second = resolve_session_entry(&mut map, &drifted, "spixi", "Wallet-ABC", &config);

        assert_eq!(first.session_id, second.session_id);
        // Re-homed under the exact key of the latest message.
        assert!(map.contains_key("direct:spixi:Wallet-ABC"));
        assert_eq!(map.len(), 1);
    }
}
