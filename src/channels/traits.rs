use async_trait::async_trait;

/// A normalized message received from a channel transport.
///
/// Channel plugins (the Spixi bridge among them) map their wire format into
/// this shape before handing the message to the gateway.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Transport-assigned message id, when the transport has one. Reused as
    /// the run correlation id so a reply can be traced back to its trigger.
    pub id: Option<String>,
    /// Sender address as the transport knows it (wallet address, user id, ...).
    pub from: String,
    pub text: String,
    /// Seconds since the Unix epoch; filled with the receive time when absent.
    pub timestamp: Option<u64>,
    /// Unparsed transport payload, kept for diagnostics only.
    pub raw: Option<serde_json::Value>,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            from: from.into(),
            text: text.into(),
            timestamp: None,
            raw: None,
        }
    }
}

/// Outbound send capability a channel transport exposes to the gateway.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Deliver a finalized reply to `to` on the given channel/account.
    /// Invoked at most once per inbound message.
    async fn send_reply(
        &self,
        channel_id: &str,
        account_id: &str,
        to: &str,
        text: &str,
    ) -> anyhow::Result<()>;
}
