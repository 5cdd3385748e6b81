pub mod channels;
pub mod config;
pub mod dispatch;
pub mod session;

pub use channels::{InboundMessage, OutboundSender};
pub use config::{Config, ToolStreamVerbosity};
pub use dispatch::{
    AgentDispatcher, AgentEvent, AgentEventHandler, ChannelMessageHandler, ChatRunEntry,
    ChatRunRegistry, ChatRunState, DispatchPolicy, EventSink, GatewayPolicy,
    ToolEventRecipientRegistry,
};
pub use session::{SessionEntry, SessionId, SessionKey, SessionKeyResolver, SessionStore};
