mod chat_runs;
mod event_handler;
mod events;
mod inbound;
mod policy;
mod tool_recipients;

pub use chat_runs::{ChatRunEntry, ChatRunRegistry, ChatRunState};
pub use event_handler::{AgentEventHandler, CHAT_DELTA_THROTTLE};
pub use events::{
    AgentEvent, BroadcastOpts, ChatState, DispatchPolicy, EventSink, PHASE_END, PHASE_ERROR,
    STREAM_ASSISTANT, STREAM_LIFECYCLE, STREAM_TOOL,
};
pub use inbound::{
    AgentDispatcher, ChannelMessageHandler, DispatchRequest, ReplyFragment, ReplyModelInfo,
};
pub use policy::GatewayPolicy;
pub use tool_recipients::{
    ToolEventRecipientRegistry, TOOL_EVENT_RECIPIENT_FINAL_GRACE, TOOL_EVENT_RECIPIENT_TTL,
};
