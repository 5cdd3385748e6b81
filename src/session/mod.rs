mod resolver;
mod store;
pub mod transcript;

pub use resolver::{SessionKey, SessionKeyResolver};
pub use store::{SendPolicy, SessionEntry, SessionId, SessionStore};
pub use transcript::TranscriptWriter;
