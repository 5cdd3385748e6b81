pub mod traits;

pub use traits::{InboundMessage, OutboundSender};
