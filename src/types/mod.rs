mod frame;
mod message;

pub use frame::Frame;
pub use message::{Amount, TradeMessage, TradeSide};
pub(crate) use message::{lookup, value_to_text};

/// ID of a tracked connection, unique within an interceptor.
pub type ConnectionId = u64;

/// ID of a registered listener, unique within an interceptor.
pub type ListenerId = u64;
