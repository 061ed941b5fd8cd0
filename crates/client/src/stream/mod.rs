//! Streaming subscription engine
//!
//! Channels multiplexed over one WebSocket: the [`session`] owns the socket,
//! the [`registry`] holds handler bindings and the [`dispatcher`] routes every
//! inbound frame to one of them.

pub mod channel;
pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod session;
pub mod state;

pub use channel::{parse_stream_id, Channel, SubscriptionKey, CANDLE_INTERVALS};
pub use dispatcher::{parse_frame, DispatchOutcome, Dispatcher, ParseError, ParsedFrame, RawObserver};
pub use queue::OutboundQueue;
pub use registry::{Handler, StreamEvent, SubscriptionRegistry};
pub use session::{CloseHandler, ConnectionSession, DisconnectHandle, FailureHandler, ReconnectConfig, PING_FRAME};
pub use state::{ConnectionState, SessionState};
