//! # Backpack Core
//!
//! Shared building blocks for the Backpack exchange SDK.
//!
//! - **monoio runtime** - single-threaded io_uring runtime with the timer driver enabled
//! - **Timing** - wall-clock millisecond timestamps for request signing and
//!   `PerfTimer` latency measurement
//! - **Logging** - one-shot `tracing-subscriber` initialisation
//! - **IDs** - request ids for control frames and client order ids

pub mod runtime;
pub mod timing;
pub mod logging;
pub mod id_gen;

pub use runtime::{BackpackRuntime, RuntimeConfig};
pub use timing::{nanos, timestamp_ms, PerfTimer, Timestamp};
pub use logging::init_logging;
pub use id_gen::{next_request_id, generate_client_order_id, RequestId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::runtime::{BackpackRuntime, RuntimeConfig};
    pub use crate::timing::{nanos, timestamp_ms, PerfTimer, Timestamp};
    pub use crate::id_gen::{next_request_id, generate_client_order_id, RequestId};
    pub use crate::logging::init_logging;

    pub use monoio;
    pub use serde::{Deserialize, Serialize};
    pub use chrono::{DateTime, Utc};
}
