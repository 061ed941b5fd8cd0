//! Identifier generation
//!
//! Control frames on the streaming connection carry a monotonically increasing
//! request id so acknowledgements can be correlated in logs. Client order ids
//! use nanoid over an alphabet every exchange accepts.

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

const CLIENT_ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M',
    'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Id attached to an outbound control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Next process-wide request id, starting at 1
pub fn next_request_id() -> RequestId {
    RequestId(REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Random 20-character client order id, prefixed with `BP`
pub fn generate_client_order_id() -> String {
    format!("BP{}", nanoid!(18, &CLIENT_ID_ALPHABET))
}
