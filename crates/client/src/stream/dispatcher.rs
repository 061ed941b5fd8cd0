//! Inbound frame parsing and demultiplexing

use super::channel::parse_stream_id;
use super::registry::{StreamEvent, SubscriptionRegistry};
use super::state::{ConnectionState, SessionState};

use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    /// `{"type":"auth","success":bool,"message"?:str}`
    AuthAck { success: bool, message: Option<String> },
    /// Response to a request carrying an `id`, e.g. SUBSCRIBE
    Ack { id: Option<u64>, result: Value },
    /// `{"error":{...}}`
    Error(Value),
    Pong,
    /// `{"stream":"ticker.SOL_USDC","data":{...}}`
    Data { stream: String, data: Value },
    /// Valid JSON object the client has no use for
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Malformed(String),
    NotAnObject,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            ParseError::NotAnObject => f.write_str("frame is not a JSON object"),
        }
    }
}

impl std::error::Error for ParseError {}

fn is_pong(object: &Map<String, Value>) -> bool {
    let type_is = |name: &str| object.get("type").and_then(Value::as_str) == Some(name);
    type_is("pong")
        || type_is("ping")
        || object.get("method").and_then(Value::as_str) == Some("PONG")
        || object.get("result").and_then(Value::as_str) == Some("PONG")
}

/// Classify one text frame
pub fn parse_frame(raw: &str) -> Result<ParsedFrame, ParseError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ParseError::NotAnObject);
    };

    if object.get("type").and_then(Value::as_str) == Some("auth") {
        let success = object.get("success").and_then(Value::as_bool).unwrap_or(false);
        let message = object.get("message").and_then(Value::as_str).map(str::to_string);
        return Ok(ParsedFrame::AuthAck { success, message });
    }

    if let Some(error) = object.remove("error") {
        return Ok(ParsedFrame::Error(error));
    }

    if is_pong(&object) {
        return Ok(ParsedFrame::Pong);
    }

    if let Some(Value::String(stream)) = object.get("stream") {
        let stream = stream.clone();
        let data = object.remove("data").unwrap_or(Value::Null);
        return Ok(ParsedFrame::Data { stream, data });
    }

    if object.contains_key("id") || object.contains_key("result") {
        let id = object.get("id").and_then(Value::as_u64);
        let result = object.remove("result").unwrap_or(Value::Null);
        return Ok(ParsedFrame::Ack { id, result });
    }

    Ok(ParsedFrame::Other(Value::Object(object)))
}

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler was invoked
    Delivered,
    /// Known stream but no handler bound
    Unmatched,
    /// Routed to the connection state machine
    Control,
    /// Unparseable frame or unknown stream identifier
    Dropped,
}

/// Sees every data frame before handler resolution
pub type RawObserver = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Routes frames to handlers in the registry and control frames to the state machine
#[derive(Clone)]
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    state: SessionState,
    observer: Arc<Mutex<Option<RawObserver>>>,
    auth_rejection: Arc<Mutex<Option<String>>>,
}

impl Dispatcher {
    pub fn new(registry: SubscriptionRegistry, state: SessionState) -> Self {
        Self {
            registry,
            state,
            observer: Arc::new(Mutex::new(None)),
            auth_rejection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn on_raw_message(&self, observer: RawObserver) {
        *self.observer.lock().unwrap_or_else(|p| p.into_inner()) = Some(observer);
    }

    /// Reason given by the last rejected authentication, if any
    pub fn take_auth_rejection(&self) -> Option<String> {
        self.auth_rejection.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn record_auth_rejection(&self, reason: String) {
        *self.auth_rejection.lock().unwrap_or_else(|p| p.into_inner()) = Some(reason);
    }

    /// Handle one raw text frame; never fails
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        match parse_frame(raw) {
            Ok(ParsedFrame::Data { stream, data }) => self.dispatch_data(stream, data),
            Ok(control) => {
                self.handle_control(control);
                DispatchOutcome::Control
            }
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                DispatchOutcome::Dropped
            }
        }
    }

    fn handle_control(&self, frame: ParsedFrame) {
        match frame {
            ParsedFrame::AuthAck { success: true, .. } => {
                if self.state.auth_succeeded() {
                    info!("🔐 Stream authenticated");
                }
            }
            ParsedFrame::AuthAck { success: false, message } => {
                let reason = message.unwrap_or_else(|| "authentication rejected".to_string());
                warn!("❌ Stream authentication rejected: {}", reason);
                self.record_auth_rejection(reason);
                self.state.auth_rejected();
            }
            ParsedFrame::Error(error) => {
                warn!("❌ Server error: {}", error);
                if self.state.get() == ConnectionState::Authenticating {
                    self.record_auth_rejection(error.to_string());
                    self.state.auth_rejected();
                }
            }
            ParsedFrame::Ack { id, result } => debug!("Ack id={:?} result={}", id, result),
            ParsedFrame::Pong => debug!("🏓 Pong"),
            ParsedFrame::Other(value) => debug!("Ignoring frame: {}", value),
            ParsedFrame::Data { .. } => {}
        }
    }

    fn dispatch_data(&self, stream: String, data: Value) -> DispatchOutcome {
        let observer = self.observer.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(observer) = observer {
            observer(&stream, &data);
        }

        let Some((channel, symbol)) = parse_stream_id(&stream) else {
            debug!("Dropping frame for unknown stream {}", stream);
            return DispatchOutcome::Dropped;
        };

        let Some(handler) = self.registry.lookup(channel, &symbol) else {
            debug!("No handler for {}", stream);
            return DispatchOutcome::Unmatched;
        };

        let event = StreamEvent {
            channel,
            symbol,
            stream,
            data,
        };
        if let Err(e) = handler(&event) {
            warn!("Handler for {} failed: {}", event.stream, e);
        }
        DispatchOutcome::Delivered
    }
}
