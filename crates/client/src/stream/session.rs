//! One physical streaming connection and its background tasks
//!
//! After the upgrade the socket is split and three monoio tasks run until the
//! shutdown signal fires:
//! - receive: reads frames and hands text to the [`Dispatcher`]; forwards
//!   server pings to the writer
//! - send: drains the [`OutboundQueue`] in FIFO order and answers pings
//! - keep-alive: enqueues `{"method":"PING"}` every interval while the
//!   session is connected or authenticated
//!
//! A read or write failure marks the session Disconnected, calls the failure
//! handler and stops all three tasks. Reconnection is layered on top by the
//! client.

use super::dispatcher::Dispatcher;
use super::queue::OutboundQueue;
use super::state::{ConnectionState, SessionState};
use crate::config::BackpackConfig;
use crate::errors::{ExchangeError, Result};
use crate::http::default_tls_config;
use crate::websocket::{MonoioWebSocket, WsMessage, WsReader, WsWriter, NORMAL_CLOSURE};
use backpack_core::PerfTimer;

use flume::{Receiver, Sender};
use monoio::task::JoinHandle;
use rustls::ClientConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Keep-alive frame
pub const PING_FRAME: &str = r#"{"method":"PING"}"#;

/// Close code reported when the server's close frame carried none
const NO_STATUS_RECEIVED: u16 = 1005;

/// Called with the close code and reason when the server closes the stream
pub type CloseHandler = Arc<dyn Fn(u16, &str) + Send + Sync>;

/// Called when an established session fails to read or write
pub type FailureHandler = Arc<dyn Fn(&ExchangeError) + Send + Sync>;

/// Backoff policy for [`crate::client::BackpackClient::reconnect`]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (1-based), capped, plus random jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay = delay.min(self.max_delay_ms as f64) as u64;

        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.jitter_ms.saturating_add(1)
        };
        Duration::from_millis(delay.saturating_add(jitter))
    }
}

/// Wakes every task at once by dropping the only sender
#[derive(Clone)]
struct ShutdownSignal {
    tx: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl ShutdownSignal {
    fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    fn trigger(&self) {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    fn is_triggered(&self) -> bool {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).is_none()
    }

    async fn wait(&self) {
        // Resolves with Disconnected once the sender is gone
        let _ = self.rx.recv_async().await;
    }
}

/// Stops a running session from any thread
///
/// The background tasks notice the signal, send a close frame and exit; the
/// owning [`ConnectionSession::disconnect`] still joins them.
#[derive(Clone)]
pub struct DisconnectHandle {
    shutdown: ShutdownSignal,
    state: SessionState,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        self.state.begin_close();
        self.shutdown.trigger();
    }
}

#[derive(Clone, Default)]
struct LifecycleHandlers {
    on_close: Arc<Mutex<Option<CloseHandler>>>,
    on_failure: Arc<Mutex<Option<FailureHandler>>>,
}

impl LifecycleHandlers {
    fn closed(&self, code: u16, reason: &str) {
        let handler = self.on_close.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(handler) = handler {
            handler(code, reason);
        }
    }

    fn failed(&self, err: &ExchangeError) {
        let handler = self.on_failure.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }
}

/// Everything a background task needs
#[derive(Clone)]
struct TaskContext {
    state: SessionState,
    dispatcher: Dispatcher,
    handlers: LifecycleHandlers,
    shutdown: ShutdownSignal,
}

impl TaskContext {
    /// Transport failure on an established session
    fn fail(&self, err: ExchangeError) {
        if self.state.get() != ConnectionState::Closing && !self.shutdown.is_triggered() {
            error!("❌ Stream transport failed: {}", err);
            self.state.mark_disconnected();
            self.handlers.failed(&err);
        }
        self.shutdown.trigger();
    }
}

/// Owns one streaming connection
pub struct ConnectionSession {
    url: Url,
    tls_config: Arc<ClientConfig>,
    keepalive_interval: Duration,
    state: SessionState,
    queue: OutboundQueue,
    dispatcher: Dispatcher,
    handlers: LifecycleHandlers,
    shutdown: Option<ShutdownSignal>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionSession {
    /// The dispatcher carries the state shared with the client
    pub fn new(config: &BackpackConfig, dispatcher: Dispatcher) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(ExchangeError::ConfigurationError("queue_capacity must be positive".to_string()));
        }
        Ok(Self {
            url: config.stream_url()?,
            tls_config: default_tls_config(),
            keepalive_interval: config.keepalive_interval(),
            state: dispatcher.state().clone(),
            queue: OutboundQueue::new(config.queue_capacity),
            dispatcher,
            handlers: LifecycleHandlers::default(),
            shutdown: None,
            tasks: Vec::new(),
        })
    }

    pub fn with_tls_config(mut self, tls_config: Arc<ClientConfig>) -> Self {
        self.tls_config = tls_config;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn on_close(&self, handler: CloseHandler) {
        *self.handlers.on_close.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    pub fn on_failure(&self, handler: FailureHandler) {
        *self.handlers.on_failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    /// Present only while background tasks exist
    pub fn disconnect_handle(&self) -> Option<DisconnectHandle> {
        self.shutdown.as_ref().map(|shutdown| DisconnectHandle {
            shutdown: shutdown.clone(),
            state: self.state.clone(),
        })
    }

    /// TCP, TLS and WebSocket upgrade, then start the background tasks
    ///
    /// Any failure leaves the session Disconnected. Connecting an open
    /// session is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state.is_open() {
            return Ok(());
        }
        // Tasks from a connection the server ended are still joinable
        self.stop_tasks().await;

        if !self.state.begin_connect() {
            return Err(ExchangeError::ConnectionFailed(format!(
                "cannot connect while {}",
                self.state.get()
            )));
        }

        let timer = PerfTimer::start("stream_connect");
        let websocket = match MonoioWebSocket::connect(&self.url, self.tls_config.clone()).await {
            Ok(websocket) => websocket,
            Err(e) => {
                self.state.mark_disconnected();
                backpack_core::log_error!(format!("Stream connect to {}", self.url), e);
                return Err(e);
            }
        };

        self.queue.clear();
        self.state.mark_connected();
        self.spawn_tasks(websocket);

        info!("✅ Stream connected to {} in {}μs", self.url, timer.finish());
        Ok(())
    }

    fn spawn_tasks(&mut self, websocket: MonoioWebSocket) {
        let (reader, writer) = websocket.into_split();
        let shutdown = ShutdownSignal::new();
        let ctx = TaskContext {
            state: self.state.clone(),
            dispatcher: self.dispatcher.clone(),
            handlers: self.handlers.clone(),
            shutdown: shutdown.clone(),
        };
        let (pong_tx, pong_rx) = flume::unbounded();

        self.tasks.push(monoio::spawn(run_reader(reader, ctx.clone(), pong_tx)));
        self.tasks.push(monoio::spawn(run_writer(
            writer,
            ctx.clone(),
            self.queue.receiver(),
            pong_rx,
        )));
        self.tasks.push(monoio::spawn(run_keepalive(
            ctx,
            self.queue.clone(),
            self.keepalive_interval,
        )));
        self.shutdown = Some(shutdown);
    }

    /// Queue a text frame; fails when not connected or when the queue is full
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        let state = self.state.get();
        if !state.is_open() {
            return Err(ExchangeError::NotConnected(format!("cannot send while {state}")));
        }
        self.queue.enqueue(frame)
    }

    /// Send a normal closure, stop and join every task; idempotent
    pub async fn disconnect(&mut self) {
        if self.shutdown.is_none() && self.state.get() == ConnectionState::Disconnected {
            return;
        }

        if self.state.begin_close() {
            info!("🔌 Disconnecting from {}", self.url);
        }
        self.stop_tasks().await;
        self.state.mark_disconnected();

        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("Discarded {} unsent frames", dropped);
        }
    }

    async fn stop_tasks(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.trigger();
        }
        for task in self.tasks.drain(..) {
            task.await;
        }
    }
}

/// Returns false once the receive loop should stop
fn handle_message(ctx: &TaskContext, message: Result<WsMessage>, pongs: &Sender<Vec<u8>>) -> bool {
    match message {
        Ok(WsMessage::Text(text)) => {
            ctx.dispatcher.dispatch(&text);
            true
        }
        Ok(WsMessage::Ping(payload)) => {
            debug!("🏓 Ping from server");
            let _ = pongs.send(payload);
            true
        }
        Ok(WsMessage::Pong(_)) => true,
        Ok(WsMessage::Binary(bytes)) => {
            debug!("Ignoring {} byte binary frame", bytes.len());
            true
        }
        Ok(WsMessage::InvalidText(bytes)) => {
            warn!("Dropping {} byte text frame with invalid UTF-8", bytes.len());
            true
        }
        Ok(WsMessage::Close(close)) => {
            let (code, reason) = close.unwrap_or((NO_STATUS_RECEIVED, String::new()));
            if ctx.state.get() != ConnectionState::Closing {
                info!("🔌 Server closed stream: {} {}", code, reason);
                ctx.state.mark_disconnected();
                ctx.handlers.closed(code, &reason);
            }
            ctx.shutdown.trigger();
            false
        }
        Err(e) => {
            ctx.fail(e);
            false
        }
    }
}

async fn run_reader(mut reader: WsReader, ctx: TaskContext, pongs: Sender<Vec<u8>>) {
    loop {
        monoio::select! {
            _ = ctx.shutdown.wait() => break,
            message = reader.next_message() => {
                if !handle_message(&ctx, message, &pongs) {
                    break;
                }
            }
        }
    }
    debug!("Receive task stopped");
}

async fn run_writer(mut writer: WsWriter, ctx: TaskContext, frames: Receiver<String>, pongs: Receiver<Vec<u8>>) {
    loop {
        monoio::select! {
            _ = ctx.shutdown.wait() => break,
            pong = pongs.recv_async() => {
                let Ok(payload) = pong else { break };
                if let Err(e) = writer.send_pong(payload).await {
                    ctx.fail(e);
                    return;
                }
            }
            frame = frames.recv_async() => {
                let Ok(frame) = frame else { break };
                debug!("➡️ {}", frame);
                if let Err(e) = writer.send_text(frame).await {
                    ctx.fail(e);
                    return;
                }
            }
        }
    }

    if let Err(e) = writer.close(NORMAL_CLOSURE, "Normal closure").await {
        debug!("Close frame not delivered: {}", e);
    }
    if ctx.state.get() == ConnectionState::Closing {
        ctx.state.mark_disconnected();
    }
    debug!("Send task stopped");
}

async fn run_keepalive(ctx: TaskContext, queue: OutboundQueue, interval: Duration) {
    loop {
        monoio::select! {
            _ = ctx.shutdown.wait() => break,
            _ = monoio::time::sleep(interval) => {
                if ctx.state.get().wants_keepalive() {
                    match queue.enqueue(PING_FRAME) {
                        Ok(()) => debug!("🏓 Keep-alive ping queued"),
                        Err(e) => warn!("🏓 Keep-alive ping failed: {}", e),
                    }
                }
            }
        }
    }
    debug!("Keep-alive task stopped");
}
