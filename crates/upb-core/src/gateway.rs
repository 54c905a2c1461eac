// ── Gateway ──
//
// Owns the PIM session: connects, feeds the connection state machine from
// the byte stream, writes what it emits, and reconnects with backoff when
// the link drops. All connection state lives on the session task.

use std::future::pending;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use upb_proto::framing::{PIM_TERMINATOR, RELAY_TERMINATOR};
use upb_proto::{
    Address, Connection, ConnectionEvent, ControlSignal, Correlator, Message, MessageType,
    Outbound, PimStream, PimUrl, RecordBuffer, transport,
};

use crate::command::CommandHandle;
use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::import;
use crate::router::{Handler, MessageRouter};
use crate::store::{Devices, Links};

const EVENT_CHANNEL_SIZE: usize = 256;
const READ_BUFFER_SIZE: usize = 512;

/// PIM register holding the receive buffer; reading it clears the buffer.
const PROBE_REGISTER: u8 = 0x00;
/// PIM options register and the "message mode" value written at start.
const MODE_REGISTER: u8 = 0x70;
const MESSAGE_MODE: u8 = 0x02;

// ── Connector ────────────────────────────────────────────────────────

/// Opens the byte stream to the PIM. Implementations bound their own
/// connect time.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PimStream>, upb_proto::Error>>;
}

/// Connects to a `tcp://` or `serial://` URL.
#[derive(Debug, Clone)]
pub struct UrlConnector {
    url: PimUrl,
    timeout: Duration,
}

impl UrlConnector {
    pub fn new(url: PimUrl, timeout: Duration) -> Self {
        Self { url, timeout }
    }
}

impl Connector for UrlConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PimStream>, upb_proto::Error>> {
        Box::pin(transport::connect(&self.url, self.timeout))
    }
}

// ── State and events ─────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A relay asked us to stop sending.
    Paused,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    /// Every non-duplicate message from the network, after the registries
    /// have seen it.
    Message(Message),
    /// A write ran out of retries. `device` is the name of the device that
    /// never answered, when known.
    Timeout {
        correlator: Option<Correlator>,
        payload: String,
        device: Option<String>,
    },
    Control(ControlSignal),
    Unrecognized(String),
}

// ── Gateway ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<GatewayInner>`. Owns the router and both
/// registries; the session itself runs on a background task started by
/// [`connect()`](Self::connect). Dropping the last clone stops that task.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
    /// Cancels `GatewayInner::shutdown` once every handle is gone. The
    /// session task holds `inner` itself, so this cannot live there.
    _shutdown: Arc<DropGuard>,
}

struct GatewayInner {
    config: GatewayConfig,
    router: MessageRouter,
    devices: Devices,
    links: Links,
    connector: Arc<dyn Connector>,
    connection_state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<Arc<GatewayEvent>>,
    /// Writes queued but not yet answered, across channel and connection.
    queue_depth: Arc<watch::Sender<usize>>,
    handle: CommandHandle,
    /// Held here while no session runs; the session task owns it otherwise.
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    /// Parent of every session token.
    shutdown: CancellationToken,
    /// Cancelled on disconnect, replaced on the next connect.
    cancel: Mutex<CancellationToken>,
    session: Mutex<Option<JoinHandle<mpsc::UnboundedReceiver<Outbound>>>>,
}

impl Gateway {
    /// Create a gateway for `config.url`. Does NOT connect; call
    /// [`connect()`](Self::connect). The UPStart file, if configured, is
    /// imported here.
    pub fn new(config: GatewayConfig) -> Self {
        let connector = UrlConnector::new(config.url.clone(), config.connect_timeout);
        Self::with_connector(config, Arc::new(connector))
    }

    /// Like [`new()`](Self::new) with a custom way of reaching the PIM.
    pub fn with_connector(config: GatewayConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (queue_depth, _) = watch::channel(0);
        let queue_depth = Arc::new(queue_depth);
        let handle = CommandHandle::new(
            command_tx,
            Arc::clone(&queue_depth),
            Arc::new(config.flags.clone()),
        );

        let router = MessageRouter::new();
        let devices = Devices::new(&router, handle.clone());
        let links = Links::new(&router, devices.clone(), handle.clone());
        if let Some(path) = &config.upstart_file {
            import::load(path, &devices, &links);
        }

        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let shutdown = CancellationToken::new();

        Self {
            _shutdown: Arc::new(shutdown.clone().drop_guard()),
            inner: Arc::new(GatewayInner {
                config,
                router,
                devices,
                links,
                connector,
                connection_state,
                event_tx,
                queue_depth,
                handle,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: Mutex::new(shutdown.child_token()),
                shutdown,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn devices(&self) -> &Devices {
        &self.inner.devices
    }

    pub fn links(&self) -> &Links {
        &self.inner.links
    }

    pub fn router(&self) -> &MessageRouter {
        &self.inner.router
    }

    /// Handle for queueing frames directly.
    pub fn command_handle(&self) -> CommandHandle {
        self.inner.handle.clone()
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the session task. Returns immediately; progress is visible
    /// through [`connection_state()`](Self::connection_state). Calling it
    /// while a session runs does nothing.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let mut session = self.inner.session.lock().await;
        if session.is_some() {
            return Ok(());
        }
        let rx = self
            .inner
            .command_rx
            .lock()
            .await
            .take()
            .ok_or(CoreError::Disconnected)?;

        let cancel = self.inner.shutdown.child_token();
        *self.inner.cancel.lock().await = cancel.clone();

        let inner = Arc::clone(&self.inner);
        *session = Some(tokio::spawn(session_loop(inner, rx, cancel)));
        Ok(())
    }

    /// Stop the session. Anything still queued is dropped without a
    /// timeout event.
    pub async fn disconnect(&self) {
        self.inner.cancel.lock().await.cancel();

        if let Some(task) = self.inner.session.lock().await.take() {
            match task.await {
                Ok(rx) => *self.inner.command_rx.lock().await = Some(rx),
                Err(e) => warn!(error = %e, "gateway session task failed"),
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Wait until the session is connected, or `timeout` passes.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.inner.connection_state.subscribe();
        let connected = rx.wait_for(|s| *s == ConnectionState::Connected);
        match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CoreError::Disconnected),
            Err(_) => Err(CoreError::Transport {
                url: self.inner.config.url.to_string(),
                reason: format!("not connected after {}s", timeout.as_secs()),
            }),
        }
    }

    /// Wait until every queued write has been answered or given up on.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.queue_depth.subscribe();
        let _ = rx.wait_for(|depth| *depth == 0).await;
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Queue a frame for the PIM. Fire-and-forget: a write that is never
    /// answered shows up as a [`GatewayEvent::Timeout`].
    pub fn send(&self, outbound: Outbound) -> Result<(), CoreError> {
        self.inner.handle.send(outbound)
    }

    /// Subscribe an extra handler for one message type.
    pub fn add_handler(&self, kind: MessageType, handler: Handler) -> bool {
        self.inner.router.subscribe(kind, handler)
    }

    /// Ask every device for its current state.
    pub fn sync(&self) -> Result<(), CoreError> {
        self.inner.sync()
    }

    /// Import a UPStart export into the registries.
    pub fn load_upstart(&self, path: &Path) -> bool {
        import::load(path, &self.inner.devices, &self.inner.links)
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.inner.event_tx.subscribe()
    }

    /// Writes queued but not yet answered.
    pub fn queue_depth(&self) -> watch::Receiver<usize> {
        self.inner.queue_depth.subscribe()
    }
}

impl GatewayInner {
    fn set_state(&self, state: ConnectionState) {
        self.connection_state.send_replace(state);
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.event_tx.send(Arc::new(event));
    }

    fn sync(&self) -> Result<(), CoreError> {
        self.devices.sync()?;
        self.links.sync()
    }

    fn sync_logged(&self) {
        if let Err(e) = self.sync() {
            warn!(error = %e, "state sync failed");
        }
    }
}

// ── Session loop ─────────────────────────────────────────────────────

enum SessionEnd {
    Cancelled,
    Lost(String),
}

/// Connect, run, back off, repeat until cancelled. Hands the command
/// receiver back so a later connect can reuse it.
async fn session_loop(
    inner: Arc<GatewayInner>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<Outbound> {
    let reconnect = &inner.config.reconnect;
    let mut attempt: u32 = 0;

    loop {
        inner.set_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        });
        info!(url = %inner.config.url, attempt, "connecting to PIM");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = inner.connector.connect() => result,
        };

        match result {
            Ok(stream) => {
                attempt = 0;
                info!(url = %inner.config.url, "PIM connected");
                inner.set_state(ConnectionState::Connected);
                inner.emit(GatewayEvent::Connected);

                match run_session(&inner, stream, &mut rx, &cancel).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Lost(reason) => {
                        warn!(reason, "PIM connection lost");
                        inner.emit(GatewayEvent::Disconnected { reason });
                    }
                }
            }
            Err(e) if e.is_transient() => warn!(error = %e, attempt, "cannot connect to PIM"),
            Err(e) => error!(error = %e, attempt, "PIM unreachable with this configuration"),
        }

        let delay = reconnect.backoff(attempt);
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }

    debug!("gateway session loop exiting");
    rx
}

/// Drive one connected stream until it drops or the gateway is cancelled.
async fn run_session(
    inner: &GatewayInner,
    stream: Box<dyn PimStream>,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let flags = &inner.config.flags;
    let mut records = RecordBuffer::new(if flags.relay_mode() {
        RELAY_TERMINATOR
    } else {
        PIM_TERMINATOR
    });
    let mut session = Session::new(inner);

    session.enqueue(Outbound::read_registers(PROBE_REGISTER, 1));
    session.enqueue(Outbound::write_registers(MODE_REGISTER, &[MESSAGE_MODE]));
    if !flags.no_sync() {
        inner.sync_logged();
    }

    let mut buf = [0u8; READ_BUFFER_SIZE];
    let end = loop {
        if let Err(reason) = session.flush(&mut writer).await {
            break SessionEnd::Lost(reason);
        }
        if let Some(reason) = session.drain_events() {
            break SessionEnd::Lost(reason);
        }
        // Handling events may have freed the line.
        if let Err(reason) = session.flush(&mut writer).await {
            break SessionEnd::Lost(reason);
        }

        let timeout_at = session.conn.poll_timeout();
        let heartbeat_at = session.heartbeat.deadline;

        tokio::select! {
            biased;
            () = cancel.cancelled() => break SessionEnd::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break SessionEnd::Lost("PIM closed the connection".into()),
                Ok(n) => {
                    session.heartbeat.reset();
                    let now = Instant::now();
                    for record in records.push(&buf[..n]) {
                        session.with_conn(0, |conn| conn.handle_record(&record, now));
                    }
                }
                Err(e) => break SessionEnd::Lost(e.to_string()),
            },
            Some(outbound) = rx.recv() => session.with_conn(1, |conn| conn.send(outbound)),
            () = sleep_until_opt(timeout_at) => {
                session.with_conn(0, |conn| conn.handle_timeout(Instant::now()));
            }
            () = sleep_until_opt(heartbeat_at) => {
                if let Some(reason) = session.heartbeat_expired() {
                    break SessionEnd::Lost(reason);
                }
            }
        }
    };

    session.abandon();
    end
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

// ── Session state ────────────────────────────────────────────────────

struct Heartbeat {
    interval: Option<Duration>,
    deadline: Option<Instant>,
    /// A probe is out; the next expiry drops the connection.
    probing: bool,
}

impl Heartbeat {
    fn new(interval: Option<Duration>) -> Self {
        let mut heartbeat = Self {
            interval,
            deadline: None,
            probing: false,
        };
        heartbeat.reset();
        heartbeat
    }

    fn reset(&mut self) {
        self.probing = false;
        self.deadline = self.interval.map(|i| Instant::now() + i);
    }
}

struct Session<'a> {
    inner: &'a GatewayInner,
    conn: Connection,
    heartbeat: Heartbeat,
}

impl<'a> Session<'a> {
    fn new(inner: &'a GatewayInner) -> Self {
        Self {
            inner,
            conn: Connection::new(inner.config.connection_config()),
            heartbeat: Heartbeat::new(inner.config.heartbeat),
        }
    }

    /// Queue a frame of our own ahead of anything still in the channel.
    fn enqueue(&mut self, outbound: Outbound) {
        self.inner.queue_depth.send_modify(|d| *d += 1);
        self.with_conn(1, |conn| conn.send(outbound));
    }

    /// Run `f` against the connection and release queue depth for every
    /// write it completed or dropped. `incoming` is how many writes `f`
    /// adds.
    fn with_conn(&mut self, incoming: usize, f: impl FnOnce(&mut Connection)) {
        let before = self.conn.queue_len() + incoming;
        f(&mut self.conn);
        let finished = before.saturating_sub(self.conn.queue_len());
        if finished > 0 {
            self.inner
                .queue_depth
                .send_modify(|d| *d = d.saturating_sub(finished));
        }
    }

    async fn flush(&mut self, writer: &mut WriteHalf<Box<dyn PimStream>>) -> Result<(), String> {
        let Some(frame) = self.conn.poll_transmit(Instant::now()) else {
            return Ok(());
        };
        writer.write_all(&frame).await.map_err(|e| e.to_string())?;
        writer.flush().await.map_err(|e| e.to_string())
    }

    /// Hand every pending connection event to its consumer. Returns a
    /// reason if the session should be dropped.
    fn drain_events(&mut self) -> Option<String> {
        let mut lost = None;
        while let Some(event) = self.conn.poll_event() {
            match event {
                ConnectionEvent::Message(msg) => {
                    self.inner.router.dispatch(&msg);
                    self.inner.emit(GatewayEvent::Message(msg));
                }
                ConnectionEvent::Timeout {
                    correlator,
                    payload,
                } => {
                    let device = correlator.and_then(|c| {
                        self.inner
                            .devices
                            .get(&Address::device(c.network_id, c.unit_id).index())
                            .map(|d| d.name().to_owned())
                    });
                    warn!(payload, device = device.as_deref().unwrap_or("-"), "no response");
                    if self.heartbeat.probing {
                        lost = Some("heartbeat probe timed out".to_owned());
                    }
                    self.inner.emit(GatewayEvent::Timeout {
                        correlator,
                        payload,
                        device,
                    });
                }
                ConnectionEvent::Control(signal) => {
                    self.on_control(&signal);
                    self.inner.emit(GatewayEvent::Control(signal));
                }
                ConnectionEvent::Unrecognized(line) => {
                    self.inner.emit(GatewayEvent::Unrecognized(line));
                }
            }
        }
        lost
    }

    fn on_control(&mut self, signal: &ControlSignal) {
        match signal {
            ControlSignal::Pause => {
                info!("relay paused the PIM connection");
                self.with_conn(0, Connection::pause);
                self.inner.set_state(ConnectionState::Paused);
            }
            ControlSignal::Resume => {
                info!("relay resumed the PIM connection");
                self.conn.resume();
                self.inner.set_state(ConnectionState::Connected);
                if !self.inner.config.flags.no_sync() {
                    self.inner.sync_logged();
                }
            }
            ControlSignal::Heartbeat => self.heartbeat.reset(),
            ControlSignal::SerialDisconnected => {
                warn!("relay lost its serial link to the PIM");
                self.with_conn(0, Connection::pause);
                self.inner.set_state(ConnectionState::Paused);
            }
            ControlSignal::Other(token) => debug!(token, "unknown control token"),
        }
    }

    /// First expiry sends a probe; the second one (probe unanswered) gives
    /// up on the connection.
    fn heartbeat_expired(&mut self) -> Option<String> {
        if self.heartbeat.probing {
            self.with_conn(0, Connection::fail_in_flight);
            self.drain_events();
            return Some("no traffic from PIM after heartbeat probe".into());
        }
        debug!("PIM idle, probing");
        self.heartbeat.probing = true;
        let cfg = self.conn.config();
        let budget = cfg.response_timeout * (u32::from(cfg.retries) + 1) + cfg.response_timeout;
        self.heartbeat.deadline = Some(Instant::now() + budget);
        self.enqueue(Outbound::read_registers(PROBE_REGISTER, 1));
        None
    }

    /// Drop everything still queued; nobody is told.
    fn abandon(&mut self) {
        self.with_conn(0, Connection::reset);
    }
}
