// ── Connection state machine ──
//
// Sans-IO: the owner feeds in records and clock ticks, and pulls out
// frames to write and events to handle. At most one frame is in flight and
// at most one deadline is armed at any time.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::{Message, decode_hex};
use crate::encode::Outbound;
use crate::framing::PIM_TERMINATOR;
use crate::pim::{ControlSignal, PimCommand, PimResponse, Record};

/// Identifies the device whose report completes a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Correlator {
    pub network_id: u8,
    pub unit_id: u8,
}

impl Correlator {
    pub const fn new(network_id: u8, unit_id: u8) -> Self {
        Self {
            network_id,
            unit_id,
        }
    }

    /// An inbound frame answers when it comes *from* the addressed unit.
    pub fn matches(&self, msg: &Message) -> bool {
        msg.network_id == self.network_id && msg.src_id == self.unit_id
    }
}

/// Timing and retry budget applied to every queued write.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub response_timeout: Duration,
    pub busy_delay: Duration,
    pub retries: u8,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            busy_delay: Duration::from_millis(100),
            retries: 1,
        }
    }
}

/// One entry of the write queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWrite {
    pub command: PimCommand,
    pub payload: String,
    pub response: Option<Correlator>,
    pub timeout: Duration,
    pub retries: u8,
}

impl QueuedWrite {
    pub fn new(outbound: Outbound, config: &ConnectionConfig) -> Self {
        Self {
            command: outbound.command,
            payload: outbound.payload,
            response: outbound.response,
            timeout: config.response_timeout,
            retries: config.retries,
        }
    }

    /// Bytes put on the transport: lead character, hex payload, terminator.
    pub fn frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.payload.len() + 2);
        frame.push(self.command.lead_byte());
        frame.extend_from_slice(self.payload.as_bytes());
        frame.push(PIM_TERMINATOR);
        frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    AwaitingPimAck,
    AwaitingDeviceResponse,
    PimBusyBackoff,
}

/// Things the owner must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A decoded, non-duplicate update frame.
    Message(Message),
    /// A write ran out of retries without an answer.
    Timeout {
        correlator: Option<Correlator>,
        payload: String,
    },
    /// A `~~` token from a relay.
    Control(ControlSignal),
    /// A record with no known prefix.
    Unrecognized(String),
}

#[derive(Debug, Default)]
pub struct Connection {
    config: ConnectionConfig,
    queue: VecDeque<QueuedWrite>,
    status: ConnectionStatus,
    deadline: Option<Instant>,
    paused: bool,
    // Last update frame with its sequence bits cleared, and that sequence.
    last_update: Option<Message>,
    last_seq: u8,
    events: VecDeque<ConnectionEvent>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Queue an outbound frame with the configured timeout and retries.
    pub fn send(&mut self, outbound: Outbound) {
        let write = QueuedWrite::new(outbound, &self.config);
        self.enqueue(write);
    }

    pub fn enqueue(&mut self, write: QueuedWrite) {
        if self.paused {
            debug!(payload = %write.payload, "connection paused, dropping write");
            return;
        }
        self.queue.push_back(write);
    }

    // ── Driving ──────────────────────────────────────────────────────

    /// The next frame to write, if the line is free.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.status != ConnectionStatus::Idle || self.paused {
            return None;
        }
        let head = self.queue.front()?;
        self.status = if head.response.is_some() {
            ConnectionStatus::AwaitingDeviceResponse
        } else {
            ConnectionStatus::AwaitingPimAck
        };
        self.deadline = Some(now + head.timeout);
        debug!(payload = %head.payload, retries = head.retries, "transmit");
        Some(head.frame())
    }

    /// When the owner should next call [`handle_timeout`](Self::handle_timeout).
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    /// Process one complete inbound record (terminator already stripped).
    pub fn handle_record(&mut self, line: &str, now: Instant) {
        trace!(record = line, "received");
        match Record::classify(line) {
            Record::Pim { response, body } => self.handle_pim(response, &body, now),
            Record::Control(signal) => self.events.push_back(ConnectionEvent::Control(signal)),
            Record::Unrecognized(line) => {
                debug!(record = %line, "unrecognized record");
                self.events.push_back(ConnectionEvent::Unrecognized(line));
            }
        }
    }

    fn handle_pim(&mut self, response: PimResponse, body: &str, now: Instant) {
        match response {
            PimResponse::Accept
            | PimResponse::Ack
            | PimResponse::Nack
            | PimResponse::RegisterReport => {
                if self.status == ConnectionStatus::AwaitingPimAck {
                    self.complete();
                }
            }
            PimResponse::Error => {
                if self.awaiting() {
                    self.retry_or_drop("PIM rejected frame");
                }
            }
            PimResponse::Busy => {
                if self.awaiting() {
                    debug!("PIM busy, backing off");
                    self.status = ConnectionStatus::PimBusyBackoff;
                    self.deadline = Some(now + self.config.busy_delay);
                }
            }
            PimResponse::Update => self.handle_update(body),
        }
    }

    fn handle_update(&mut self, body: &str) {
        let msg = match decode_hex(body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, body, "dropping malformed update");
                return;
            }
        };

        let answers_head = self.status == ConnectionStatus::AwaitingDeviceResponse
            && self
                .queue
                .front()
                .and_then(|w| w.response)
                .is_some_and(|c| c.matches(&msg));

        if self.is_duplicate(&msg) {
            debug!(seq = msg.transmit_sequence, "duplicate update suppressed");
        } else {
            self.events.push_back(ConnectionEvent::Message(msg));
        }

        if answers_head {
            self.complete();
        }
    }

    /// Advance past an expired deadline. Safe to call early; does nothing
    /// until the deadline has passed.
    pub fn handle_timeout(&mut self, now: Instant) {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }
        self.deadline = None;

        match self.status {
            ConnectionStatus::Idle => {}
            ConnectionStatus::PimBusyBackoff => self.status = ConnectionStatus::Idle,
            ConnectionStatus::AwaitingPimAck | ConnectionStatus::AwaitingDeviceResponse => {
                let exhausted = self.queue.front().is_none_or(|w| w.retries == 0);
                if exhausted {
                    self.fail_head();
                } else {
                    if let Some(head) = self.queue.front_mut() {
                        head.retries -= 1;
                        debug!(payload = %head.payload, left = head.retries, "no answer, retrying");
                    }
                    self.status = ConnectionStatus::Idle;
                }
            }
        }
    }

    // ── Session control ──────────────────────────────────────────────

    /// Stop sending and drop everything queued.
    pub fn pause(&mut self) {
        self.paused = true;
        self.queue.clear();
        self.status = ConnectionStatus::Idle;
        self.deadline = None;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Abandon the in-flight write, reporting it as timed out.
    pub fn fail_in_flight(&mut self) {
        if self.awaiting() {
            self.fail_head();
        }
    }

    /// Forget all state without notifying anyone. Used on disconnect.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.events.clear();
        self.status = ConnectionStatus::Idle;
        self.deadline = None;
        self.paused = false;
        self.last_update = None;
        self.last_seq = 0;
    }

    // ── Internals ────────────────────────────────────────────────────

    fn awaiting(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::AwaitingPimAck | ConnectionStatus::AwaitingDeviceResponse
        )
    }

    fn complete(&mut self) {
        self.queue.pop_front();
        self.status = ConnectionStatus::Idle;
        self.deadline = None;
    }

    fn fail_head(&mut self) {
        if let Some(head) = self.queue.pop_front() {
            warn!(payload = %head.payload, "no response, giving up");
            self.events.push_back(ConnectionEvent::Timeout {
                correlator: head.response,
                payload: head.payload,
            });
        }
        self.status = ConnectionStatus::Idle;
        self.deadline = None;
    }

    fn retry_or_drop(&mut self, reason: &str) {
        match self.queue.front_mut() {
            Some(head) if head.retries > 0 => {
                head.retries -= 1;
                debug!(payload = %head.payload, left = head.retries, reason, "resending");
            }
            Some(_) => {
                if let Some(head) = self.queue.pop_front() {
                    warn!(payload = %head.payload, reason, "dropping write");
                }
            }
            None => {}
        }
        self.status = ConnectionStatus::Idle;
        self.deadline = None;
    }

    /// Duplicate iff the sequence did not advance and the content, sequence
    /// bits aside, matches the previous update. The stored frame and
    /// sequence are replaced either way.
    fn is_duplicate(&mut self, msg: &Message) -> bool {
        let seq = msg.transmit_sequence;
        let mut masked = msg.clone();
        masked.transmit_sequence = 0;

        let duplicate = seq <= self.last_seq && self.last_update.as_ref() == Some(&masked);
        self.last_seq = seq;
        self.last_update = Some(masked);
        duplicate
    }
}

// ── Tests ────────────────────────────────────────────────────────────
