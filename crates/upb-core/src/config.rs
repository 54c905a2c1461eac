// ── Runtime gateway configuration ──
//
// These types describe *how* to talk to a PIM. They never touch disk:
// the CLI (via upb-config) builds a `GatewayConfig` and hands it in.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use upb_proto::{ConnectionConfig, PimUrl};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(120);

// ── Flags ────────────────────────────────────────────────────────────

/// A single flag value. Bare keys are `true`; integer strings become
/// integers; anything else stays a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl FlagValue {
    fn parse(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => raw.parse().map_or_else(|_| Self::Str(raw.to_owned()), Self::Int),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Behaviour switches parsed from `"key, key=value, ..."`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Flags {
    values: BTreeMap<String, FlagValue>,
}

impl FromStr for Flags {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .filter_map(|token| {
                let token = token.trim();
                if token.is_empty() {
                    return None;
                }
                Some(match token.split_once('=') {
                    Some((key, value)) => (key.trim().to_owned(), FlagValue::parse(value.trim())),
                    None => (token.to_owned(), FlagValue::Bool(true)),
                })
            })
            .collect();
        Ok(Self { values })
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match value {
                FlagValue::Bool(true) => f.write_str(key)?,
                other => write!(f, "{key}={other}")?,
            }
        }
        Ok(())
    }
}

impl Flags {
    pub fn get(&self, key: &str) -> Option<&FlagValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: FlagValue) {
        self.values.insert(key.into(), value);
    }

    fn enabled(&self, key: &str) -> bool {
        self.get(key).is_some_and(FlagValue::is_truthy)
    }

    /// Send rates as given instead of converting seconds to rate codes.
    pub fn use_raw_rate(&self) -> bool {
        self.enabled("use_raw_rate")
    }

    /// Follow every level command with a state report request.
    pub fn report_state(&self) -> bool {
        self.enabled("report_state")
    }

    pub fn unlimited_blink_rate(&self) -> bool {
        self.enabled("unlimited_blink_rate")
    }

    /// Skip the full-network state refresh after connecting.
    pub fn no_sync(&self) -> bool {
        self.enabled("no_sync")
    }

    /// Records from a relaying gateway end in a null byte, not `\r`.
    pub fn relay_mode(&self) -> bool {
        self.enabled("relay_mode")
    }

    /// Number of times each message is put on the powerline (1–4).
    pub fn tx_count(&self) -> u8 {
        self.get("tx_count")
            .and_then(FlagValue::as_int)
            .and_then(|n| u8::try_from(n.clamp(1, 4)).ok())
            .unwrap_or(1)
    }

    pub fn heartbeat_timeout_sec(&self) -> Option<u64> {
        self.get("heartbeat_timeout_sec")
            .and_then(FlagValue::as_int)
            .and_then(|n| u64::try_from(n).ok())
    }
}

// ── Reconnect backoff ────────────────────────────────────────────────

/// Exponential backoff for reconnecting to the PIM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// `initial * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

// ── GatewayConfig ────────────────────────────────────────────────────

/// Everything the gateway needs to run a session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: PimUrl,
    pub flags: Flags,
    /// Per-attempt connect budget.
    pub connect_timeout: Duration,
    /// How long a queued write waits for its answer.
    pub response_timeout: Duration,
    /// Hold-off after the PIM reports busy.
    pub busy_delay: Duration,
    /// Resends after the first unanswered attempt.
    pub retries: u8,
    pub reconnect: ReconnectConfig,
    /// Idle time before probing the link. `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
    /// UPStart export to import on startup.
    pub upstart_file: Option<PathBuf>,
}

impl GatewayConfig {
    /// Defaults for `url`. Serial links get no heartbeat; otherwise the
    /// `heartbeat_timeout_sec` flag overrides the 120s default and `0`
    /// turns it off.
    pub fn new(url: PimUrl, flags: Flags) -> Self {
        let heartbeat = if url.is_serial() {
            None
        } else {
            match flags.heartbeat_timeout_sec() {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => Some(DEFAULT_HEARTBEAT),
            }
        };
        Self {
            url,
            flags,
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(5),
            busy_delay: Duration::from_millis(100),
            retries: 1,
            reconnect: ReconnectConfig::default(),
            heartbeat,
            upstart_file: None,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            response_timeout: self.response_timeout,
            busy_delay: self.busy_delay,
            retries: self.retries,
        }
    }
}
