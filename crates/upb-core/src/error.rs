// ── Core error types ──
//
// Errors surfaced by upb-core. Transport and protocol failures are mostly
// recovered inside the gateway session; what reaches callers is startup
// configuration, lookups, import problems and a closed gateway.
// The `From<upb_proto::Error>` impl maps wire-layer errors onto these.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach PIM at {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("No response from {target} after {attempts} attempt(s)")]
    ProtocolTimeout { target: String, attempts: u32 },

    #[error("Gateway is not running")]
    Disconnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed UPB message: {0}")]
    Decode(#[from] upb_proto::DecodeError),

    #[error("Device not found: {index}")]
    DeviceNotFound { index: String },

    #[error("Link not found: {index}")]
    LinkNotFound { index: String },

    #[error("UPStart import failed: {message}")]
    Import { message: String },

    // ── Handler errors ───────────────────────────────────────────────
    /// A message handler rejected a message. Logged by the router, never
    /// propagated past it.
    #[error("Handler for {message_type} failed: {reason}")]
    Handler {
        message_type: String,
        reason: String,
    },
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<upb_proto::Error> for CoreError {
    fn from(err: upb_proto::Error) -> Self {
        match err {
            upb_proto::Error::Decode(e) => CoreError::Decode(e),
            upb_proto::Error::Transport(e) => CoreError::Transport {
                url: String::new(),
                reason: e.to_string(),
            },
            upb_proto::Error::InvalidUrl { url, reason } => CoreError::Config {
                message: format!("Invalid PIM URL '{url}': {reason}"),
            },
            upb_proto::Error::Timeout { timeout_secs } => CoreError::Transport {
                url: String::new(),
                reason: format!("connect timed out after {timeout_secs}s"),
            },
            upb_proto::Error::Serial(reason) => CoreError::Transport {
                url: String::new(),
                reason,
            },
        }
    }
}
