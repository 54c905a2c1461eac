use thiserror::Error;

/// A wire record that could not be turned into a [`Message`](crate::Message).
///
/// Decode failures are never fatal: the connection logs and drops the
/// record, then keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header (control word, network, dest, src, code).
    #[error("UPB message too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    /// The control word's length field disagrees with the bytes received.
    #[error("UPB message length field says {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The body was not an even-length string of hex digits.
    #[error("UPB message is not valid hex: {0}")]
    InvalidHex(String),
}

/// Top-level error type for the `upb-proto` crate.
#[derive(Debug, Error)]
pub enum Error {
    // ── Data ────────────────────────────────────────────────────────
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ── Transport ───────────────────────────────────────────────────
    /// Read or write on the PIM byte stream failed.
    #[error("PIM transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Connection URL could not be parsed or has an unsupported scheme.
    #[error("Invalid PIM URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connect attempt did not finish in time.
    #[error("Connecting to PIM timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Serial port could not be opened (or serial support is not compiled in).
    #[error("Serial port error: {0}")]
    Serial(String),
}

impl Error {
    /// Returns `true` if reconnecting might resolve this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. } | Self::Serial(_))
    }
}
