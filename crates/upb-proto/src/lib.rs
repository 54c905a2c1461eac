//! Wire layer for UPB Powerline Interface Modules (PIMs).
//!
//! Everything here is transport-agnostic and free of entity state:
//!
//! - **[`codec`]** -- control-word packing, checksum, hex-ASCII message bodies.
//! - **[`pim`]** -- PIM command characters, 2-character response prefixes and
//!   relay control tokens.
//! - **[`framing`]** -- splits the inbound byte stream into records.
//! - **[`encode`]** -- outbound command encoders (goto, activate, blink, ...).
//! - **[`connection`]** -- the sans-IO write-queue / retry / busy-backoff /
//!   duplicate-suppression state machine.
//! - **[`transport`]** -- `tcp://` and `serial://` URL parsing and stream opening.

pub mod address;
pub mod codec;
pub mod connection;
pub mod encode;
pub mod error;
pub mod framing;
pub mod pim;
pub mod transport;

pub use address::Address;
pub use codec::{Control, Message, MessageType, decode, decode_hex, encode_control_word, encode_message};
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionStatus, Correlator, QueuedWrite,
};
pub use encode::{MessageEncoder, Outbound};
pub use error::{DecodeError, Error};
pub use framing::RecordBuffer;
pub use pim::{ControlSignal, PimCommand, PimResponse, Record};
pub use transport::{PimStream, PimUrl};
