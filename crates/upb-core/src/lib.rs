//! Session layer for UPB lighting networks.
//!
//! Sits on top of the `upb-proto` wire layer and owns everything with state:
//!
//! - **[`Gateway`]** -- Central facade. [`connect()`](Gateway::connect) spawns
//!   the session task, which opens the PIM stream, runs the connection state
//!   machine, reconnects with exponential backoff, probes an idle link, and
//!   obeys relay control tokens. Observable through a `watch` of
//!   [`ConnectionState`] and a `broadcast` of [`GatewayEvent`]s.
//!
//! - **[`MessageRouter`]** -- Fans decoded messages out to handlers keyed by
//!   [`MessageType`](upb_proto::MessageType).
//!
//! - **Registries** ([`Devices`], [`Links`]) -- Lock-free entity collections
//!   (`DashMap` + `tokio::sync::watch`) that subscribe to the router and keep
//!   entity state current. [`Devices::subscribe`] watches membership.
//!
//! - **Entities** ([`Device`], [`Link`]) -- Issue commands through a
//!   [`CommandHandle`] and notify change callbacks synchronously.
//!
//! - **Import** ([`import`]) -- UPStart export parsing, backed by the static
//!   [`catalog`] of manufacturers and products.

pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod import;
pub mod model;
pub mod rate;
pub mod router;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::CommandHandle;
pub use config::{FlagValue, Flags, GatewayConfig, ReconnectConfig};
pub use error::CoreError;
pub use gateway::{ConnectionState, Connector, Gateway, GatewayEvent, UrlConnector};
pub use router::{Handler, MessageRouter};
pub use store::{Devices, Links};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Callback, CallbackId, Change, Device, DeviceInfo, Link, LinkChange, LinkCommand, LinkInfo,
    LinkMember,
};
