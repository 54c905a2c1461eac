//! Network topology import.
//!
//! UPStart (the vendor's configuration tool) can export a network as a
//! comma-separated `.upe` file. [`upstart`] turns one into device and link
//! registrations.

pub mod upstart;

pub use upstart::{Topology, load, parse};
