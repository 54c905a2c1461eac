// ── Entity registries ──
//
// One registry per entity kind. Each subscribes its handlers to the
// message router when built and is the only thing that mutates entity
// state in response to network traffic.

mod collection;
mod devices;
mod links;

pub use devices::Devices;
pub use links::Links;
