// ── Domain model ──
//
// Entities are owned by their registries and shared as `Arc`s. Static
// attributes come from the topology import; levels change through
// registry-dispatched handlers or optimistic updates from commands.

pub mod device;
pub mod link;
pub mod observe;

pub use device::{Device, DeviceInfo};
pub use link::{Link, LinkChange, LinkCommand, LinkInfo, LinkMember};
pub use observe::{Callback, CallbackId, Change};
