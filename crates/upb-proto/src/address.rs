// ── UPB addressing ──
//
// Devices and links share the network/unit numbering space but live in
// disjoint namespaces. The canonical index string doubles as the registry key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a UPB device channel or a link (scene).
///
/// Immutable once built. Use [`Address::index`] as the map key:
/// `"{network}_{unit}_{channel}"` for devices, `"{network}_{unit}"` for links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    network_id: u8,
    unit_id: u8,
    channel: u8,
    is_link: bool,
    multi_channel: bool,
}

impl Address {
    /// Single-channel device (channel 0).
    pub const fn device(network_id: u8, unit_id: u8) -> Self {
        Self {
            network_id,
            unit_id,
            channel: 0,
            is_link: false,
            multi_channel: false,
        }
    }

    /// One channel of a device; `multi_channel` controls whether outbound
    /// level commands carry the channel byte.
    pub const fn device_channel(network_id: u8, unit_id: u8, channel: u8, multi_channel: bool) -> Self {
        Self {
            network_id,
            unit_id,
            channel,
            is_link: false,
            multi_channel,
        }
    }

    pub const fn link(network_id: u8, link_id: u8) -> Self {
        Self {
            network_id,
            unit_id: link_id,
            channel: 0,
            is_link: true,
            multi_channel: false,
        }
    }

    pub const fn network_id(&self) -> u8 {
        self.network_id
    }

    /// Device id for devices, link id for links.
    pub const fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub const fn channel(&self) -> u8 {
        self.channel
    }

    pub const fn is_link(&self) -> bool {
        self.is_link
    }

    pub const fn is_device(&self) -> bool {
        !self.is_link
    }

    pub const fn multi_channel(&self) -> bool {
        self.multi_channel
    }

    /// Canonical registry key.
    pub fn index(&self) -> String {
        if self.is_link {
            format!("{}_{}", self.network_id, self.unit_id)
        } else {
            format!("{}_{}_{}", self.network_id, self.unit_id, self.channel)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.index())
    }
}
