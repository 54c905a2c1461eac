// ── Device registry ──

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};
use upb_proto::{Address, Message, MessageType};

use super::collection::EntityCollection;
use crate::command::CommandHandle;
use crate::error::CoreError;
use crate::model::{Device, DeviceInfo};
use crate::router::MessageRouter;

/// Register payload length: start register plus 16 values.
const REGISTER_REPORT_LEN: usize = 17;

/// Every known device channel, keyed by `"{network}_{unit}_{channel}"`.
///
/// Cheap to clone; clones share the same entities.
#[derive(Clone)]
pub struct Devices {
    entities: Arc<EntityCollection<Device>>,
    handle: CommandHandle,
}

impl Devices {
    /// Build the registry and subscribe its handlers to `router`.
    pub fn new(router: &MessageRouter, handle: CommandHandle) -> Self {
        let devices = Self {
            entities: Arc::new(EntityCollection::new()),
            handle,
        };

        let this = devices.clone();
        router.subscribe(
            MessageType::DeviceStateReport,
            Arc::new(move |msg: &Message| {
                this.on_state_report(msg);
                Ok(())
            }),
        );
        let this = devices.clone();
        router.subscribe(MessageType::Goto, Arc::new(move |msg: &Message| this.on_goto(msg)));
        router.subscribe(
            MessageType::RegisterValuesReport,
            Arc::new(|msg: &Message| {
                on_register_report(msg);
                Ok(())
            }),
        );

        devices
    }

    /// Add a device. If one already exists at the same index it is kept
    /// and returned instead.
    pub fn add(&self, info: DeviceInfo) -> Arc<Device> {
        let handle = self.handle.clone();
        let (device, is_new) = self
            .entities
            .insert_with(info.address.index(), || Device::new(info, handle));
        if !is_new {
            debug!(index = %device.address(), "device already registered");
        }
        device
    }

    pub fn get(&self, index: &str) -> Option<Arc<Device>> {
        self.entities.get(index)
    }

    pub fn require(&self, index: &str) -> Result<Arc<Device>, CoreError> {
        self.get(index).ok_or_else(|| CoreError::DeviceNotFound {
            index: index.to_owned(),
        })
    }

    /// All devices, sorted by index.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.entities.snapshot()
    }

    /// Watch the sorted device list; it changes whenever a device is added.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.entities.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ask every device for its state. A state report covers all channels
    /// of a unit, so only channel 0 is asked.
    pub fn sync(&self) -> Result<(), CoreError> {
        for device in self.snapshot().iter().filter(|d| d.address().channel() == 0) {
            device.update_status()?;
        }
        Ok(())
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// One level byte per channel, starting at channel 0 of the sender.
    /// Stops at the first channel with no registered device.
    fn on_state_report(&self, msg: &Message) {
        for (channel, level) in (0u8..).zip(msg.data.iter().copied()) {
            let index = Address::device_channel(msg.network_id, msg.src_id, channel, false).index();
            let Some(device) = self.get(&index) else {
                break;
            };
            device.set_status(level);
        }
    }

    fn on_goto(&self, msg: &Message) -> Result<(), CoreError> {
        if msg.link {
            return Ok(());
        }
        let Some(&level) = msg.data.first() else {
            return Err(CoreError::Handler {
                message_type: MessageType::Goto.to_string(),
                reason: "goto without a level".into(),
            });
        };
        let channel = msg.data.get(2).map_or(0, |c| c.saturating_sub(1));
        let index = Address::device_channel(msg.network_id, msg.dest_id, channel, false).index();
        if let Some(device) = self.get(&index) {
            device.set_status(level);
        }
        Ok(())
    }
}

/// Registers 16/32/48 hold the PIM's network, room and device names.
fn on_register_report(msg: &Message) {
    let Some((&start, values)) = msg.data.split_first() else {
        return;
    };
    if msg.data.len() != REGISTER_REPORT_LEN {
        debug!(len = msg.data.len(), "register report is not 16 registers, ignoring");
        return;
    }
    let text = String::from_utf8_lossy(values);
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    match start {
        16 => info!(name = text, "PIM network name"),
        32 => info!(name = text, "PIM room name"),
        48 => info!(name = text, "PIM device name"),
        _ => {}
    }
}
