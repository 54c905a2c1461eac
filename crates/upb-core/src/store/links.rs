// ── Link registry ──

use std::sync::Arc;

use tracing::warn;
use upb_proto::{Address, Message, MessageType};

use super::collection::EntityCollection;
use super::devices::Devices;
use crate::command::CommandHandle;
use crate::error::CoreError;
use crate::model::{Link, LinkCommand, LinkInfo, LinkMember};
use crate::router::MessageRouter;

/// Every known link, keyed by `"{network}_{link}"`.
#[derive(Clone)]
pub struct Links {
    entities: Arc<EntityCollection<Link>>,
    devices: Devices,
    handle: CommandHandle,
}

impl Links {
    /// Build the registry and subscribe its handlers to `router`. Member
    /// levels are pushed into `devices`.
    pub fn new(router: &MessageRouter, devices: Devices, handle: CommandHandle) -> Self {
        let links = Self {
            entities: Arc::new(EntityCollection::new()),
            devices,
            handle,
        };

        for (kind, command) in [
            (MessageType::Activate, LinkCommand::Activate),
            (MessageType::Deactivate, LinkCommand::Deactivate),
            (MessageType::Goto, LinkCommand::Goto),
        ] {
            let this = links.clone();
            router.subscribe(
                kind,
                Arc::new(move |msg: &Message| {
                    this.on_link_command(msg, command);
                    Ok(())
                }),
            );
        }

        links
    }

    /// Add a link. An existing link at the same index is kept and returned.
    pub fn add(&self, info: LinkInfo) -> Arc<Link> {
        let devices = self.devices.clone();
        let handle = self.handle.clone();
        let (link, _) = self
            .entities
            .insert_with(info.address.index(), || Link::new(info, devices, handle));
        link
    }

    pub fn add_member(&self, link_index: &str, member: LinkMember) -> Result<(), CoreError> {
        self.require(link_index)?.add_member(member);
        Ok(())
    }

    pub fn get(&self, index: &str) -> Option<Arc<Link>> {
        self.entities.get(index)
    }

    pub fn require(&self, index: &str) -> Result<Arc<Link>, CoreError> {
        self.get(index).ok_or_else(|| CoreError::LinkNotFound {
            index: index.to_owned(),
        })
    }

    /// All links, sorted by index.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Link>>> {
        self.entities.snapshot()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Links have no state on the network to refresh.
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    pub fn sync(&self) -> Result<(), CoreError> {
        Ok(())
    }

    // ── Handlers ─────────────────────────────────────────────────────

    fn on_link_command(&self, msg: &Message, command: LinkCommand) {
        if !msg.link {
            return;
        }
        let index = Address::link(msg.network_id, msg.dest_id).index();
        let Some(link) = self.get(&index) else {
            warn!(index, %command, "command for unknown link");
            return;
        };
        let level = match command {
            LinkCommand::Goto => msg.data.first().copied(),
            _ => None,
        };
        link.apply(command, level, None);
    }
}
