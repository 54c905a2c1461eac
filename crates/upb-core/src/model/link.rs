// ── Link (scene) entity ──

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tracing::debug;
use upb_proto::Address;

use super::observe::{Callback, CallbackId, Change, Observers};
use crate::command::CommandHandle;
use crate::error::CoreError;
use crate::rate::check_dim_params;
use crate::store::Devices;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub address: Address,
    pub name: String,
}

/// A device taking part in a link, and the level it goes to on activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMember {
    pub device: Address,
    pub preset: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum LinkCommand {
    Activate,
    Deactivate,
    Goto,
    FadeStart,
    FadeStop,
    Blink,
}

/// The most recent command seen for a link, sent or received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkChange {
    pub command: LinkCommand,
    pub level: Option<u8>,
    pub rate: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

/// A named group of devices with preset levels.
pub struct Link {
    info: LinkInfo,
    members: ArcSwap<Vec<LinkMember>>,
    last_change: watch::Sender<Option<LinkChange>>,
    observers: Observers<Link>,
    devices: Devices,
    handle: CommandHandle,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("index", &self.index())
            .field("name", &self.info.name)
            .field("members", &self.members.load().len())
            .finish_non_exhaustive()
    }
}

impl Link {
    pub(crate) fn new(info: LinkInfo, devices: Devices, handle: CommandHandle) -> Self {
        let (last_change, _) = watch::channel(None);
        Self {
            info,
            members: ArcSwap::from_pointee(Vec::new()),
            last_change,
            observers: Observers::default(),
            devices,
            handle,
        }
    }

    pub fn info(&self) -> &LinkInfo {
        &self.info
    }

    pub fn address(&self) -> &Address {
        &self.info.address
    }

    pub fn index(&self) -> String {
        self.info.address.index()
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn members(&self) -> Arc<Vec<LinkMember>> {
        self.members.load_full()
    }

    pub fn last_change(&self) -> Option<LinkChange> {
        self.last_change.borrow().clone()
    }

    /// Level of the last level-carrying command, if any.
    pub fn status(&self) -> Option<u8> {
        self.last_change.borrow().as_ref().and_then(|c| c.level)
    }

    pub fn watch_last_change(&self) -> watch::Receiver<Option<LinkChange>> {
        self.last_change.subscribe()
    }

    pub fn add_callback(&self, callback: Callback<Link>) -> CallbackId {
        self.observers.add(callback)
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.observers.remove(id)
    }

    pub(crate) fn add_member(&self, member: LinkMember) {
        self.members.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(member);
            next
        });
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn activate(&self) -> Result<(), CoreError> {
        self.handle
            .send(self.handle.encoder().activate_link(self.address()))?;
        self.apply(LinkCommand::Activate, None, None);
        Ok(())
    }

    pub fn deactivate(&self) -> Result<(), CoreError> {
        self.handle
            .send(self.handle.encoder().deactivate_link(self.address()))?;
        self.apply(LinkCommand::Deactivate, None, None);
        Ok(())
    }

    /// Move every member to `brightness`.
    pub fn goto(&self, brightness: u8, rate: Option<f64>) -> Result<(), CoreError> {
        let (level, rate) = check_dim_params(brightness, rate, self.handle.flags().use_raw_rate());
        self.handle
            .send(self.handle.encoder().goto(self.address(), level, rate))?;
        self.apply(LinkCommand::Goto, Some(level), rate);
        Ok(())
    }

    pub fn fade_start(&self, brightness: u8, rate: Option<f64>) -> Result<(), CoreError> {
        let (level, rate) = check_dim_params(brightness, rate, self.handle.flags().use_raw_rate());
        self.handle
            .send(self.handle.encoder().fade_start(self.address(), level, rate))?;
        self.apply(LinkCommand::FadeStart, Some(level), rate);
        Ok(())
    }

    pub fn fade_stop(&self) -> Result<(), CoreError> {
        self.handle
            .send(self.handle.encoder().fade_stop(self.address()))?;
        self.apply(LinkCommand::FadeStop, None, None);
        Ok(())
    }

    pub fn blink(&self, rate: u8) -> Result<(), CoreError> {
        self.handle
            .send(self.handle.encoder().blink(self.address(), rate))?;
        self.apply(LinkCommand::Blink, None, Some(rate));
        Ok(())
    }

    // ── State ────────────────────────────────────────────────────────

    /// Record the command and push the resulting level to every member
    /// device without waiting for the network. Activate uses each member's
    /// preset, goto and fade use `level`, deactivate turns members off.
    /// Fade stop and blink leave member levels alone.
    pub(crate) fn apply(&self, command: LinkCommand, level: Option<u8>, rate: Option<u8>) {
        debug!(index = %self.info.address, name = %self.info.name, %command, "link");

        for member in self.members.load().iter() {
            let target = match command {
                LinkCommand::Activate => Some(member.preset),
                LinkCommand::Deactivate => Some(0),
                LinkCommand::Goto | LinkCommand::FadeStart => level,
                LinkCommand::FadeStop | LinkCommand::Blink => None,
            };
            let Some(target) = target else { continue };
            match self.devices.get(&member.device.index()) {
                Some(device) => {
                    device.set_status(target);
                }
                None => debug!(device = %member.device, "link member not registered"),
            }
        }

        let change = LinkChange {
            command,
            level,
            rate,
            timestamp: Utc::now(),
        };
        self.last_change.send_replace(Some(change.clone()));
        self.observers.notify(self, &[Change::LastChange(change)]);
    }
}
