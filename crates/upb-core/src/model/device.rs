// ── Device entity ──

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use upb_proto::{Address, MessageEncoder, Outbound};

use super::observe::{Callback, CallbackId, Change, Observers};
use crate::command::CommandHandle;
use crate::error::CoreError;
use crate::rate::{MINIMUM_BLINK_RATE, check_dim_params};

/// Static description of one device channel, as imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: Address,
    pub name: String,
    pub manufacturer: String,
    pub product: String,
    pub kind: String,
    pub version: String,
    pub dimmable: bool,
}

impl DeviceInfo {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            manufacturer: String::new(),
            product: String::new(),
            kind: String::new(),
            version: String::new(),
            dimmable: false,
        }
    }
}

type LevelEncoder = fn(&MessageEncoder, &Address, u8, Option<u8>) -> Outbound;

/// One addressable device channel.
///
/// `status` is the last known level (0–100), `None` until something
/// reports it.
pub struct Device {
    info: DeviceInfo,
    status: watch::Sender<Option<u8>>,
    observers: Observers<Device>,
    handle: CommandHandle,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index())
            .field("name", &self.info.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub(crate) fn new(info: DeviceInfo, handle: CommandHandle) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            info,
            status,
            observers: Observers::default(),
            handle,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
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

    pub fn dimmable(&self) -> bool {
        self.info.dimmable
    }

    pub fn status(&self) -> Option<u8> {
        *self.status.borrow()
    }

    /// Receiver that wakes on every status change.
    pub fn watch_status(&self) -> watch::Receiver<Option<u8>> {
        self.status.subscribe()
    }

    pub fn add_callback(&self, callback: Callback<Device>) -> CallbackId {
        self.observers.add(callback)
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.observers.remove(id)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Go to `brightness` percent. `rate` is seconds, or a raw rate code
    /// with the `use_raw_rate` flag; `None` uses the device default.
    pub fn turn_on(&self, brightness: u8, rate: Option<f64>) -> Result<(), CoreError> {
        self.level(brightness, rate, MessageEncoder::goto)
    }

    pub fn turn_off(&self, rate: Option<f64>) -> Result<(), CoreError> {
        self.level(0, rate, MessageEncoder::goto)
    }

    pub fn fade_start(&self, brightness: u8, rate: Option<f64>) -> Result<(), CoreError> {
        self.level(brightness, rate, MessageEncoder::fade_start)
    }

    /// Stop a fade in progress and ask where it ended up.
    pub fn fade_stop(&self) -> Result<(), CoreError> {
        let encoder = self.handle.encoder();
        self.handle.send(encoder.fade_stop(self.address()))?;
        self.handle.send(encoder.report_state(self.address()))
    }

    /// Blink at `rate` (in tenths of a second between toggles).
    pub fn blink(&self, rate: u8) -> Result<(), CoreError> {
        let rate = if self.handle.flags().unlimited_blink_rate() {
            rate
        } else {
            rate.max(MINIMUM_BLINK_RATE)
        };
        let encoder = self.handle.encoder();
        self.handle.send(encoder.blink(self.address(), rate))?;
        if self.handle.flags().report_state() {
            self.handle.send(encoder.report_state(self.address()))?;
        }
        self.set_status(100);
        Ok(())
    }

    /// Ask the device to report its level.
    pub fn update_status(&self) -> Result<(), CoreError> {
        self.handle
            .send(self.handle.encoder().report_state(self.address()))
    }

    fn level(&self, brightness: u8, rate: Option<f64>, encode: LevelEncoder) -> Result<(), CoreError> {
        let brightness = if !self.info.dimmable && brightness > 0 {
            100
        } else {
            brightness
        };
        let flags = self.handle.flags();
        let (brightness, rate) = check_dim_params(brightness, rate, flags.use_raw_rate());

        let encoder = self.handle.encoder();
        self.handle
            .send(encode(encoder, self.address(), brightness, rate))?;
        if flags.report_state() {
            self.handle.send(encoder.report_state(self.address()))?;
        }
        self.set_status(brightness);
        Ok(())
    }

    // ── State ────────────────────────────────────────────────────────

    /// Record a new level. Observers fire only if it differs from the
    /// current one. Returns whether it changed.
    pub(crate) fn set_status(&self, level: u8) -> bool {
        let mut old = None;
        let changed = self.status.send_if_modified(|status| {
            if *status == Some(level) {
                return false;
            }
            old = *status;
            *status = Some(level);
            true
        });
        if changed {
            debug!(index = %self.info.address, name = %self.info.name, level, "device status");
            self.observers
                .notify(self, &[Change::Status { old, new: level }]);
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::UnboundedReceiver;
    use upb_proto::{MessageType, PimCommand, decode_hex};

    fn device(dimmable: bool, flags: &str) -> (Device, UnboundedReceiver<Outbound>) {
        let (handle, rx) = CommandHandle::detached(flags.parse().unwrap());
        let mut info = DeviceInfo::new(Address::device(194, 9), "Hall");
        info.dimmable = dimmable;
        (Device::new(info, handle), rx)
    }

    fn sent(rx: &mut UnboundedReceiver<Outbound>) -> Vec<(MessageType, Vec<u8>)> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|o| {
                assert_eq!(o.command, PimCommand::TransmitMessage);
                let msg = decode_hex(&o.payload).unwrap();
                (msg.message_type().unwrap(), msg.data)
            })
            .collect()
    }

    #[test]
    fn non_dimmable_turn_on_goes_to_full() {
        let (dev, mut rx) = device(false, "");
        dev.turn_on(40, None).unwrap();
        assert_eq!(dev.status(), Some(100));
        assert_eq!(sent(&mut rx), vec![(MessageType::Goto, vec![100])]);
    }

    #[test]
    fn dimmable_turn_on_converts_rate() {
        let (dev, mut rx) = device(true, "");
        dev.turn_on(40, Some(45.1)).unwrap();
        assert_eq!(dev.status(), Some(40));
        assert_eq!(sent(&mut rx), vec![(MessageType::Goto, vec![40, 9])]);
    }

    #[test]
    fn raw_rate_is_passed_through() {
        let (dev, mut rx) = device(true, "use_raw_rate");
        dev.turn_on(40, Some(12.0)).unwrap();
        assert_eq!(sent(&mut rx), vec![(MessageType::Goto, vec![40, 12])]);
    }

    #[test]
    fn report_state_flag_adds_report_request() {
        let (dev, mut rx) = device(true, "report_state");
        dev.turn_off(None).unwrap();
        assert_eq!(
            sent(&mut rx),
            vec![
                (MessageType::Goto, vec![0]),
                (MessageType::ReportState, vec![])
            ]
        );
        assert_eq!(dev.status(), Some(0));
    }

    #[test]
    fn blink_enforces_floor_unless_unlimited() {
        let (dev, mut rx) = device(true, "");
        dev.blink(5).unwrap();
        assert_eq!(sent(&mut rx), vec![(MessageType::Blink, vec![20])]);
        assert_eq!(dev.status(), Some(100));

        let (dev, mut rx) = device(true, "unlimited_blink_rate");
        dev.blink(5).unwrap();
        assert_eq!(sent(&mut rx), vec![(MessageType::Blink, vec![5])]);
    }

    #[test]
    fn fade_stop_requests_state() {
        let (dev, mut rx) = device(true, "");
        dev.fade_stop().unwrap();
        assert_eq!(
            sent(&mut rx),
            vec![
                (MessageType::FadeStop, vec![]),
                (MessageType::ReportState, vec![])
            ]
        );
        assert_eq!(dev.status(), None);
    }

    #[test]
    fn callbacks_fire_only_on_change() {
        let (dev, _rx) = device(true, "");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dev.add_callback(Arc::new(move |_: &Device, changes: &[Change]| {
            sink.lock().unwrap().extend_from_slice(changes);
        }));

        assert!(dev.set_status(30));
        assert!(!dev.set_status(30));
        assert!(dev.set_status(0));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Change::Status { old: None, new: 30 },
                Change::Status {
                    old: Some(30),
                    new: 0
                }
            ]
        );
    }

    #[test]
    fn watch_receiver_sees_status() {
        let (dev, _rx) = device(true, "");
        let rx = dev.watch_status();
        dev.set_status(55);
        assert_eq!(*rx.borrow(), Some(55));
    }

    #[test]
    fn closed_gateway_surfaces_disconnected() {
        let (dev, rx) = device(true, "");
        drop(rx);
        assert!(matches!(dev.turn_on(10, None), Err(CoreError::Disconnected)));
    }
}
