// ── Outbound command encoders ──
//
// Each encoder returns an `Outbound`: the PIM command character, the hex
// payload, and the correlator of the device response (if one is expected).

use crate::address::Address;
use crate::codec::{Control, MessageType, checksum, encode_control_word, encode_message};
use crate::connection::Correlator;
use crate::pim::PimCommand;

/// Source id the host transmits as.
pub const HOST_SOURCE_ID: u8 = 0xFF;

/// Rate byte meaning "use the device's default rate".
pub const DEFAULT_RATE: u8 = 0xFF;

/// A frame ready to be queued on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub command: PimCommand,
    pub payload: String,
    /// `Some` when the addressed device is expected to answer; `None` when
    /// the PIM's accept is enough.
    pub response: Option<Correlator>,
}

impl Outbound {
    /// Read `count` PIM registers starting at `start`.
    pub fn read_registers(start: u8, count: u8) -> Self {
        Self::registers(PimCommand::ReadRegisters, &[start, count])
    }

    /// Write `values` into PIM registers starting at `start`.
    pub fn write_registers(start: u8, values: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() + 1);
        bytes.push(start);
        bytes.extend_from_slice(values);
        Self::registers(PimCommand::WriteRegisters, &bytes)
    }

    fn registers(command: PimCommand, bytes: &[u8]) -> Self {
        let mut frame = bytes.to_vec();
        frame.push(checksum(bytes));
        Self {
            command,
            payload: hex::encode_upper(frame),
            response: None,
        }
    }
}

/// Builds UPB messages with a fixed transmit count and source id.
///
/// `tx_count` is the number of transmissions (1–4). The control word's
/// 2-bit field holds `tx_count - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEncoder {
    tx_count: u8,
    source_id: u8,
}

impl Default for MessageEncoder {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MessageEncoder {
    pub fn new(tx_count: u8) -> Self {
        Self {
            tx_count: tx_count.clamp(1, 4),
            source_id: HOST_SOURCE_ID,
        }
    }

    pub fn with_source_id(mut self, source_id: u8) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn tx_count(&self) -> u8 {
        self.tx_count
    }

    fn control(&self, link: bool) -> Control {
        Control::Word(encode_control_word(link, 0, 0, self.tx_count - 1, 0))
    }

    fn message(&self, addr: &Address, kind: MessageType, data: &[u8]) -> Outbound {
        Outbound {
            command: PimCommand::TransmitMessage,
            payload: encode_message(
                self.control(addr.is_link()),
                addr.network_id(),
                addr.unit_id(),
                self.source_id,
                kind.code(),
                data,
            ),
            response: None,
        }
    }

    /// Level, then rate, then the 1-based channel for multi-channel devices.
    fn level_data(addr: &Address, level: u8, rate: Option<u8>) -> Vec<u8> {
        let mut data = vec![level];
        if addr.multi_channel() && addr.is_device() {
            data.push(rate.unwrap_or(DEFAULT_RATE));
            data.push(addr.channel() + 1);
        } else if let Some(rate) = rate {
            data.push(rate);
        }
        data
    }

    fn channel_data(addr: &Address) -> Vec<u8> {
        if addr.multi_channel() && addr.is_device() {
            vec![addr.channel() + 1]
        } else {
            Vec::new()
        }
    }

    pub fn activate_link(&self, addr: &Address) -> Outbound {
        self.message(addr, MessageType::Activate, &[])
    }

    pub fn deactivate_link(&self, addr: &Address) -> Outbound {
        self.message(addr, MessageType::Deactivate, &[])
    }

    pub fn goto(&self, addr: &Address, level: u8, rate: Option<u8>) -> Outbound {
        self.message(addr, MessageType::Goto, &Self::level_data(addr, level, rate))
    }

    pub fn fade_start(&self, addr: &Address, level: u8, rate: Option<u8>) -> Outbound {
        self.message(addr, MessageType::FadeStart, &Self::level_data(addr, level, rate))
    }

    pub fn fade_stop(&self, addr: &Address) -> Outbound {
        self.message(addr, MessageType::FadeStop, &Self::channel_data(addr))
    }

    pub fn blink(&self, addr: &Address, rate: u8) -> Outbound {
        let mut data = vec![rate];
        data.extend(Self::channel_data(addr));
        self.message(addr, MessageType::Blink, &data)
    }

    /// Ask a device for its state. The device's state report completes the
    /// write, matched on `(network_id, unit_id)`.
    pub fn report_state(&self, addr: &Address) -> Outbound {
        let mut out = self.message(addr, MessageType::ReportState, &[]);
        out.response = Some(Correlator::new(addr.network_id(), addr.unit_id()));
        out
    }
}
