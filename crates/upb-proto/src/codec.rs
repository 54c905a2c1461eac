// ── UPB message codec ──
//
// Body layout (uppercase hex pairs on the wire):
//
//   CCCC NN DD SS MM [data...] KK
//
// CCCC control word, NN network id, DD destination, SS source,
// MM message type, KK checksum. The control word's length field counts
// every byte from CCCC through KK inclusive.

use serde::Serialize;
use strum::{Display, FromRepr};

use crate::error::DecodeError;

/// Bytes before the data section: control word (2), network, dest, src, code.
pub const HEADER_LEN: usize = 6;

/// Length-field overhead: the header plus the checksum byte.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 1;

/// Largest data section the 5-bit length field can describe.
pub const MAX_DATA_LEN: usize = 31 - FRAME_OVERHEAD;

const LINK_BIT: u16 = 0x8000;
const LENGTH_MASK: u16 = 0x1F00;

// ── Message types ────────────────────────────────────────────────────

/// UPB message-type codes this driver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, Serialize)]
#[repr(u8)]
pub enum MessageType {
    Activate = 0x20,
    Deactivate = 0x21,
    Goto = 0x22,
    FadeStart = 0x23,
    FadeStop = 0x24,
    Blink = 0x25,
    ReportState = 0x30,
    DeviceStateReport = 0x86,
    RegisterValuesReport = 0x90,
}

impl MessageType {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ── Control word ─────────────────────────────────────────────────────

/// Pack the control-word fields (length excluded).
///
/// `tx_count` is stored as given. Whether a configured "number of
/// transmissions" needs a `- 1` before landing here is the caller's call;
/// see [`MessageEncoder`](crate::MessageEncoder).
pub fn encode_control_word(link: bool, repeater: u8, ack: u8, tx_count: u8, tx_seq: u8) -> u16 {
    (u16::from(link) << 15)
        | (u16::from(repeater & 0x3) << 13)
        | (u16::from(ack & 0x7) << 4)
        | (u16::from(tx_count & 0x3) << 2)
        | u16::from(tx_seq & 0x3)
}

/// Control word passed to [`encode_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Derive from the destination kind; every other field zero.
    Auto { link: bool },
    /// Use this word as-is (its length bits are overwritten).
    Word(u16),
}

impl Control {
    fn word(self) -> u16 {
        match self {
            Self::Auto { link } => encode_control_word(link, 0, 0, 0, 0),
            Self::Word(w) => w,
        }
    }
}

// ── Checksum ─────────────────────────────────────────────────────────

/// Two's-complement checksum: appending it makes the byte sum 0 mod 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

// ── Encode ───────────────────────────────────────────────────────────

/// Encode a message body as uppercase hex, checksum included.
///
/// `data` must not exceed [`MAX_DATA_LEN`]: a longer body does not fit the
/// 5-bit length field and the resulting frame is invalid.
pub fn encode_message(
    control: Control,
    network_id: u8,
    dest_id: u8,
    src_id: u8,
    msg_code: u8,
    data: &[u8],
) -> String {
    debug_assert!(data.len() <= MAX_DATA_LEN, "{} data bytes do not fit a frame", data.len());
    let length = FRAME_OVERHEAD + data.len();
    let length_bits = (u16::try_from(length).unwrap_or(u16::MAX) << 8) & LENGTH_MASK;
    let control = (control.word() & !LENGTH_MASK) | length_bits;

    let mut frame = Vec::with_capacity(length);
    frame.extend_from_slice(&control.to_be_bytes());
    frame.extend_from_slice(&[network_id, dest_id, src_id, msg_code]);
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));

    hex::encode_upper(frame)
}

// ── Decoded message ──────────────────────────────────────────────────

/// One decoded UPB message. Produced once per inbound update record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub link: bool,
    pub repeater_request: u8,
    pub length: u8,
    pub ack_request: u8,
    pub transmit_count: u8,
    pub transmit_sequence: u8,
    pub network_id: u8,
    pub dest_id: u8,
    pub src_id: u8,
    pub msg_id: u8,
    pub data: Vec<u8>,
}

impl Message {
    /// The known message type, if `msg_id` is one this driver handles.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_repr(self.msg_id)
    }

    /// Re-pack the control word (length field included).
    pub fn control_word(&self) -> u16 {
        encode_control_word(
            self.link,
            self.repeater_request,
            self.ack_request,
            self.transmit_count,
            self.transmit_sequence,
        ) | ((u16::from(self.length) << 8) & LENGTH_MASK)
    }
}

// ── Decode ───────────────────────────────────────────────────────────

/// Decode a message body with the checksum byte already stripped.
///
/// The checksum is verified by the PIM before it forwards an update, so
/// it is not re-checked here.
pub fn decode(body: &[u8]) -> Result<Message, DecodeError> {
    let Some((header, data)) = body.split_first_chunk::<HEADER_LEN>() else {
        return Err(DecodeError::TooShort {
            len: body.len(),
            min: HEADER_LEN,
        });
    };
    let [c_hi, c_lo, network_id, dest_id, src_id, msg_id] = *header;
    let control = u16::from_be_bytes([c_hi, c_lo]);

    let length = ((control & LENGTH_MASK) >> 8) as u8;
    let actual = body.len() + 1;
    if usize::from(length) != actual {
        return Err(DecodeError::LengthMismatch {
            declared: usize::from(length),
            actual,
        });
    }

    Ok(Message {
        link: control & LINK_BIT != 0,
        repeater_request: ((control >> 13) & 0x3) as u8,
        length,
        ack_request: ((control >> 4) & 0x7) as u8,
        transmit_count: ((control >> 2) & 0x3) as u8,
        transmit_sequence: (control & 0x3) as u8,
        network_id,
        dest_id,
        src_id,
        msg_id,
        data: data.to_vec(),
    })
}

/// Decode a hex body as it arrives after the 2-character PIM prefix,
/// trailing checksum pair included.
pub fn decode_hex(body: &str) -> Result<Message, DecodeError> {
    let bytes = hex_bytes(body)?;
    match bytes.split_last() {
        Some((_checksum, rest)) => decode(rest),
        None => Err(DecodeError::TooShort {
            len: 0,
            min: HEADER_LEN,
        }),
    }
}

/// Hex string to bytes, mapped into [`DecodeError::InvalidHex`].
pub fn hex_bytes(body: &str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(body.trim()).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_word_extremes() {
        assert_eq!(encode_control_word(false, 0, 0, 0, 0), 0x0000);
        assert_eq!(encode_control_word(true, 3, 7, 3, 3), 0xE07F);
    }

    #[test]
    fn encode_known_vector() {
        let hex = encode_message(Control::Word(0x8904), 0xC2, 0x09, 0x09, 0x20, &[0xFF, 0xFF]);
        assert_eq!(hex, "8904C2090920FFFF81");
    }

    #[test]
    fn auto_control_sets_link_bit_and_length() {
        let hex = encode_message(Control::Auto { link: true }, 1, 2, 0xFF, 0x20, &[]);
        assert!(hex.starts_with("8700"), "got {hex}");
        let hex = encode_message(Control::Auto { link: false }, 1, 2, 0xFF, 0x30, &[]);
        assert!(hex.starts_with("0700"), "got {hex}");
    }

    #[test]
    fn encoded_bytes_sum_to_zero() {
        for data in [&[][..], &[0x00], &[0xFF, 0xFF, 0xFF], &[0x12, 0x34, 0x56, 0x78]] {
            let hex = encode_message(Control::Word(0x1234), 0xC2, 0x07, 0xFF, 0x22, data);
            let bytes = hex::decode(hex).unwrap();
            let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(sum, 0);
        }
    }

    #[test]
    fn longest_body_fills_the_length_field() {
        let data = [0u8; MAX_DATA_LEN];
        let hex = encode_message(Control::Word(0), 1, 2, 3, 0x20, &data);
        let msg = decode_hex(&hex).unwrap();
        assert_eq!(msg.data.len(), MAX_DATA_LEN);
        assert_eq!(msg.length, 31);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "do not fit a frame")]
    fn oversized_body_is_rejected() {
        let data = [0u8; MAX_DATA_LEN + 1];
        encode_message(Control::Word(0), 1, 2, 3, 0x20, &data);
    }

    #[test]
    fn decode_state_report_vector() {
        let msg = decode_hex("0800C2FF09863276").unwrap();
        assert_eq!(
            msg,
            Message {
                link: false,
                repeater_request: 0,
                length: 8,
                ack_request: 0,
                transmit_count: 0,
                transmit_sequence: 0,
                network_id: 194,
                dest_id: 255,
                src_id: 9,
                msg_id: 134,
                data: vec![0x32],
            }
        );
        assert_eq!(msg.message_type(), Some(MessageType::DeviceStateReport));
    }

    #[test]
    fn round_trip_preserves_fields() {
        let data = [0x10, 0x20, 0x30, 0x40, 0x50];
        let hex = encode_message(Control::Auto { link: true }, 0xC2, 0x11, 0x22, 0x22, &data);
        let bytes = hex::decode(&hex).unwrap();
        let msg = decode(&bytes[..bytes.len() - 1]).unwrap();

        assert!(msg.link);
        assert_eq!(msg.network_id, 0xC2);
        assert_eq!(msg.dest_id, 0x11);
        assert_eq!(msg.src_id, 0x22);
        assert_eq!(msg.msg_id, 0x22);
        assert_eq!(msg.data, data);
        assert_eq!(usize::from(msg.length), bytes.len());
    }

    #[test]
    fn round_trip_at_max_data_len() {
        let data: Vec<u8> = (0..24).collect();
        let hex = encode_message(Control::Auto { link: false }, 1, 2, 3, 0x86, &data);
        let msg = decode_hex(&hex).unwrap();
        assert_eq!(msg.data, data);
        assert_eq!(msg.length, 31);
    }

    #[test]
    fn decode_rejects_short_input() {
        assert_eq!(
            decode(&[0x07, 0x00, 0xC2, 0x01]),
            Err(DecodeError::TooShort { len: 4, min: 6 })
        );
        assert!(matches!(decode_hex(""), Err(DecodeError::TooShort { .. })));
        assert!(matches!(decode_hex("0700C2"), Err(DecodeError::TooShort { .. })));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        // Length field says 9 bytes but only 8 arrive.
        assert_eq!(
            decode_hex("0900C2FF09863276"),
            Err(DecodeError::LengthMismatch {
                declared: 9,
                actual: 8
            })
        );
    }

    #[test]
    fn decode_rejects_bad_hex() {
        assert!(matches!(decode_hex("08ZZC2"), Err(DecodeError::InvalidHex(_))));
        assert!(matches!(decode_hex("080"), Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn control_word_survives_decode() {
        let word = encode_control_word(true, 2, 5, 1, 3);
        let hex = encode_message(Control::Word(word), 1, 2, 3, 0x20, &[]);
        let msg = decode_hex(&hex).unwrap();
        assert_eq!(msg.repeater_request, 2);
        assert_eq!(msg.ack_request, 5);
        assert_eq!(msg.transmit_count, 1);
        assert_eq!(msg.transmit_sequence, 3);
        assert_eq!(msg.control_word() & !LENGTH_MASK, word);
    }

    #[test]
    fn unknown_message_type_is_none() {
        let hex = encode_message(Control::Auto { link: false }, 1, 2, 3, 0x7E, &[]);
        assert_eq!(decode_hex(&hex).unwrap().message_type(), None);
    }
}
