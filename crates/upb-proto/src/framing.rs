// ── Inbound record framing ──
//
// The PIM terminates every record with `\r`. A relay in gateway mode
// terminates with a null byte instead. Bytes are ISO-8859-1, so each
// byte maps to exactly one char.

use bytes::{Buf, BytesMut};

/// Carriage return: the PIM's record terminator.
pub const PIM_TERMINATOR: u8 = b'\r';

/// Null byte: record terminator used by a relaying gateway.
pub const RELAY_TERMINATOR: u8 = 0x00;

/// Accumulates stream bytes and yields complete records.
#[derive(Debug)]
pub struct RecordBuffer {
    buf: BytesMut,
    terminator: u8,
}

impl RecordBuffer {
    pub fn new(terminator: u8) -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            terminator,
        }
    }

    /// Append bytes and drain every complete record. Partial trailing data
    /// stays buffered for the next call. Empty records are skipped.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);

        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == self.terminator) {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if !line.is_empty() {
                records.push(line.iter().copied().map(char::from).collect());
            }
        }
        records
    }

    /// Drop any partial record.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for RecordBuffer {
    fn default() -> Self {
        Self::new(PIM_TERMINATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record() {
        let mut rb = RecordBuffer::default();
        assert_eq!(rb.push(b"PU0800C2FF068600AB\r"), vec!["PU0800C2FF068600AB"]);
        assert_eq!(rb.pending(), 0);
    }

    #[test]
    fn multiple_records_in_one_read() {
        let mut rb = RecordBuffer::default();
        let records = rb.push(b"PU0800C2FF068600AB\rPA\rPK\r");
        assert_eq!(records, vec!["PU0800C2FF068600AB", "PA", "PK"]);
    }

    #[test]
    fn partial_record_completes_on_next_read() {
        let mut rb = RecordBuffer::default();
        assert_eq!(rb.push(b"PU8800C2FF068600AB\rPU0"), vec!["PU8800C2FF068600AB"]);
        assert_eq!(rb.pending(), 3);
        assert_eq!(rb.push(b"800C2FF068600AB\r"), vec!["PU0800C2FF068600AB"]);
    }

    #[test]
    fn relay_mode_splits_on_null() {
        let mut rb = RecordBuffer::new(RELAY_TERMINATOR);
        assert_eq!(rb.push(b"~~PAUSE\0PA\0"), vec!["~~PAUSE", "PA"]);
        assert_eq!(rb.push(b"PA\r"), Vec::<String>::new());
    }

    #[test]
    fn high_bytes_decode_as_latin1() {
        let mut rb = RecordBuffer::default();
        assert_eq!(rb.push(&[b'P', b'U', 0xE9, b'\r']), vec!["PU\u{e9}"]);
    }

    #[test]
    fn empty_records_are_skipped_and_clear_drops_partial() {
        let mut rb = RecordBuffer::default();
        assert!(rb.push(b"\r\r").is_empty());
        rb.push(b"PU08");
        rb.clear();
        assert_eq!(rb.push(b"PA\r"), vec!["PA"]);
    }
}
