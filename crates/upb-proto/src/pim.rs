// ── PIM record vocabulary ──
//
// Outbound frames start with a single command character. Inbound records
// start with a 2-character response prefix ("PA", "PU", ...), or with
// "~~" for control tokens injected by a relaying intermediary.

use strum::Display;

/// Lead character of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PimCommand {
    /// Transmit a UPB message on the powerline.
    TransmitMessage,
    /// Read PIM registers (also used as the session and heartbeat probe).
    ReadRegisters,
    /// Write PIM registers.
    WriteRegisters,
}

impl PimCommand {
    pub const fn lead_byte(self) -> u8 {
        match self {
            Self::TransmitMessage => 0x14,
            Self::ReadRegisters => 0x12,
            Self::WriteRegisters => 0x17,
        }
    }
}

/// Response kinds the PIM reports, keyed by their 2-character prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PimResponse {
    /// `PA`: the PIM accepted the frame.
    Accept,
    /// `PB`: the PIM is busy; try again shortly.
    Busy,
    /// `PE`: the PIM rejected the frame.
    Error,
    /// `PK`: the addressed device acknowledged.
    Ack,
    /// `PN`: the addressed device did not acknowledge.
    Nack,
    /// `PU`: a UPB message seen on the powerline.
    Update,
    /// `PR`: register contents, reply to a register read.
    RegisterReport,
}

impl PimResponse {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "PA" => Self::Accept,
            "PB" => Self::Busy,
            "PE" => Self::Error,
            "PK" => Self::Ack,
            "PN" => Self::Nack,
            "PU" => Self::Update,
            "PR" => Self::RegisterReport,
            _ => return None,
        })
    }

    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Accept => "PA",
            Self::Busy => "PB",
            Self::Error => "PE",
            Self::Ack => "PK",
            Self::Nack => "PN",
            Self::Update => "PU",
            Self::RegisterReport => "PR",
        }
    }
}

/// Out-of-band tokens from a relay sitting between host and PIM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    Pause,
    Resume,
    Heartbeat,
    SerialDisconnected,
    Other(String),
}

impl ControlSignal {
    fn parse(token: &str) -> Self {
        match token {
            "PAUSE" => Self::Pause,
            "RESUME" => Self::Resume,
            "HEARTBEAT" => Self::Heartbeat,
            "SERIAL_DISCONNECTED" => Self::SerialDisconnected,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// One classified inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A PIM response with whatever followed the prefix.
    Pim { response: PimResponse, body: String },
    /// A `~~` control token.
    Control(ControlSignal),
    /// Anything else; handed to the owner untouched.
    Unrecognized(String),
}

impl Record {
    /// Classify a record by its 2-character prefix.
    pub fn classify(line: &str) -> Self {
        if let Some(token) = line.strip_prefix("~~") {
            return Self::Control(ControlSignal::parse(token.trim()));
        }
        let Some((prefix, body)) = line.split_at_checked(2) else {
            return Self::Unrecognized(line.to_owned());
        };
        match PimResponse::from_prefix(prefix) {
            Some(response) => Self::Pim {
                response,
                body: body.to_owned(),
            },
            None => Self::Unrecognized(line.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pim_prefixes() {
        for response in [
            PimResponse::Accept,
            PimResponse::Busy,
            PimResponse::Error,
            PimResponse::Ack,
            PimResponse::Nack,
            PimResponse::Update,
            PimResponse::RegisterReport,
        ] {
            let line = format!("{}1234", response.prefix());
            assert_eq!(
                Record::classify(&line),
                Record::Pim {
                    response,
                    body: "1234".into()
                }
            );
        }
    }

    #[test]
    fn classifies_control_tokens() {
        assert_eq!(Record::classify("~~PAUSE"), Record::Control(ControlSignal::Pause));
        assert_eq!(Record::classify("~~RESUME"), Record::Control(ControlSignal::Resume));
        assert_eq!(
            Record::classify("~~HEARTBEAT"),
            Record::Control(ControlSignal::Heartbeat)
        );
        assert_eq!(
            Record::classify("~~SERIAL_DISCONNECTED"),
            Record::Control(ControlSignal::SerialDisconnected)
        );
        assert_eq!(
            Record::classify("~~WHATEVER"),
            Record::Control(ControlSignal::Other("WHATEVER".into()))
        );
    }

    #[test]
    fn short_and_unknown_lines_are_unrecognized() {
        assert_eq!(Record::classify("P"), Record::Unrecognized("P".into()));
        assert_eq!(Record::classify("XY00"), Record::Unrecognized("XY00".into()));
        assert_eq!(Record::classify(""), Record::Unrecognized(String::new()));
    }

    #[test]
    fn lead_bytes() {
        assert_eq!(PimCommand::TransmitMessage.lead_byte(), 0x14);
        assert_eq!(PimCommand::ReadRegisters.lead_byte(), 0x12);
        assert_eq!(PimCommand::WriteRegisters.lead_byte(), 0x17);
    }
}
