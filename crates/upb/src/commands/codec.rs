//! Offline frame building and message decoding.

use serde::Serialize;
use upb_proto::{Address, MessageEncoder, Outbound};

use crate::cli::{DecodeArgs, EncodeArgs, EncodeKind, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Frame {
    address: String,
    command: String,
    payload: String,
    /// Exactly what goes on the wire, lead byte and terminator escaped.
    wire: String,
}

fn address(args: &EncodeArgs) -> Result<Address, CliError> {
    match (args.link, args.channel) {
        (true, Some(_)) => Err(CliError::Validation {
            field: "channel".into(),
            reason: "links have no channels".into(),
        }),
        (true, None) => Ok(Address::link(args.network, args.id)),
        (false, Some(ch)) => Ok(Address::device_channel(args.network, args.id, ch, true)),
        (false, None) => Ok(Address::device(args.network, args.id)),
    }
}

pub(crate) fn build(args: &EncodeArgs) -> Result<Outbound, CliError> {
    if !(1..=4).contains(&args.tx_count) {
        return Err(CliError::Validation {
            field: "tx-count".into(),
            reason: format!("{} is outside 1-4", args.tx_count),
        });
    }
    let addr = address(args)?;
    let encoder = MessageEncoder::new(args.tx_count);
    let level = args.level.min(100);

    Ok(match args.kind {
        EncodeKind::Activate => encoder.activate_link(&addr),
        EncodeKind::Deactivate => encoder.deactivate_link(&addr),
        EncodeKind::Goto => encoder.goto(&addr, level, args.rate),
        EncodeKind::FadeStart => encoder.fade_start(&addr, level, args.rate),
        EncodeKind::FadeStop => encoder.fade_stop(&addr),
        EncodeKind::Blink => encoder.blink(&addr, args.rate.unwrap_or(upb_core::rate::MINIMUM_BLINK_RATE)),
        EncodeKind::ReportState => encoder.report_state(&addr),
    })
}

pub fn encode(args: &EncodeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let outbound = build(args)?;
    let frame = Frame {
        address: address(args)?.index(),
        command: outbound.command.to_string(),
        wire: format!("\\x{:02X}{}\\r", outbound.command.lead_byte(), outbound.payload),
        payload: outbound.payload,
    };
    let out = output::render_single(
        &global.output,
        &frame,
        |f| format!("{} {}  {}", f.command, f.address, f.wire),
        |f| f.payload.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub fn decode(args: &DecodeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let hex = args.hex.trim();
    let hex = hex.strip_prefix("PU").unwrap_or(hex);
    let msg = upb_proto::decode_hex(hex)?;

    let out = output::render_single(
        &global.output,
        &msg,
        |m| {
            let kind = m
                .message_type()
                .map_or_else(|| format!("unknown (0x{:02X})", m.msg_id), |t| t.to_string());
            [
                format!("Type:     {kind}"),
                format!("Link:     {}", m.link),
                format!("Network:  {}", m.network_id),
                format!("Dest:     {}", m.dest_id),
                format!("Source:   {}", m.src_id),
                format!("Data:     {:02X?}", m.data),
                format!(
                    "Control:  0x{:04X} (tx {}/{}, ack {}, repeater {})",
                    m.control_word(),
                    m.transmit_sequence + 1,
                    m.transmit_count + 1,
                    m.ack_request,
                    m.repeater_request
                ),
            ]
            .join("\n")
        },
        |m| format!("{:02X}", m.msg_id),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use upb_proto::{MessageType, decode_hex};

    fn args(kind: EncodeKind) -> EncodeArgs {
        EncodeArgs {
            kind,
            network: 194,
            id: 9,
            link: false,
            channel: None,
            level: 100,
            rate: None,
            tx_count: 1,
        }
    }

    #[test]
    fn goto_frame_decodes_back() {
        let mut a = args(EncodeKind::Goto);
        a.level = 50;
        let out = build(&a).unwrap();
        let msg = decode_hex(&out.payload).unwrap();
        assert_eq!(msg.message_type(), Some(MessageType::Goto));
        assert_eq!((msg.network_id, msg.dest_id, msg.src_id), (194, 9, 0xFF));
        assert_eq!(msg.data, vec![50]);
        assert!(!msg.link);
    }

    #[test]
    fn link_activate_sets_the_link_bit() {
        let mut a = args(EncodeKind::Activate);
        a.link = true;
        let msg = decode_hex(&build(&a).unwrap().payload).unwrap();
        assert!(msg.link);
        assert_eq!(msg.message_type(), Some(MessageType::Activate));
    }

    #[test]
    fn multi_channel_goto_carries_the_channel() {
        let mut a = args(EncodeKind::Goto);
        a.channel = Some(1);
        a.level = 30;
        let msg = decode_hex(&build(&a).unwrap().payload).unwrap();
        assert_eq!(msg.data, vec![30, 0xFF, 2]);
    }

    #[test]
    fn rejects_bad_arguments() {
        let mut a = args(EncodeKind::Goto);
        a.tx_count = 5;
        assert!(matches!(build(&a), Err(CliError::Validation { .. })));

        let mut a = args(EncodeKind::Activate);
        a.link = true;
        a.channel = Some(0);
        assert!(matches!(build(&a), Err(CliError::Validation { .. })));
    }
}
