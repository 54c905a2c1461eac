//! Live event stream.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use upb_core::{Gateway, GatewayEvent};
use upb_proto::Message;

use crate::cli::{GlobalOpts, MonitorArgs, OutputFormat};
use crate::error::CliError;
use crate::output;

fn describe(gateway: &Gateway, msg: &Message) -> String {
    let kind = msg
        .message_type()
        .map_or_else(|| format!("0x{:02X}", msg.msg_id), |t| t.to_string());
    let target = if msg.link {
        let index = upb_proto::Address::link(msg.network_id, msg.dest_id).index();
        let name = gateway.links().get(&index).map(|l| l.name().to_owned());
        format!("link {index}{}", name.map(|n| format!(" ({n})")).unwrap_or_default())
    } else {
        format!("unit {}_{}", msg.network_id, msg.dest_id)
    };
    format!("{kind:<18} {target} from {} data {:02X?}", msg.src_id, msg.data)
}

fn as_json(event: &GatewayEvent) -> serde_json::Value {
    match event {
        GatewayEvent::Connected => json!({ "event": "connected" }),
        GatewayEvent::Disconnected { reason } => json!({ "event": "disconnected", "reason": reason }),
        GatewayEvent::Message(msg) => json!({ "event": "message", "message": msg }),
        GatewayEvent::Timeout { payload, device, .. } => {
            json!({ "event": "timeout", "payload": payload, "device": device })
        }
        GatewayEvent::Control(signal) => json!({ "event": "control", "signal": format!("{signal:?}") }),
        GatewayEvent::Unrecognized(record) => json!({ "event": "unrecognized", "record": record }),
    }
}

fn as_text(gateway: &Gateway, event: &GatewayEvent) -> String {
    let now = chrono::Local::now().format("%H:%M:%S%.3f");
    let body = match event {
        GatewayEvent::Connected => format!("connected to {}", gateway.config().url),
        GatewayEvent::Disconnected { reason } => format!("disconnected: {reason}"),
        GatewayEvent::Message(msg) => describe(gateway, msg),
        GatewayEvent::Timeout { payload, device, .. } => match device {
            Some(name) => format!("no response from {name} ({payload})"),
            None => format!("no response to {payload}"),
        },
        GatewayEvent::Control(signal) => format!("relay signal {signal:?}"),
        GatewayEvent::Unrecognized(record) => format!("unrecognized record {record:?}"),
    };
    format!("{now}  {body}")
}

fn render(gateway: &Gateway, format: &OutputFormat, event: &Arc<GatewayEvent>) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => as_json(event).to_string(),
        OutputFormat::Yaml => output::render_single(format, &as_json(event), |_| String::new(), |_| String::new()),
        OutputFormat::Table | OutputFormat::Plain => as_text(gateway, event),
    }
}

pub async fn handle(gateway: &Gateway, args: &MonitorArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut events = gateway.events();
    gateway.connect().await?;

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    output::print_output(&render(gateway, &global.output, &event), global.quiet);
                    if matches!(*event, GatewayEvent::Message(_)) {
                        seen += 1;
                        if args.count.is_some_and(|n| seen >= n) {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "monitor fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    gateway.disconnect().await;
    Ok(())
}
