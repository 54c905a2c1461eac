#![allow(clippy::unwrap_used)]

// Gateway sessions over in-memory duplex streams standing in for a PIM.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
    duplex,
};
use tokio::sync::broadcast;
use tokio::time::timeout;
use upb_core::{
    ConnectionState, Connector, DeviceInfo, Gateway, GatewayConfig, GatewayEvent, LinkInfo,
    LinkMember,
};
use upb_proto::{Address, Control, MessageEncoder, MessageType, PimStream, encode_message};

const WAIT: Duration = Duration::from_secs(5);

// ── Fake PIM ─────────────────────────────────────────────────────────

/// Hands out one prepared stream per connect; refuses once they run out.
#[derive(Default)]
struct DuplexConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl DuplexConnector {
    fn push(&self) -> FakePim {
        let (ours, theirs) = duplex(4096);
        self.streams.lock().unwrap().push_back(ours);
        let (read, write) = tokio::io::split(theirs);
        FakePim {
            reader: BufReader::new(read),
            writer: write,
        }
    }
}

impl Connector for DuplexConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PimStream>, upb_proto::Error>> {
        let next = self.streams.lock().unwrap().pop_front();
        Box::pin(async move {
            next.map(|s| Box::new(s) as Box<dyn PimStream>)
                .ok_or_else(|| {
                    upb_proto::Error::from(io::Error::from(io::ErrorKind::ConnectionRefused))
                })
        })
    }
}

struct FakePim {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakePim {
    /// Next frame from the host, terminator included.
    async fn frame(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        timeout(WAIT, self.reader.read_until(b'\r', &mut buf))
            .await
            .expect("host sent nothing")
            .unwrap();
        buf
    }

    async fn reply(&mut self, record: &str) {
        self.writer.write_all(record.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r").await.unwrap();
    }

    /// Answer the two start-of-session register writes.
    async fn handshake(&mut self) {
        assert_eq!(self.frame().await, b"\x120001FF\r");
        self.reply("PA").await;
        assert_eq!(self.frame().await, b"\x1770028E\r");
        self.reply("PA").await;
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn config(flags: &str) -> GatewayConfig {
    let mut config = GatewayConfig::new("tcp://pim.test".parse().unwrap(), flags.parse().unwrap());
    config.heartbeat = None;
    config.reconnect.initial_delay = Duration::from_millis(10);
    config
}

fn gateway(config: GatewayConfig) -> (Gateway, Arc<DuplexConnector>) {
    let connector = Arc::new(DuplexConnector::default());
    let gateway = Gateway::with_connector(config, Arc::clone(&connector) as Arc<dyn Connector>);
    (gateway, connector)
}

fn hall() -> DeviceInfo {
    let mut info = DeviceInfo::new(Address::device(194, 9), "Hall");
    info.dimmable = true;
    info
}

fn report_state_frame(unit: u8) -> Vec<u8> {
    let payload = MessageEncoder::default()
        .report_state(&Address::device(194, unit))
        .payload;
    format!("\x14{payload}\r").into_bytes()
}

fn update(link: bool, dest: u8, src: u8, kind: MessageType, data: &[u8]) -> String {
    format!(
        "PU{}",
        encode_message(Control::Auto { link }, 194, dest, src, kind.code(), data)
    )
}

async fn next_event(
    events: &mut broadcast::Receiver<Arc<GatewayEvent>>,
    wanted: impl Fn(&GatewayEvent) -> bool,
) -> Arc<GatewayEvent> {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event never arrived")
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_start_probes_then_syncs_devices() {
    let (gw, connector) = gateway(config(""));
    let device = gw.devices().add(hall());
    let mut pim = connector.push();

    gw.connect().await.unwrap();
    pim.handshake().await;
    assert_eq!(pim.frame().await, report_state_frame(9));

    pim.reply("PA").await;
    pim.reply(&update(false, 0xFF, 9, MessageType::DeviceStateReport, &[64])).await;

    let mut status = device.watch_status();
    timeout(WAIT, status.wait_for(|s| *s == Some(64))).await.unwrap().unwrap();
    timeout(WAIT, gw.wait_idle()).await.unwrap();

    gw.disconnect().await;
    assert_eq!(*gw.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn no_sync_skips_state_requests() {
    let (gw, connector) = gateway(config("no_sync"));
    gw.devices().add(hall());
    let mut pim = connector.push();

    gw.connect().await.unwrap();
    gw.wait_connected(WAIT).await.unwrap();
    pim.handshake().await;

    gw.devices().require("194_9_0").unwrap().turn_on(50, None).unwrap();
    let frame = pim.frame().await;
    let payload = std::str::from_utf8(&frame[1..frame.len() - 1]).unwrap();
    let msg = upb_proto::decode_hex(payload).unwrap();
    assert_eq!(msg.message_type(), Some(MessageType::Goto));
    assert_eq!(msg.data, vec![50]);

    gw.disconnect().await;
}

#[tokio::test]
async fn inbound_link_activation_updates_members() {
    let (gw, connector) = gateway(config("no_sync"));
    let hall = gw.devices().add(hall());
    gw.links().add(LinkInfo {
        address: Address::link(194, 5),
        name: "Evening".into(),
    });
    gw.links()
        .add_member("194_5", LinkMember { device: Address::device(194, 9), preset: 40 })
        .unwrap();
    let mut events = gw.events();
    let mut pim = connector.push();

    gw.connect().await.unwrap();
    pim.handshake().await;
    pim.reply(&update(true, 5, 1, MessageType::Activate, &[])).await;

    next_event(&mut events, |e| matches!(e, GatewayEvent::Message(_))).await;
    assert_eq!(hall.status(), Some(40));
    assert!(gw.links().require("194_5").unwrap().last_change().is_some());

    gw.disconnect().await;
}

#[tokio::test]
async fn duplicate_updates_are_dispatched_once() {
    let (gw, connector) = gateway(config("no_sync"));
    let mut events = gw.events();
    let mut pim = connector.push();

    gw.connect().await.unwrap();
    pim.handshake().await;
    let report = update(false, 0xFF, 9, MessageType::DeviceStateReport, &[10]);
    pim.reply(&report).await;
    pim.reply(&report).await;
    pim.reply("~~HEARTBEAT").await;

    next_event(&mut events, |e| matches!(e, GatewayEvent::Message(_))).await;
    let next = next_event(&mut events, |e| !matches!(e, GatewayEvent::Connected)).await;
    assert!(matches!(*next, GatewayEvent::Control(_)));

    gw.disconnect().await;
}

#[tokio::test]
async fn unanswered_report_names_the_device() {
    let mut cfg = config("");
    cfg.response_timeout = Duration::from_millis(50);
    cfg.retries = 0;
    let (gw, connector) = gateway(cfg);
    gw.devices().add(hall());
    let mut events = gw.events();
    let mut pim = connector.push();

    gw.connect().await.unwrap();
    pim.handshake().await;
    assert_eq!(pim.frame().await, report_state_frame(9));
    pim.reply("PA").await;

    let event = next_event(&mut events, |e| matches!(e, GatewayEvent::Timeout { .. })).await;
    let GatewayEvent::Timeout { device, .. } = &*event else {
        unreachable!()
    };
    assert_eq!(device.as_deref(), Some("Hall"));

    gw.disconnect().await;
}

#[tokio::test]
async fn relay_pause_and_resume() {
    let (gw, connector) = gateway(config(""));
    gw.devices().add(hall());
    let mut state = gw.connection_state();
    let mut pim = connector.push();

    gw.connect().await.unwrap();
    pim.handshake().await;
    assert_eq!(pim.frame().await, report_state_frame(9));

    pim.reply("~~PAUSE").await;
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Paused)).await.unwrap().unwrap();

    pim.reply("~~RESUME").await;
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected)).await.unwrap().unwrap();
    // The paused queue was dropped; resuming asks again.
    assert_eq!(pim.frame().await, report_state_frame(9));

    gw.disconnect().await;
}

#[tokio::test]
async fn lost_stream_reconnects_and_probes_again() {
    let (gw, connector) = gateway(config("no_sync"));
    let mut events = gw.events();
    let mut first = connector.push();
    let mut second = connector.push();

    gw.connect().await.unwrap();
    first.handshake().await;
    drop(first);

    next_event(&mut events, |e| matches!(e, GatewayEvent::Disconnected { .. })).await;
    second.handshake().await;
    next_event(&mut events, |e| matches!(e, GatewayEvent::Connected)).await;

    gw.disconnect().await;
    // The receiver survives, so the gateway can be started again.
    let mut third = connector.push();
    gw.connect().await.unwrap();
    third.handshake().await;
    gw.disconnect().await;
}

#[tokio::test]
async fn silent_link_is_probed_then_dropped() {
    let mut cfg = config("no_sync");
    cfg.heartbeat = Some(Duration::from_millis(100));
    cfg.response_timeout = Duration::from_millis(50);
    cfg.retries = 0;
    let (gw, connector) = gateway(cfg);
    let mut events = gw.events();
    let mut pim = connector.push();
    let mut next = connector.push();

    gw.connect().await.unwrap();
    pim.handshake().await;
    // Idle long enough to trigger the probe, which goes unanswered.
    assert_eq!(pim.frame().await, b"\x120001FF\r");

    let event = next_event(&mut events, |e| matches!(e, GatewayEvent::Disconnected { .. })).await;
    assert!(matches!(&*event, GatewayEvent::Disconnected { reason } if reason.contains("heartbeat")));
    next.handshake().await;

    gw.disconnect().await;
}

#[tokio::test]
async fn dropping_every_handle_stops_the_session() {
    let (gw, connector) = gateway(config("no_sync"));
    let mut pim = connector.push();
    let mut state = gw.connection_state();
    let spare = gw.clone();

    gw.connect().await.unwrap();
    pim.handshake().await;
    drop(gw);
    // One live clone is enough to keep the link up.
    spare.wait_connected(WAIT).await.unwrap();
    drop(spare);

    // The stream is closed rather than left to reconnect forever.
    let mut rest = Vec::new();
    timeout(WAIT, pim.reader.read_to_end(&mut rest))
        .await
        .expect("stream left open")
        .unwrap();
    // The task lets go of the gateway once it ends.
    timeout(WAIT, async { while state.changed().await.is_ok() {} })
        .await
        .expect("session task still running");
}
