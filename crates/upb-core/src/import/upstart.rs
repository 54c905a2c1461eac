// ── UPStart export parser ──
//
// One record per line, comma separated, record type in field 0:
//
//   0   file overview, network id in field 4
//   2   link: id, name
//   3   device: id, manufacturer, product, firmware, kind, channels, room, name
//   8   channel: channel, device id, dimmable
//   4   link member: channel, device id, link id, preset
//   99  rename: device index, name
//
// Records apply in file order, so a channel or rename record only affects
// devices defined above it.

use std::path::Path;
use std::str::FromStr;

use tracing::{debug, error, info, warn};
use upb_proto::Address;

use crate::catalog;
use crate::error::CoreError;
use crate::model::{DeviceInfo, LinkInfo, LinkMember};
use crate::store::{Devices, Links};

/// Link id UPStart uses for "not in a link".
const NO_LINK: u8 = 255;

/// Everything read from one export, not yet registered anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub network_id: Option<u8>,
    pub devices: Vec<DeviceInfo>,
    pub links: Vec<LinkInfo>,
    /// `(link index, member)` pairs.
    pub members: Vec<(String, LinkMember)>,
}

impl Topology {
    /// Register everything with the given registries. Members of links
    /// the export never defined are skipped.
    pub fn apply(&self, devices: &Devices, links: &Links) {
        for info in &self.devices {
            devices.add(info.clone());
        }
        for info in &self.links {
            links.add(info.clone());
        }
        for (link, member) in &self.members {
            if let Err(e) = links.add_member(link, *member) {
                warn!(error = %e, device = %member.device, "skipping link member");
            }
        }
    }
}

/// Read `path` and register its contents. Failures are logged and reported
/// as `false`; nothing is registered from a file that fails to parse.
pub fn load(path: &Path, devices: &Devices, links: &Links) -> bool {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot open UPStart file");
            return false;
        }
    };
    let topology = match parse(&contents) {
        Ok(t) => t,
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot parse UPStart file");
            return false;
        }
    };
    topology.apply(devices, links);
    info!(
        path = %path.display(),
        network_id = ?topology.network_id,
        devices = topology.devices.len(),
        links = topology.links.len(),
        "UPStart file imported"
    );
    true
}

/// Parse the text of an export.
pub fn parse(contents: &str) -> Result<Topology, CoreError> {
    let mut topo = Topology::default();

    for (n, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = Record {
            line: n + 1,
            fields: line.split(',').collect(),
        };
        match record.fields[0] {
            "0" => topo.network_id = Some(record.num(4)?),
            "2" => {
                let net = record.network(&topo)?;
                topo.links.push(LinkInfo {
                    address: Address::link(net, record.num(1)?),
                    name: record.text(2)?.to_owned(),
                });
            }
            "3" => {
                let net = record.network(&topo)?;
                topo.devices.extend(device_definition(net, &record)?);
            }
            "8" => {
                let net = record.network(&topo)?;
                let index = device_index(net, record.num(2)?, record.num(1)?);
                let dimmable = record.text(3)? == "1";
                if let Some(info) = topo.devices.iter_mut().find(|d| d.address.index() == index) {
                    info.dimmable = dimmable;
                }
            }
            "4" => {
                let net = record.network(&topo)?;
                let link_id: u8 = record.num(4)?;
                if link_id == NO_LINK {
                    continue;
                }
                // Members are matched by index, the multi-channel bit is irrelevant.
                let device = Address::device_channel(net, record.num(3)?, record.num(1)?, false);
                topo.members.push((
                    Address::link(net, link_id).index(),
                    LinkMember {
                        device,
                        preset: record.num(5)?,
                    },
                ));
            }
            "99" => {
                let index = record.text(1)?;
                match topo.devices.iter_mut().find(|d| d.address.index() == index) {
                    Some(info) => info.name = record.text(2)?.to_owned(),
                    None => debug!(index, "rename for unknown device"),
                }
            }
            _ => {}
        }
    }

    Ok(topo)
}

fn device_index(network_id: u8, unit_id: u8, channel: u8) -> String {
    Address::device_channel(network_id, unit_id, channel, false).index()
}

/// One entry per channel.
fn device_definition(net: u8, record: &Record<'_>) -> Result<Vec<DeviceInfo>, CoreError> {
    let unit: u8 = record.num(1)?;
    let channels: u8 = record.num(8)?;
    let multi_channel = channels > 1;

    let mfr = record.text(3)?;
    let prod = record.text(4)?;
    let (product, kind) = match catalog::product(mfr, prod) {
        Some((name, kind)) => (name.to_owned(), kind.to_owned()),
        None => (format!("{mfr}/{prod}"), record.text(7)?.to_owned()),
    };
    let manufacturer = catalog::manufacturer(mfr).unwrap_or(mfr).to_owned();
    let version = format!("{}.{}", record.text(5)?, record.text(6)?);
    let base_name = format!("{} {}", record.text(11)?, record.text(12)?);

    Ok((0..channels)
        .map(|channel| DeviceInfo {
            address: Address::device_channel(net, unit, channel, multi_channel),
            name: if multi_channel {
                format!("{base_name} {channel}")
            } else {
                base_name.clone()
            },
            manufacturer: manufacturer.clone(),
            product: product.clone(),
            kind: kind.clone(),
            version: version.clone(),
            dimmable: false,
        })
        .collect())
}

struct Record<'a> {
    line: usize,
    fields: Vec<&'a str>,
}

impl Record<'_> {
    fn error(&self, message: impl std::fmt::Display) -> CoreError {
        CoreError::Import {
            message: format!("line {}: {message}", self.line),
        }
    }

    fn text(&self, i: usize) -> Result<&str, CoreError> {
        self.fields
            .get(i)
            .map(|f| f.trim())
            .ok_or_else(|| self.error(format_args!("missing field {i}")))
    }

    fn num<T: FromStr>(&self, i: usize) -> Result<T, CoreError> {
        let text = self.text(i)?;
        text.parse()
            .map_err(|_| self.error(format_args!("field {i} is not a valid number: {text:?}")))
    }

    fn network(&self, topo: &Topology) -> Result<u8, CoreError> {
        topo.network_id
            .ok_or_else(|| self.error("record before the file overview record"))
    }
}
