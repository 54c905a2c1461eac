//! Device command handlers.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;
use upb_core::{Device, DeviceInfo, Gateway};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Index")]
    index: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Product")]
    product: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Dim")]
    dimmable: String,
    #[tabled(rename = "Level")]
    level: String,
}

/// What the structured formats print for a device.
#[derive(Serialize)]
struct DeviceView {
    index: String,
    #[serde(flatten)]
    info: DeviceInfo,
    status: Option<u8>,
}

impl From<&Arc<Device>> for DeviceView {
    fn from(d: &Arc<Device>) -> Self {
        Self {
            index: d.index(),
            info: d.info().clone(),
            status: d.status(),
        }
    }
}

fn row(d: &DeviceView, color: bool) -> DeviceRow {
    DeviceRow {
        index: d.index.clone(),
        name: d.info.name.clone(),
        product: d.info.product.clone(),
        kind: d.info.kind.clone(),
        dimmable: if d.info.dimmable { "yes" } else { "no" }.into(),
        level: output::level(d.status, color),
    }
}

fn detail(d: &DeviceView) -> String {
    [
        format!("Index:        {}", d.index),
        format!("Name:         {}", d.info.name),
        format!("Manufacturer: {}", d.info.manufacturer),
        format!("Product:      {}", d.info.product),
        format!("Type:         {}", d.info.kind),
        format!("Firmware:     {}", d.info.version),
        format!("Dimmable:     {}", d.info.dimmable),
        format!("Level:        {}", output::level(d.status, false)),
    ]
    .join("\n")
}

fn sorted(gateway: &Gateway) -> Vec<DeviceView> {
    let mut views: Vec<DeviceView> = gateway.devices().snapshot().iter().map(DeviceView::from).collect();
    views.sort_by_key(|v| (v.info.address.unit_id(), v.info.address.channel()));
    views
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(gateway: &Gateway, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = gateway.devices();
    let color = output::should_color(&global.color);

    match args.command {
        DevicesCommand::List { refresh } => {
            if refresh {
                util::run_queued(gateway, global, || gateway.sync()).await?;
            }
            let views = sorted(gateway);
            let out = output::render_list(&global.output, &views, |d| row(d, color), |d| d.index.clone());
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Show { index } => {
            let view = DeviceView::from(&devices.require(&index)?);
            let out = output::render_single(&global.output, &view, detail, |d| d.index.clone());
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::On { index, level, rate } => {
            let device = devices.require(&index)?;
            util::run_queued(gateway, global, || device.turn_on(level, rate)).await
        }

        DevicesCommand::Off { index, rate } => {
            let device = devices.require(&index)?;
            util::run_queued(gateway, global, || device.turn_off(rate)).await
        }

        DevicesCommand::Fade { index, level, rate } => {
            let device = devices.require(&index)?;
            util::run_queued(gateway, global, || device.fade_start(level, rate)).await
        }

        DevicesCommand::Stop { index } => {
            let device = devices.require(&index)?;
            util::run_queued(gateway, global, || device.fade_stop()).await
        }

        DevicesCommand::Blink { index, rate } => {
            let device = devices.require(&index)?;
            util::run_queued(gateway, global, || device.blink(rate)).await
        }

        DevicesCommand::Status { index } => {
            let device = devices.require(&index)?;
            util::run_queued(gateway, global, || device.update_status()).await?;
            let out = output::render_single(
                &global.output,
                &DeviceView::from(&device),
                |d| output::level(d.status, color),
                |d| d.status.map_or_else(String::new, |s| s.to_string()),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
