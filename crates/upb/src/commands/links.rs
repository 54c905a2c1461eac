//! Link command handlers.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;
use upb_core::{Gateway, Link, LinkChange, LinkMember};

use crate::cli::{GlobalOpts, LinksArgs, LinksCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "Index")]
    index: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Members")]
    members: usize,
    #[tabled(rename = "Last")]
    last: String,
}

#[derive(Serialize)]
struct MemberView {
    device: String,
    name: Option<String>,
    preset: u8,
}

#[derive(Serialize)]
struct LinkView {
    index: String,
    name: String,
    members: Vec<MemberView>,
    last_change: Option<LinkChange>,
}

impl LinkView {
    fn new(gateway: &Gateway, link: &Arc<Link>) -> Self {
        let member_view = |m: &LinkMember| {
            let device = m.device.index();
            MemberView {
                name: gateway.devices().get(&device).map(|d| d.name().to_owned()),
                device,
                preset: m.preset,
            }
        };
        Self {
            index: link.index(),
            name: link.name().to_owned(),
            members: link.members().iter().map(member_view).collect(),
            last_change: link.last_change(),
        }
    }
}

fn last(change: Option<&LinkChange>) -> String {
    change.map_or_else(
        || "-".into(),
        |c| format!("{} at {}", c.command, c.timestamp.format("%H:%M:%S")),
    )
}

fn detail(l: &LinkView) -> String {
    let mut lines = vec![
        format!("Index:   {}", l.index),
        format!("Name:    {}", l.name),
        format!("Last:    {}", last(l.last_change.as_ref())),
        "Members:".to_owned(),
    ];
    for m in &l.members {
        let name = m.name.as_deref().unwrap_or("(unknown)");
        lines.push(format!("  {:<12} {:<24} preset {}", m.device, name, m.preset));
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(gateway: &Gateway, args: LinksArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let links = gateway.links();

    match args.command {
        LinksCommand::List => {
            let mut views: Vec<LinkView> = links.snapshot().iter().map(|l| LinkView::new(gateway, l)).collect();
            views.sort_by(|a, b| a.index.cmp(&b.index));
            let out = output::render_list(
                &global.output,
                &views,
                |l| LinkRow {
                    index: l.index.clone(),
                    name: l.name.clone(),
                    members: l.members.len(),
                    last: last(l.last_change.as_ref()),
                },
                |l| l.index.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        LinksCommand::Show { index } => {
            let view = LinkView::new(gateway, &links.require(&index)?);
            let out = output::render_single(&global.output, &view, detail, |l| l.index.clone());
            output::print_output(&out, global.quiet);
            Ok(())
        }

        LinksCommand::Activate { index } => {
            let link = links.require(&index)?;
            util::run_queued(gateway, global, || link.activate()).await
        }

        LinksCommand::Deactivate { index } => {
            let link = links.require(&index)?;
            util::run_queued(gateway, global, || link.deactivate()).await
        }

        LinksCommand::Goto { index, level, rate } => {
            let link = links.require(&index)?;
            util::run_queued(gateway, global, || link.goto(level, rate)).await
        }

        LinksCommand::Fade { index, level, rate } => {
            let link = links.require(&index)?;
            util::run_queued(gateway, global, || link.fade_start(level, rate)).await
        }

        LinksCommand::Stop { index } => {
            let link = links.require(&index)?;
            util::run_queued(gateway, global, || link.fade_stop()).await
        }

        LinksCommand::Blink { index, rate } => {
            let link = links.require(&index)?;
            util::run_queued(gateway, global, || link.blink(rate)).await
        }
    }
}
