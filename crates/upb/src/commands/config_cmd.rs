//! Config subcommand handlers.

use serde::Serialize;
use tabled::Tabled;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct ProfileView {
    name: String,
    default: bool,
    url: String,
    flags: String,
    upstart_file: Option<String>,
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

/// The settings a profile turns into, for `config resolve`.
#[derive(Serialize)]
struct ResolvedView {
    profile: String,
    url: String,
    flags: String,
    connect_timeout_secs: u64,
    response_timeout_ms: u128,
    heartbeat_secs: Option<u64>,
    upstart_file: Option<String>,
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&upb_config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = upb_config::load_config()?;
            output::print_output(&upb_config::to_toml(&cfg)?, global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = upb_config::load_config()?;
            let active = upb_config::active_profile_name(&cfg, &util::overrides(global));
            let mut views: Vec<ProfileView> = cfg
                .profiles
                .iter()
                .map(|(name, p)| ProfileView {
                    name: name.clone(),
                    default: *name == active,
                    url: p.url.clone(),
                    flags: p.flags.clone(),
                    upstart_file: p.upstart_file.as_ref().map(|f| f.display().to_string()),
                })
                .collect();
            views.sort_by(|a, b| a.name.cmp(&b.name));

            let out = output::render_list(
                &global.output,
                &views,
                |p| ProfileRow {
                    marker: if p.default { "*" } else { "" },
                    name: p.name.clone(),
                    url: p.url.clone(),
                    flags: p.flags.clone(),
                },
                |p| p.name.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Resolve => {
            let cfg = upb_config::load_config()?;
            let overrides = util::overrides(global);
            let (name, profile) = upb_config::resolve_profile(&cfg, &overrides)?;
            let gw = upb_config::profile_to_gateway_config(&profile, &cfg.defaults)?;
            let view = ResolvedView {
                profile: name,
                url: gw.url.to_string(),
                flags: gw.flags.to_string(),
                connect_timeout_secs: gw.connect_timeout.as_secs(),
                response_timeout_ms: gw.response_timeout.as_millis(),
                heartbeat_secs: gw.heartbeat.map(|h| h.as_secs()),
                upstart_file: gw.upstart_file.map(|f| f.display().to_string()),
            };
            let out = output::render_single(
                &global.output,
                &view,
                |v| {
                    [
                        format!("Profile:          {}", v.profile),
                        format!("URL:              {}", v.url),
                        format!("Flags:            {}", v.flags),
                        format!("Connect timeout:  {}s", v.connect_timeout_secs),
                        format!("Response timeout: {}ms", v.response_timeout_ms),
                        format!(
                            "Heartbeat:        {}",
                            v.heartbeat_secs.map_or_else(|| "off".into(), |s| format!("{s}s"))
                        ),
                        format!("UPStart file:     {}", v.upstart_file.as_deref().unwrap_or("-")),
                    ]
                    .join("\n")
                },
                |v| v.url.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
