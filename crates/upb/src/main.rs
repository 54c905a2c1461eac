mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use upb_core::{FlagValue, Gateway, GatewayConfig};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a PIM
        Command::Config(args) => commands::config_cmd::handle(&args, &cli.global),

        // Pure codec helpers
        Command::Encode(args) => commands::codec::encode(&args, &cli.global),
        Command::Decode(args) => commands::codec::decode(&args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "upb", &mut std::io::stdout());
            Ok(())
        }

        // Everything else works on a gateway
        cmd => {
            let mut gateway_config = build_gateway_config(&cli.global)?;
            // One-shot commands never want the full refresh; `devices list
            // --refresh` asks for it explicitly.
            if !matches!(cmd, Command::Monitor(_)) {
                gateway_config.flags.set("no_sync", FlagValue::Bool(true));
            }
            let gateway = Gateway::new(gateway_config);
            if let Some(path) = &cli.global.upstart {
                commands::util::import_upstart(&gateway, path)?;
            }

            tracing::debug!(command = ?cmd, "dispatching command");
            commands::dispatch(cmd, &gateway, &cli.global).await
        }
    }
}

/// Build a `GatewayConfig` from the config file, profile, and CLI overrides.
fn build_gateway_config(global: &cli::GlobalOpts) -> Result<GatewayConfig, CliError> {
    let cfg = upb_config::load_config_or_default();
    let mut config = upb_config::resolve(&cfg, &commands::util::overrides(global))?;

    // An explicit --upstart is imported by the caller so failures surface.
    if global.upstart.is_some() {
        config.upstart_file = None;
    }
    Ok(config)
}
