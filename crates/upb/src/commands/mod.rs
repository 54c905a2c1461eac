//! Command dispatch: bridges CLI args -> gateway operations -> output formatting.

pub mod codec;
pub mod config_cmd;
pub mod devices;
pub mod links;
pub mod monitor;
pub mod util;

use upb_core::Gateway;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a gateway-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, gateway: &Gateway, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(gateway, args, global).await,
        Command::Links(args) => links::handle(gateway, args, global).await,
        Command::Monitor(args) => monitor::handle(gateway, &args, global).await,
        // Config, codec and completions are handled before dispatch
        Command::Config(_) | Command::Encode(_) | Command::Decode(_) | Command::Completions(_) => {
            unreachable!()
        }
    }
}
