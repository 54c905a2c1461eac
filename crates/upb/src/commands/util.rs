//! Shared helpers for command handlers.

use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use upb_core::{CoreError, Gateway, GatewayEvent};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Profile overrides taken from the global flags.
pub fn overrides(global: &GlobalOpts) -> upb_config::Overrides {
    upb_config::Overrides {
        profile: global.profile.clone(),
        url: global.url.clone(),
        flags: global.flags.clone(),
    }
}

/// Import an export named on the command line, failing loudly.
pub fn import_upstart(gateway: &Gateway, path: &Path) -> Result<(), CliError> {
    let contents = std::fs::read_to_string(path)?;
    let topology = upb_core::import::parse(&contents)?;
    topology.apply(gateway.devices(), gateway.links());
    tracing::info!(
        path = %path.display(),
        devices = topology.devices.len(),
        links = topology.links.len(),
        "UPStart file imported"
    );
    Ok(())
}

fn timeout(global: &GlobalOpts) -> Duration {
    Duration::from_secs(global.timeout)
}

/// Start the session and wait for the PIM to come up.
pub async fn connect(gateway: &Gateway, global: &GlobalOpts) -> Result<(), CliError> {
    gateway.connect().await?;
    if let Err(e) = gateway.wait_connected(timeout(global)).await {
        gateway.disconnect().await;
        return Err(e.into());
    }
    Ok(())
}

/// Connect, queue whatever `send` queues, wait for the queue to drain and
/// disconnect. A write that ran out of retries fails the command.
pub async fn run_queued(
    gateway: &Gateway,
    global: &GlobalOpts,
    send: impl FnOnce() -> Result<(), CoreError>,
) -> Result<(), CliError> {
    connect(gateway, global).await?;
    let mut events = gateway.events();

    let outcome = match send() {
        Ok(()) => tokio::time::timeout(timeout(global), gateway.wait_idle())
            .await
            .map_err(|_| CliError::Timeout {
                target: gateway.config().url.to_string(),
            }),
        Err(e) => Err(e.into()),
    };
    gateway.disconnect().await;
    outcome?;

    loop {
        match events.try_recv() {
            Ok(event) => {
                if let GatewayEvent::Timeout {
                    payload, device, ..
                } = &*event
                {
                    return Err(CliError::Timeout {
                        target: device.clone().unwrap_or_else(|| payload.clone()),
                    });
                }
            }
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => return Ok(()),
        }
    }
}
