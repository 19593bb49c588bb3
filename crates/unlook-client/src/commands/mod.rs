//! Subcommand implementations.

pub mod config;
pub mod device;
pub mod discover;
pub mod server;
pub mod watch;

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::config::{ClientConfig, DeviceSettings};
use crate::control::ControlClient;
use crate::discovery;
use crate::error::{ClientError, ClientResult};

/// Where to reach the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub control: SocketAddr,
    pub stream: SocketAddr,
    pub timeout: Duration,
}

impl Target {
    pub async fn connect(&self) -> ClientResult<ControlClient> {
        ControlClient::connect(self.control, self.timeout).await
    }
}

/// Device settings from the config file with command-line overrides applied.
pub fn device_settings(cli: &Cli, config: &ClientConfig) -> DeviceSettings {
    let file = &config.device;
    DeviceSettings {
        host: cli.host.clone().or_else(|| file.host.clone()),
        command_port: cli.command_port.unwrap_or(file.command_port),
        stream_port: cli.stream_port.unwrap_or(file.stream_port),
        discovery_port: cli.discovery_port.unwrap_or(file.discovery_port),
        timeout: cli.timeout.unwrap_or(file.timeout),
    }
}

/// Resolves the scanner address, running discovery when no host is set.
pub async fn resolve(settings: &DeviceSettings) -> ClientResult<Target> {
    let timeout = settings.timeout();

    let Some(host) = &settings.host else {
        let found = discovery::discover(settings.discovery_port, timeout).await?;
        let device = found.into_iter().next().ok_or(ClientError::NotFound)?;
        info!(
            device_id = %device.announce.device_id,
            host = %device.host(),
            "using discovered scanner"
        );
        return Ok(Target {
            control: device.control_addr(),
            stream: SocketAddr::new(device.host(), settings.stream_port),
            timeout,
        });
    };

    let ip = tokio::net::lookup_host((host.as_str(), settings.command_port))
        .await
        .map_err(|e| ClientError::Connection(format!("cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| ClientError::Connection(format!("no address for {}", host)))?
        .ip();
    Ok(Target {
        control: SocketAddr::new(ip, settings.command_port),
        stream: SocketAddr::new(ip, settings.stream_port),
        timeout,
    })
}

/// Ends the control session; a scanner that does not know DISCONNECT is
/// only logged.
pub(crate) async fn hang_up(client: ControlClient) {
    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "disconnect not acknowledged");
    }
}

/// Prints any serializable value as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> ClientResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ClientError::Protocol(format!("failed to render JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}
