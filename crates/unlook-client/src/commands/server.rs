//! Server command: runs the scanner daemon in the foreground.
//!
//! Uses the built-in test-pattern cameras; hardware backends plug in through
//! `unlook_server::CameraBackend`.

use std::net::IpAddr;
use std::path::PathBuf;

use tracing::info;

use unlook_server::{DeviceServer, LogSink, ServerConfig, SignalHandler, SyntheticBackend};

use crate::config::{ClientConfig, DeviceSettings};
use crate::error::ClientResult;

/// Overrides given on the command line.
#[derive(Debug, Default)]
pub struct ServerArgs {
    pub state_dir: Option<PathBuf>,
    pub bind: Option<IpAddr>,
    pub no_beacon: bool,
    pub projector: bool,
}

/// Builds the daemon configuration from the config file and the flags.
pub fn server_config(args: &ServerArgs, device: &DeviceSettings, config: &ClientConfig) -> ServerConfig {
    let daemon = &config.server;
    let mut server = match args.state_dir.clone().or_else(|| daemon.state_dir.clone()) {
        Some(dir) => ServerConfig::new(dir),
        None => ServerConfig::default(),
    }
    .with_ports(device.discovery_port, device.command_port, device.stream_port)
    .with_beacon_port(daemon.beacon_port)
    .with_projector(args.projector || daemon.projector);

    if let Some(bind) = args.bind.or(daemon.bind) {
        server = server.with_bind_address(bind);
    }
    if args.no_beacon || !daemon.beacon {
        server = server.with_beacon_interval(None);
    }
    server
}

/// Starts the daemon and blocks until SIGINT/SIGTERM.
pub async fn run(args: &ServerArgs, device: &DeviceSettings, config: &ClientConfig) -> ClientResult<()> {
    let server_config = server_config(args, device, config);
    info!(state_dir = %server_config.state_dir.display(), "Starting scanner daemon");

    let signals = SignalHandler::new();
    signals.spawn_listener();

    let mut backend = SyntheticBackend::default();
    let server = DeviceServer::bind(server_config, &mut backend, Box::new(LogSink)).await?;
    info!(
        name = %server.identity().name,
        device_id = %server.identity().device_id,
        "Scanner daemon started"
    );

    server.run(signals.shutdown_handle()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn flags_take_precedence() {
        let mut config = ClientConfig::default();
        config.server.state_dir = Some(PathBuf::from("/var/lib/unlook"));
        config.server.bind = Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let args = ServerArgs {
            state_dir: Some(PathBuf::from("/tmp/scanner")),
            bind: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            no_beacon: true,
            projector: true,
        };
        let server = server_config(&args, &config.device, &config);
        assert_eq!(server.state_dir, PathBuf::from("/tmp/scanner"));
        assert_eq!(server.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(server.beacon_interval.is_none());
        assert!(server.projector);
        assert_eq!(server.command_port, 5680);
    }

    #[test]
    fn file_settings_apply_without_flags() {
        let mut config = ClientConfig::default();
        config.server.beacon = false;
        config.device.stream_port = 9000;
        let server = server_config(&ServerArgs::default(), &config.device, &config);
        assert!(server.beacon_interval.is_none());
        assert_eq!(server.stream_port, 9000);
        assert!(!server.projector);
    }
}
