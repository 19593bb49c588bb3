//! Command-line interface definition.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use unlook_core::StreamFormat;

/// unlook - control an UnLook dual-camera scanner
#[derive(Debug, Parser)]
#[command(name = "unlook")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "UNLOOK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (repeat for more)
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print raw JSON responses
    #[arg(long)]
    pub json: bool,

    // --- Connection flags ---
    /// Scanner host (skips discovery)
    #[arg(long, env = "UNLOOK_HOST")]
    pub host: Option<String>,

    /// Control channel port
    #[arg(long, env = "UNLOOK_COMMAND_PORT")]
    pub command_port: Option<u16>,

    /// Frame stream port
    #[arg(long, env = "UNLOOK_STREAM_PORT")]
    pub stream_port: Option<u16>,

    /// Discovery port
    #[arg(long, env = "UNLOOK_DISCOVERY_PORT")]
    pub discovery_port: Option<u16>,

    /// Request timeout in seconds
    #[arg(long, env = "UNLOOK_TIMEOUT")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List scanners answering on the local network
    Discover {
        /// Seconds to wait for answers
        #[arg(long, default_value = "2")]
        wait: u64,
    },

    /// Check that the scanner answers
    Ping,

    /// Show scanner status
    Status,

    /// Start streaming
    Start {
        /// Stream format for this session (h264, jpeg, raw)
        #[arg(long)]
        format: Option<StreamFormat>,

        /// Encoder quality for this session
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        quality: Option<u8>,
    },

    /// Stop streaming
    Stop,

    /// Capture one still from every enabled camera
    Capture,

    /// Device configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Subscribe to the stream and print frame headers
    Watch {
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },

    /// Run the scanner daemon in the foreground
    Server {
        /// Directory for the device id and configuration
        #[arg(long, env = "UNLOOK_STATE_DIR")]
        state_dir: Option<PathBuf>,

        /// Address to bind
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Do not broadcast announce beacons
        #[arg(long)]
        no_beacon: bool,

        /// A structured-light projector is attached
        #[arg(long)]
        projector: bool,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the scanner configuration
    Get,

    /// Merge a JSON document into the scanner configuration
    Set {
        /// Partial configuration, e.g. '{"camera":{"left":{"framerate":15}}}'
        json: String,
    },

    /// Show the client configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_options() {
        let cli = Cli::try_parse_from(["unlook", "start", "--format", "mjpeg", "--quality", "80"])
            .unwrap();
        match cli.command {
            Command::Start { format, quality } => {
                assert_eq!(format, Some(StreamFormat::Jpeg));
                assert_eq!(quality, Some(80));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(Cli::try_parse_from(["unlook", "start", "--quality", "101"]).is_err());
    }

    #[test]
    fn counts_verbosity() {
        let cli = Cli::try_parse_from(["unlook", "-vv", "--host", "10.0.0.2", "ping"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.host.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn parses_config_set() {
        let cli = Cli::try_parse_from(["unlook", "config", "set", r#"{"stream":{"quality":30}}"#])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Set { .. }
            }
        ));
    }

    #[test]
    fn parses_server_flags() {
        let cli = Cli::try_parse_from([
            "unlook",
            "server",
            "--bind",
            "127.0.0.1",
            "--no-beacon",
            "--projector",
        ])
        .unwrap();
        match cli.command {
            Command::Server {
                bind,
                no_beacon,
                projector,
                ..
            } => {
                assert_eq!(bind, Some("127.0.0.1".parse().unwrap()));
                assert!(no_beacon);
                assert!(projector);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
