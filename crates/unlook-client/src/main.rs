//! unlook CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use unlook_client::cli::{Cli, Command, ConfigAction};
use unlook_client::commands::{self, server::ServerArgs};
use unlook_client::config::ClientConfig;
use unlook_client::error::{ClientError, ClientResult};
use unlook_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = match cli.command {
        Command::Server { .. } => TracingConfig::daemon(),
        _ => TracingConfig::cli(cli.verbose),
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path).map_err(ClientError::Config)?,
        None => ClientConfig::load().map_err(ClientError::Config)?,
    };
    let settings = commands::device_settings(&cli, &config);

    match cli.command {
        Command::Discover { wait } => {
            commands::discover::run(settings.discovery_port, Duration::from_secs(wait), cli.json)
                .await
        }
        Command::Config {
            action: ConfigAction::Path,
        } => commands::config::path(),
        Command::Server {
            state_dir,
            bind,
            no_beacon,
            projector,
        } => {
            let args = ServerArgs {
                state_dir,
                bind,
                no_beacon,
                projector,
            };
            commands::server::run(&args, &settings, &config).await
        }
        command => {
            let target = commands::resolve(&settings).await?;
            match command {
                Command::Ping => commands::device::ping(&target, cli.json).await,
                Command::Status => commands::device::status(&target, cli.json).await,
                Command::Start { format, quality } => {
                    commands::device::start(&target, format, quality, cli.json).await
                }
                Command::Stop => commands::device::stop(&target, cli.json).await,
                Command::Capture => commands::device::capture(&target, cli.json).await,
                Command::Config {
                    action: ConfigAction::Get,
                } => commands::config::get(&target).await,
                Command::Config {
                    action: ConfigAction::Set { json },
                } => commands::config::set(&target, &json, cli.json).await,
                Command::Watch { frames } => commands::watch::run(&target, frames).await,
                Command::Discover { .. }
                | Command::Server { .. }
                | Command::Config {
                    action: ConfigAction::Path,
                } => Ok(()),
            }
        }
    }
}
