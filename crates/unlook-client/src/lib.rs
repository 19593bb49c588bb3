//! CLI, control client, discovery client, stream viewer
//!
//! This crate provides the `unlook` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod stream;

pub use cli::Cli;
pub use control::ControlClient;
pub use discovery::FoundDevice;
pub use error::{ClientError, ClientResult};
pub use stream::StreamSubscriber;
