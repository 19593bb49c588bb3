//! Discover command.

use std::time::Duration;

use super::print_json;
use crate::discovery;
use crate::error::ClientResult;

pub async fn run(port: u16, wait: Duration, json: bool) -> ClientResult<()> {
    let found = discovery::discover(port, wait).await?;
    if json {
        let announces: Vec<_> = found.iter().map(|device| &device.announce).collect();
        return print_json(&announces);
    }

    if found.is_empty() {
        println!("No scanner found.");
        return Ok(());
    }
    for device in &found {
        let announce = &device.announce;
        println!(
            "{}  {}  {}  cameras={}  v{}",
            announce.name,
            device.control_addr(),
            announce.device_id,
            announce.cameras,
            announce.version
        );
    }
    Ok(())
}
