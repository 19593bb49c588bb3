//! Configuration commands.

use super::{Target, hang_up, print_json};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Print the scanner's configuration document.
pub async fn get(target: &Target) -> ClientResult<()> {
    let mut client = target.connect().await?;
    let config = client.get_config().await?;
    hang_up(client).await;
    print_json(&config)
}

/// Merge a partial JSON document into the scanner's configuration.
pub async fn set(target: &Target, document: &str, json: bool) -> ClientResult<()> {
    let patch = parse_patch(document)?;
    let mut client = target.connect().await?;
    let response = client.set_config(patch).await?;
    hang_up(client).await;
    if json {
        return print_json(&response);
    }

    let restarted: Vec<&str> = response
        .get("restarted")
        .and_then(|r| r.as_array())
        .map(|cameras| cameras.iter().filter_map(|c| c.as_str()).collect())
        .unwrap_or_default();
    if restarted.is_empty() {
        println!("Configuration updated.");
    } else {
        println!("Configuration updated, restarted: {}", restarted.join(", "));
    }
    Ok(())
}

/// Show the client configuration file path.
pub fn path() -> ClientResult<()> {
    println!("config: {}", ClientConfig::default_path().display());
    Ok(())
}

fn parse_patch(document: &str) -> ClientResult<serde_json::Value> {
    let patch: serde_json::Value = serde_json::from_str(document)
        .map_err(|e| ClientError::Config(format!("invalid JSON: {}", e)))?;
    if !patch.is_object() {
        return Err(ClientError::Config(
            "configuration update must be a JSON object".into(),
        ));
    }
    Ok(patch)
}
