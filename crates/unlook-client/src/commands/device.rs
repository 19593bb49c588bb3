//! Control commands: ping, status, start, stop, capture.

use std::time::Instant;

use unlook_core::{StreamFormat, format_duration, unix_timestamp};
use unlook_protocol::{Response, StreamOptions};

use super::{Target, hang_up, print_json};
use crate::error::ClientResult;

pub async fn ping(target: &Target, json: bool) -> ClientResult<()> {
    let mut client = target.connect().await?;
    let sent = Instant::now();
    let response = client.ping(unix_timestamp()).await?;
    let elapsed = sent.elapsed();
    let addr = client.addr();
    hang_up(client).await;
    if json {
        return print_json(&response);
    }
    println!(
        "pong from {} in {:.1} ms",
        addr,
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}

pub async fn status(target: &Target, json: bool) -> ClientResult<()> {
    let mut client = target.connect().await?;
    let response = client.status().await?;
    hang_up(client).await;
    if json {
        return print_json(&response);
    }

    let state = response.get("state").cloned().unwrap_or_default();
    let field = |key: &str| state.get(key).cloned().unwrap_or_default();
    println!("status:    {}", field("status").as_str().unwrap_or("unknown"));
    println!("cameras:   {}", field("cameras_connected"));
    println!("clients:   {}", field("clients_connected"));
    println!(
        "streaming: {}",
        if field("streaming").as_bool().unwrap_or(false) {
            "yes"
        } else {
            "no"
        }
    );
    println!(
        "uptime:    {}",
        format_duration(field("uptime").as_f64().unwrap_or(0.0))
    );
    Ok(())
}

pub async fn start(
    target: &Target,
    format: Option<StreamFormat>,
    quality: Option<u8>,
    json: bool,
) -> ClientResult<()> {
    let mut options = StreamOptions::default();
    if let Some(format) = format {
        options = options.with_format(format);
    }
    if let Some(quality) = quality {
        options = options.with_quality(quality);
    }

    let mut client = target.connect().await?;
    let response = client.start_stream(options).await?;
    hang_up(client).await;
    report(&response, json)
}

pub async fn stop(target: &Target, json: bool) -> ClientResult<()> {
    let mut client = target.connect().await?;
    let response = client.stop_stream().await?;
    hang_up(client).await;
    report(&response, json)
}

pub async fn capture(target: &Target, json: bool) -> ClientResult<()> {
    let mut client = target.connect().await?;
    let response = client.capture().await?;
    hang_up(client).await;
    if json {
        return print_json(&response);
    }
    println!("captured");
    Ok(())
}

fn report(response: &Response, json: bool) -> ClientResult<()> {
    if json {
        return print_json(response);
    }
    match response.get("message").and_then(|m| m.as_str()) {
        Some(message) => println!("{}", message),
        None => println!("ok"),
    }
    Ok(())
}
