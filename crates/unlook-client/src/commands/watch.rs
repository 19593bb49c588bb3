//! Watch command: print frame headers as they arrive.

use super::Target;
use crate::error::ClientResult;
use crate::stream::StreamSubscriber;

pub async fn run(target: &Target, limit: Option<u64>) -> ClientResult<()> {
    let mut subscriber = StreamSubscriber::connect(target.stream, target.timeout).await?;
    let mut received = 0u64;

    while limit.is_none_or(|limit| received < limit) {
        let Some(frame) = subscriber.next_frame().await? else {
            println!("Stream closed.");
            break;
        };
        let header = &frame.header;
        println!(
            "camera={} frame={} t={:.3} format={} resolution={} bytes={}",
            header.camera,
            header.frame,
            header.timestamp,
            header.format,
            header.resolution,
            frame.payload.len()
        );
        received += 1;
    }
    Ok(())
}
