//! Stream statistics with the async client
//!
//! Run with: cargo run --example async_stream_stats URL
//!
//! Streams until Ctrl-C, printing the client counters every five seconds.
//! Set `RUST_LOG=mjpeg_rs=debug` to see reconnects and frame rate updates.

use std::time::Duration;

use mjpeg_rs::{AsyncMjpegClient, ClientConfig};

const BUFFER_SIZE: usize = 1024 * 1024;
const BUFFER_COUNT: usize = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=info".parse()?)
                .add_directive("async_stream_stats=info".parse()?),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .ok_or("usage: async_stream_stats URL")?;

    let mut client = AsyncMjpegClient::new(ClientConfig::new(url))?;
    for buffer in client.request_buffers(BUFFER_SIZE, BUFFER_COUNT) {
        client.enqueue_free(buffer);
    }

    let pool = client.pool();
    let consumer = tokio::spawn(async move {
        let mut frames = 0u64;
        while let Some(frame) = pool.consume_async().await {
            frames += 1;
            tracing::trace!(sequence = frame.sequence(), length = frame.used(), "Frame");
            pool.release(frame);
        }
        frames
    });

    let mut errors = client.subscribe_errors();
    client.open()?;

    let mut report = tokio::time::interval(Duration::from_secs(5));
    report.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => println!("{}", client.stats()),
            changed = errors.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(error) = errors.borrow_and_update().clone() {
                    tracing::warn!(error = %error, "Stream error");
                }
            }
        }
    }

    client.close().await;
    let frames = consumer.await?;
    println!("{}", client.stats());
    println!("Consumed {} frames", frames);

    Ok(())
}
