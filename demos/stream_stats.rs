//! Stream statistics with the threaded client
//!
//! Run with: cargo run --example stream_stats URL [SECONDS]
//!
//! Examples:
//!   cargo run --example stream_stats http://192.168.1.10:8080/video
//!   cargo run --example stream_stats http://localhost:8081/stream 60
//!
//! Frames are consumed on a separate thread and returned to the pool right
//! away; the main thread prints the client counters every few seconds.

use std::thread;
use std::time::{Duration, Instant};

use mjpeg_rs::{ClientConfig, MjpegClient};

const BUFFER_SIZE: usize = 1024 * 1024;
const BUFFER_COUNT: usize = 8;
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=info".parse()?)
                .add_directive("stream_stats=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .ok_or("usage: stream_stats URL [SECONDS]")?;
    let run_for = Duration::from_secs(args.next().map(|s| s.parse()).transpose()?.unwrap_or(30));

    let config = ClientConfig::new(url)
        .log_interval(REPORT_INTERVAL)
        .reconnect_interval(Duration::from_secs(2));
    let mut client = MjpegClient::new(config)?;

    for buffer in client.request_buffers(BUFFER_SIZE, BUFFER_COUNT) {
        client.enqueue_free(buffer);
    }

    let pool = client.pool();
    let consumer = thread::spawn(move || {
        let mut bytes = 0u64;
        let mut frames = 0u64;
        while let Some(frame) = pool.consume() {
            bytes += frame.used() as u64;
            frames += 1;
            tracing::trace!(sequence = frame.sequence(), length = frame.used(), "Frame");
            pool.release(frame);
        }
        (frames, bytes)
    });

    client.open()?;

    let started = Instant::now();
    while started.elapsed() < run_for {
        thread::sleep(REPORT_INTERVAL.min(run_for.saturating_sub(started.elapsed())));
        println!("{}", client.stats());
        if let Some(error) = client.last_error() {
            println!("  Last error      : {}", error);
        }
    }

    client.close();
    let (frames, bytes) = consumer.join().map_err(|_| "consumer thread panicked")?;
    println!("Consumed {} frames ({} bytes)", frames, bytes);

    Ok(())
}
