//! Threaded client against scripted connections

mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use mjpeg_rs::{ClientConfig, ClientState, Error, FrameBuffer, MjpegClient};

use common::{end_of_stream, frame, jpeg, ok_response, refused, stream, ScriptedConnector};

fn config() -> ClientConfig {
    ClientConfig::new("http://camera.test/stream")
        .reconnect_interval(Duration::from_millis(10))
        .read_timeout(Duration::from_secs(1))
}

/// Drain the ready queue until the close sentinel
fn drain(client: &MjpegClient<ScriptedConnector>) -> Vec<FrameBuffer> {
    let mut frames = Vec::new();
    while let Some(frame) = client.dequeue_ready() {
        frames.push(frame);
    }
    frames
}

#[test]
fn test_frames_delivered_in_order() {
    let body = stream(&[
        frame(&jpeg(1, 100)),
        frame(&jpeg(2, 200)),
        frame(&jpeg(3, 300)),
        end_of_stream(),
    ]);
    let connector = ScriptedConnector::new(vec![ok_response(body)]);
    let attempts = connector.attempts();

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    for buffer in client.request_buffers(1024, 4) {
        client.enqueue_free(buffer);
    }
    client.open().unwrap();

    let frames = drain(&client);
    assert_eq!(frames.len(), 3);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sequence(), i as u64);
        assert_eq!(frame.used(), 100 * (i + 1));
        assert_eq!(frame.data()[..2], [0xFF, 0xD8]);
        assert_eq!(frame.data()[2], i as u8 + 1);
    }

    client.close();
    let stats = client.stats();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.discarded_frames, 0);
    assert_eq!(stats.reconnects, 0);
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_overrun_counted_once() {
    let mut parts: Vec<_> = (0..5).map(|i| frame(&jpeg(i, 64))).collect();
    parts.push(end_of_stream());
    let connector = ScriptedConnector::new(vec![ok_response(stream(&parts))]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    client.open().unwrap();

    assert!(drain(&client).is_empty());
    client.close();

    let stats = client.stats();
    assert_eq!(stats.frames, 5);
    assert_eq!(stats.discarded_frames, 5);
    assert_eq!(stats.overruns, 1);
    assert!(stats.in_overrun);
}

#[test]
fn test_frame_fits_larger_buffer() {
    let body = stream(&[frame(&jpeg(7, 1000)), end_of_stream()]);
    let connector = ScriptedConnector::new(vec![ok_response(body)]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    client.enqueue_free(FrameBuffer::new(2000));
    client.open().unwrap();

    let frames = drain(&client);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].used(), 1000);
    assert_eq!(frames[0].capacity(), 2000);
    client.close();
}

#[test]
fn test_frame_too_large_is_discarded_and_buffer_kept() {
    // A second frame after the oversize one proves the stream stayed aligned
    let body = stream(&[frame(&jpeg(7, 1000)), frame(&jpeg(8, 400)), end_of_stream()]);
    let connector = ScriptedConnector::new(vec![ok_response(body)]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    client.enqueue_free(FrameBuffer::new(500));
    client.open().unwrap();

    let frames = drain(&client);
    client.close();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].used(), 400);
    assert_eq!(frames[0].sequence(), 1);

    let stats = client.stats();
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.discarded_frames, 1);
    assert_eq!(stats.overruns, 0);
}

#[test]
fn test_delivered_plus_discarded_equals_frames() {
    let mut parts: Vec<_> = (0..5).map(|i| frame(&jpeg(i, 1000))).collect();
    parts.push(end_of_stream());
    let connector = ScriptedConnector::new(vec![ok_response(stream(&parts))]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    // Free list is LIFO: the large buffer is taken first
    client.enqueue_free(FrameBuffer::new(500));
    client.enqueue_free(FrameBuffer::new(2000));
    client.open().unwrap();

    let delivered = drain(&client).len() as u64;
    client.close();

    let stats = client.stats();
    assert_eq!(stats.frames, 5);
    assert_eq!(delivered, 1);
    assert_eq!(stats.delivered_frames(), delivered);
    assert_eq!(delivered + stats.discarded_frames, stats.frames);
}

#[test]
fn test_end_of_stream_reconnects_once() {
    let first = stream(&[frame(&jpeg(1, 10)), end_of_stream()]);
    let second = stream(&[frame(&jpeg(2, 10)), frame(&jpeg(3, 10)), end_of_stream()]);
    let connector = ScriptedConnector::new(vec![ok_response(first), ok_response(second)]);
    let attempts = connector.attempts();

    let mut client = MjpegClient::with_connector(config().reconnect_limit(1), connector);
    for buffer in client.request_buffers(64, 4) {
        client.enqueue_free(buffer);
    }
    client.open().unwrap();

    let frames = drain(&client);
    client.close();

    // Sequence numbers restart with each connection
    let sequences: Vec<_> = frames.iter().map(FrameBuffer::sequence).collect();
    assert_eq!(sequences, [0, 0, 1]);
    assert_eq!(frames[2].data()[2], 3);

    assert_eq!(client.stats().reconnects, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_reconnect_limit_stops_client() {
    let connector = ScriptedConnector::new(Vec::new());
    let attempts = connector.attempts();

    let mut client = MjpegClient::with_connector(config().reconnect_limit(3), connector);
    client.open().unwrap();

    // Sentinel arrives without close() once the limit is reached
    assert!(client.dequeue_ready().is_none());
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(client.stats().reconnects, 3);

    client.close();
    assert!(client
        .dequeue_ready_timeout(Duration::from_millis(20))
        .is_none());
}

#[test]
fn test_malformed_header_recovers_on_reconnect() {
    let broken = b"--frame\r\nContent-Type image/jpeg\r\n\r\n".to_vec();
    let good = stream(&[frame(&jpeg(9, 32)), end_of_stream()]);
    let connector = ScriptedConnector::new(vec![ok_response(broken), ok_response(good)]);
    let attempts = connector.attempts();

    let mut client = MjpegClient::with_connector(config().reconnect_limit(1), connector);
    for buffer in client.request_buffers(64, 2) {
        client.enqueue_free(buffer);
    }
    client.open().unwrap();

    let frames = drain(&client);
    client.close();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].used(), 32);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(client.stats().reconnects, 1);
    // Buffer held during the failed read went back to the pool
    assert_eq!(client.stats().free_buffers, 1);
}

#[test]
fn test_non_200_response_is_retried() {
    let mut rejected = ok_response(Vec::new()).unwrap();
    rejected.status = 404;
    let good = stream(&[frame(&jpeg(1, 16)), end_of_stream()]);
    let connector = ScriptedConnector::new(vec![Ok(rejected), ok_response(good)]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(1), connector);
    client.enqueue_free(FrameBuffer::new(64));
    client.open().unwrap();

    assert_eq!(drain(&client).len(), 1);
    client.close();
}

#[test]
fn test_close_unblocks_consumer() {
    // Every attempt fails and the retry delay is long, so the loop idles
    let connector = ScriptedConnector::new(vec![refused()]);
    let config = config().reconnect_interval(Duration::from_secs(60));

    let mut client = MjpegClient::with_connector(config, connector);
    let pool = client.pool();
    client.open().unwrap();

    let consumer = thread::spawn(move || pool.consume());
    thread::sleep(Duration::from_millis(50));

    client.close();
    assert!(consumer.join().unwrap().is_none());
    assert!(!client.is_open());
    assert_eq!(client.state(), ClientState::Closed);
}

#[test]
fn test_open_twice_fails_and_reopen_after_close() {
    let connector = ScriptedConnector::new(Vec::new());
    let config = config().reconnect_interval(Duration::from_secs(60));

    let mut client = MjpegClient::with_connector(config, connector);
    client.open().unwrap();
    assert!(matches!(client.open(), Err(Error::AlreadyOpen)));

    client.close();
    assert!(client.dequeue_ready().is_none());

    client.open().unwrap();
    client.close();
    assert!(client.dequeue_ready().is_none());
}

#[test]
fn test_stats_report() {
    let connector = ScriptedConnector::new(Vec::new());
    let client = MjpegClient::with_connector(config(), connector);
    client.enqueue_free(FrameBuffer::new(16));

    let report = client.stats().to_string();
    assert!(report.starts_with("MJPEGClient:"));
    assert!(report.contains("http://camera.test/stream"));
    assert!(report.contains("Buffer queue    : 1"));
}

#[test]
fn test_reopen_after_reconnect_limit() {
    let good = stream(&[frame(&jpeg(4, 16)), end_of_stream()]);
    let connector = ScriptedConnector::new(vec![refused(), ok_response(good)]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    client.enqueue_free(FrameBuffer::new(64));
    client.open().unwrap();

    // The loop gave up on its own; the cause stays readable
    assert!(client.dequeue_ready().is_none());
    assert_eq!(client.state(), ClientState::Closed);
    assert!(matches!(
        client.last_error().as_deref(),
        Some(Error::Connection(_))
    ));

    client.open().unwrap();
    let frames = drain(&client);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data()[2], 4);
    assert!(client.last_error().is_none());
    client.close();
}

#[test]
fn test_close_mid_stream_queues_nothing_after_sentinel() {
    for _ in 0..5 {
        let body = stream(&vec![frame(&jpeg(1, 64)); 20_000]);
        let connector = ScriptedConnector::new(vec![ok_response(body)]);

        let mut client = MjpegClient::with_connector(config(), connector);
        for buffer in client.request_buffers(128, 4) {
            client.enqueue_free(buffer);
        }
        let pool = client.pool();
        client.open().unwrap();

        let consumer = thread::spawn(move || {
            let mut received = 0u64;
            while let Some(frame) = pool.consume() {
                received += 1;
                pool.release(frame);
            }
            received
        });
        thread::sleep(Duration::from_millis(2));

        client.close();
        let received = consumer.join().unwrap();

        let pool = client.pool();
        assert_eq!(pool.ready_len(), 0);
        assert_eq!(pool.free_len(), 4);
        assert_eq!(received, client.stats().delivered_frames());
    }
}

#[test]
fn test_connect_error_not_reported_as_read_timeout() {
    let would_block = Err(Error::Io(std::io::Error::from(
        std::io::ErrorKind::WouldBlock,
    )));
    let connector = ScriptedConnector::new(vec![would_block]);

    let mut client = MjpegClient::with_connector(config().reconnect_limit(0), connector);
    client.open().unwrap();

    assert!(client.dequeue_ready().is_none());
    assert!(matches!(client.last_error().as_deref(), Some(Error::Io(_))));
    client.close();
}
