use channel_test_common::{GatedSink, RecordingSink};

use openssh_channel_pipe::{
    ChannelSink, Error, OutputState, PipedOutput, WindowTracker, OPENSSH_DEFAULT_MAX_PACKET_SIZE,
};

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};

use pretty_assertions::assert_eq;

const SHORT: Duration = Duration::from_millis(50);
const LONG: Duration = Duration::from_secs(5);

fn open<S: ChannelSink + 'static>(
    sink: Arc<S>,
    window: u32,
    max_packet_size: u32,
) -> PipedOutput<S> {
    PipedOutput::from_arc(
        sink,
        Arc::new(WindowTracker::new(window)),
        NonZeroU32::new(max_packet_size).unwrap(),
    )
}

fn ample<S: ChannelSink + 'static>(sink: Arc<S>) -> PipedOutput<S> {
    open(sink, 1 << 20, OPENSSH_DEFAULT_MAX_PACKET_SIZE.get())
}

#[tokio::test]
async fn write_then_close() {
    let sink = RecordingSink::new();
    let stream = ample(Arc::clone(&sink));

    assert!(stream.is_open(), "Stream not marked as initially open");
    assert_eq!(sink.received(), 0, "Unexpected initial receive count");

    let b = b"write_then_close";
    stream.write(b).await.unwrap();
    assert!(stream.is_open(), "Stream not marked as still open after write data");
    assert_eq!(sink.received(), b.len(), "Mismatched write data count");

    stream.close().await.unwrap();
    assert!(!stream.is_open(), "Stream still marked as open after close");
    assert_eq!(sink.eof_calls(), 1, "Sink EOF not called on close");

    assert!(
        matches!(stream.write(b).await, Err(Error::Closed)),
        "Unexpected write success after close"
    );
    assert!(
        matches!(stream.flush().await, Err(Error::Closed)),
        "Unexpected flush success after close"
    );
}

#[tokio::test]
async fn two_writes_one_eof() {
    let sink = RecordingSink::new();
    let stream = ample(Arc::clone(&sink));

    stream.write(b"abc").await.unwrap();
    stream.write(b"de").await.unwrap();
    stream.flush().await.unwrap();
    stream.close().await.unwrap();

    assert_eq!(sink.received(), 5);
    assert_eq!(
        sink.chunks(),
        vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")]
    );
    assert_eq!(sink.eof_calls(), 1);

    assert!(matches!(stream.write(b"x").await, Err(Error::Closed)));

    // Closing again is fine and does not signal EOF again.
    stream.close().await.unwrap();
    assert_eq!(sink.eof_calls(), 1);
    assert_eq!(stream.state(), OutputState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_close_signals_eof_once() {
    let sink = RecordingSink::with_delay(Duration::from_millis(5));
    let stream = ample(Arc::clone(&sink));

    stream.write(b"payload").await.unwrap();

    let closers: Vec<_> = (0..16)
        .map(|_| {
            let stream = stream.clone();
            tokio::spawn(async move { stream.close().await })
        })
        .collect();

    for closer in closers {
        closer.await.unwrap().unwrap();
    }

    assert_eq!(sink.eof_calls(), 1);
    assert!(!stream.is_open());
    assert!(matches!(stream.write(b"x").await, Err(Error::Closed)));
    assert!(matches!(stream.flush().await, Err(Error::Closed)));
}

#[tokio::test]
async fn writes_are_split_by_window() {
    let sink = RecordingSink::new();
    let stream = open(Arc::clone(&sink), 4, 3);
    let window = Arc::clone(stream.window());

    let writer = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.write(b"0123456789").await })
    };

    sleep(SHORT).await;
    assert!(!writer.is_finished());
    assert_eq!(sink.data(), b"0123");
    assert_eq!(window.available(), 0);

    window.release(2).unwrap();
    sleep(SHORT).await;
    assert_eq!(sink.data(), b"012345");

    window.release(4).unwrap();
    timeout(LONG, writer).await.unwrap().unwrap().unwrap();

    assert_eq!(sink.data(), b"0123456789");
    assert!(sink.chunks().iter().all(|chunk| chunk.len() <= 3));
    assert_eq!(window.available(), 0);
}

#[tokio::test]
async fn close_waits_for_accepted_write() {
    let sink = GatedSink::new();
    let stream = ample(Arc::clone(&sink));

    let writer = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.write(b"accepted").await })
    };
    sleep(SHORT).await;

    let closer = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.close().await })
    };
    sleep(SHORT).await;

    // close() won, so nothing new is accepted, but EOF waits for the
    // write already in flight.
    assert_eq!(stream.state(), OutputState::EofSent);
    assert!(matches!(stream.write(b"late").await, Err(Error::Closed)));
    assert_eq!(sink.recorder().eof_calls(), 0);

    sink.open(1);

    timeout(LONG, writer).await.unwrap().unwrap().unwrap();
    timeout(LONG, closer).await.unwrap().unwrap().unwrap();

    assert_eq!(sink.recorder().data(), b"accepted");
    assert_eq!(sink.recorder().eof_calls(), 1);
    assert_eq!(stream.state(), OutputState::Closed);
}

#[tokio::test]
async fn cancelled_close_still_signals_eof() {
    let sink = GatedSink::new();
    let stream = ample(Arc::clone(&sink));

    let writer = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.write(b"in flight").await })
    };
    sleep(SHORT).await;

    // Give up on close() while the write still holds the lock.
    assert!(timeout(Duration::from_millis(20), stream.close())
        .await
        .is_err());
    assert_eq!(sink.recorder().eof_calls(), 0);

    sink.open(1);
    timeout(LONG, writer).await.unwrap().unwrap().unwrap();

    timeout(LONG, async {
        while sink.recorder().eof_calls() == 0 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    stream.close().await.unwrap();
    drop(stream);
    sleep(SHORT).await;

    assert_eq!(sink.recorder().data(), b"in flight");
    assert_eq!(sink.recorder().eof_calls(), 1);
}

#[tokio::test]
async fn closed_window_cancels_writer() {
    let sink = RecordingSink::new();
    let stream = open(Arc::clone(&sink), 2, 32);
    let window = Arc::clone(stream.window());

    let writer = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.write(b"too long").await })
    };

    sleep(SHORT).await;
    window.close();

    let res = timeout(LONG, writer).await.unwrap().unwrap();
    assert!(matches!(res, Err(Error::Cancelled)));
    assert_eq!(sink.data(), b"to");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_are_not_interleaved() {
    let sink = RecordingSink::new();
    let stream = open(Arc::clone(&sink), 1 << 20, 7);

    let a = vec![b'a'; 1000];
    let b = vec![b'b'; 1000];

    let writers: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|data| {
            let stream = stream.clone();
            tokio::spawn(async move { stream.write(&data).await })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let data = sink.data();
    assert_eq!(data.len(), 2000);
    assert!(data == [a.clone(), b.clone()].concat() || data == [b, a].concat());
}

#[tokio::test]
async fn async_write_adapter() {
    let sink = RecordingSink::new();
    let mut writer = open(Arc::clone(&sink), 1 << 20, 4).into_writer();

    writer.write_all(b"hello, ").await.unwrap();
    writer.write_all(b"world").await.unwrap();
    writer.flush().await.unwrap();
    assert_eq!(sink.data(), b"hello, world");

    writer.shutdown().await.unwrap();
    assert_eq!(sink.eof_calls(), 1);
    assert!(!writer.get_ref().is_open());

    let err = writer.flush().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);

    let err = writer.write_all(b"!").await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}

#[tokio::test]
async fn dropping_the_last_handle_signals_eof() {
    let sink = RecordingSink::new();
    let stream = ample(Arc::clone(&sink));

    stream.write(b"scoped").await.unwrap();
    drop(stream);

    timeout(LONG, async {
        while sink.eof_calls() == 0 {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(sink.data(), b"scoped");
    assert_eq!(sink.eof_calls(), 1);
}
