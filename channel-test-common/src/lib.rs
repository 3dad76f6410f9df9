use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use openssh_channel_pipe::extensions::ExtendedCommandTransport;
use openssh_channel_pipe::{ChannelSink, Error, PipedInputSender};

/// Sink recording everything it receives.
///
/// A second `eof` fails with [`Error::InvalidResponse`] and bumps
/// `eof_calls` anyway, so tests can assert it never happened.
#[derive(Debug, Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<Bytes>>,
    received: AtomicUsize,
    eof_calls: AtomicUsize,

    /// Simulated latency of the write path.
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Chunks in the order they were received.
    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().clone()
    }

    /// Concatenation of all chunks.
    pub fn data(&self) -> Vec<u8> {
        self.chunks.lock().iter().flat_map(|chunk| chunk.iter().copied()).collect()
    }

    /// Total number of bytes received.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn eof_calls(&self) -> usize {
        self.eof_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn receive(&self, data: Bytes) -> Result<(), Error> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.received.fetch_add(data.len(), Ordering::SeqCst);
        self.chunks.lock().push(data);
        Ok(())
    }

    async fn eof(&self) -> Result<(), Error> {
        if self.eof_calls.fetch_add(1, Ordering::SeqCst) != 0 {
            return Err(Error::InvalidResponse(&"Multiple EOF calls"));
        }
        Ok(())
    }
}

/// Sink whose `receive` suspends until the test lets it through.
#[derive(Debug)]
pub struct GatedSink {
    gate: Semaphore,
    inner: Arc<RecordingSink>,
}

impl GatedSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            inner: RecordingSink::new(),
        })
    }

    /// Let `n` more chunks through.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn recorder(&self) -> &RecordingSink {
        &self.inner
    }
}

#[async_trait]
impl ChannelSink for GatedSink {
    async fn receive(&self, data: Bytes) -> Result<(), Error> {
        self.gate
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?
            .forget();
        self.inner.receive(data).await
    }

    async fn eof(&self) -> Result<(), Error> {
        self.inner.eof().await
    }
}

/// Sink delivering everything straight to the input of another channel,
/// as if the wire was in between.
#[derive(Debug, Clone)]
pub struct LoopbackSink(pub PipedInputSender);

#[async_trait]
impl ChannelSink for LoopbackSink {
    async fn receive(&self, data: Bytes) -> Result<(), Error> {
        self.0.receive(data)
    }

    async fn eof(&self) -> Result<(), Error> {
        self.0.eof();
        Ok(())
    }
}

/// Transport answering every request with a canned reply.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    requests: Mutex<Vec<Bytes>>,
    replies: Mutex<Vec<Bytes>>,
}

impl ScriptedTransport {
    /// Reply to the n-th request with `replies[n]`.
    pub fn new(replies: Vec<Bytes>) -> Self {
        let mut replies = replies;
        replies.reverse();

        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies),
        }
    }

    /// Requests in the order they were sent.
    pub fn requests(&self) -> Vec<Bytes> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ExtendedCommandTransport for ScriptedTransport {
    type Handle = Bytes;

    async fn send_extended_command(&self, buffer: Bytes) -> Result<Bytes, Error> {
        self.requests.lock().push(buffer);
        self.replies
            .lock()
            .pop()
            .ok_or(Error::InvalidResponse(&"no reply scripted"))
    }

    async fn receive(&self, handle: Bytes) -> Result<Bytes, Error> {
        Ok(handle)
    }
}

/// Build an ssh `string`.
pub fn ssh_string(bytes: &[u8]) -> Bytes {
    let mut buffer = BytesMut::with_capacity(4 + bytes.len());
    buffer.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buffer.extend_from_slice(bytes);
    buffer.freeze()
}

/// Concatenate `parts`.
pub fn concat(parts: &[&[u8]]) -> Bytes {
    let mut buffer = BytesMut::new();
    for part in parts {
        buffer.extend_from_slice(part);
    }
    buffer.freeze()
}
