use super::{ChannelSink, Error, WindowTracker};

use std::{
    cmp::min,
    fmt,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Weak,
    },
};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::spawn;

mod piped_writer;
pub use piped_writer::PipedWriter;

const OPEN: u8 = 0;
const EOF_SENT: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a [`PipedOutput`].
///
/// `Open -> EofSent` happens at most once, `Closed` is terminal.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OutputState {
    Open,
    /// [`PipedOutput::close`] won the race and is flushing in-flight writes
    /// before signalling EOF.
    EofSent,
    Closed,
}

impl OutputState {
    fn from_u8(state: u8) -> Self {
        match state {
            OPEN => OutputState::Open,
            EOF_SENT => OutputState::EofSent,
            _ => OutputState::Closed,
        }
    }
}

struct OutputShared<S: ChannelSink + 'static> {
    state: AtomicU8,

    sink: Arc<S>,
    window: Arc<WindowTracker>,
    max_packet_size: NonZeroU32,

    /// Held for the whole duration of a write so that the bytes of
    /// concurrent writes are never interleaved, and by `close` so that EOF
    /// is only signalled after every accepted write is forwarded.
    write_lock: Mutex<()>,
}

impl<S: ChannelSink + 'static> fmt::Debug for OutputShared<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputShared")
            .field("state", &OutputState::from_u8(self.state.load(Ordering::Relaxed)))
            .field("window", &self.window)
            .field("max_packet_size", &self.max_packet_size)
            .finish_non_exhaustive()
    }
}

/// Dropping the last handle of an output that was never closed still
/// signals EOF exactly once, on the current tokio runtime.
impl<S: ChannelSink + 'static> Drop for OutputShared<S> {
    fn drop(&mut self) {
        if self
            .state
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let sink = Arc::clone(&self.sink);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(_err) = sink.eof().await {
                        #[cfg(feature = "tracing")]
                        tracing::error!(?_err, "failed to send EOF for dropped output");
                    }
                });
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!(?_err, "output dropped outside of a tokio runtime, EOF not sent");
            }
        }
    }
}

/// Writable half of a channel.
///
/// Bytes are forwarded eagerly to the [`ChannelSink`] in chunks no larger
/// than the remote max packet size and the window available at the time,
/// so writers are suspended as soon as the remote window is exhausted and
/// nothing accumulates locally.
///
/// `PipedOutput` is cheap to clone; all clones share the same state, so
/// any of them may write or close concurrently.
#[derive(Debug)]
pub struct PipedOutput<S: ChannelSink + 'static> {
    shared: Arc<OutputShared<S>>,
}

impl<S: ChannelSink + 'static> Clone for PipedOutput<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: ChannelSink + 'static> PipedOutput<S> {
    /// Create an open output forwarding to `sink`, gated by `window`.
    pub fn new(sink: S, window: Arc<WindowTracker>, max_packet_size: NonZeroU32) -> Self {
        Self::from_arc(Arc::new(sink), window, max_packet_size)
    }

    /// Same as [`PipedOutput::new`], but shares the sink with the caller.
    pub fn from_arc(sink: Arc<S>, window: Arc<WindowTracker>, max_packet_size: NonZeroU32) -> Self {
        Self {
            shared: Arc::new(OutputShared {
                state: AtomicU8::new(OPEN),
                sink,
                window,
                max_packet_size,
                write_lock: Mutex::new(()),
            }),
        }
    }

    fn load_state(&self) -> u8 {
        self.shared.state.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.load_state() == OPEN {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Return true until [`PipedOutput::close`] is called or the channel
    /// is torn down.
    pub fn is_open(&self) -> bool {
        self.load_state() == OPEN
    }

    pub fn state(&self) -> OutputState {
        OutputState::from_u8(self.load_state())
    }

    /// The window tracker gating this output.
    pub fn window(&self) -> &Arc<WindowTracker> {
        &self.shared.window
    }

    pub fn max_packet_size(&self) -> NonZeroU32 {
        self.shared.max_packet_size
    }

    /// Copy `buf` and forward it, see [`PipedOutput::write_bytes`].
    pub async fn write(&self, buf: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        self.write_bytes(Bytes::copy_from_slice(buf)).await
    }

    /// Forward `data` to the sink, suspending whenever the remote window
    /// is exhausted.
    ///
    /// Fails with [`Error::Closed`] once [`PipedOutput::close`] has been
    /// called. A write that was accepted before `close` is always forwarded
    /// in full before EOF is signalled, unless the channel is torn down in
    /// the meantime, in which case it fails with [`Error::Cancelled`].
    ///
    /// # Cancel Safety
    ///
    /// This function is not cancel safe: if it is cancelled, a prefix of
    /// `data` may have been forwarded.
    pub async fn write_bytes(&self, mut data: Bytes) -> Result<(), Error> {
        self.ensure_open()?;

        let _guard = self.shared.write_lock.lock().await;

        // close() might have won the race while we were waiting.
        self.ensure_open()?;

        let max_packet_size = self.shared.max_packet_size.get();

        while !data.is_empty() {
            let len = min(data.len(), max_packet_size as usize) as u32;
            let granted = self.shared.window.consume_up_to(len).await?;

            let chunk = data.split_to(granted as usize);
            self.shared.sink.receive(chunk).await?;
        }

        Ok(())
    }

    /// Wait for every write in flight to be handed to the sink.
    ///
    /// Fails with [`Error::Closed`] once [`PipedOutput::close`] has been
    /// called.
    pub async fn flush(&self) -> Result<(), Error> {
        self.ensure_open()?;

        drop(self.shared.write_lock.lock().await);

        Ok(())
    }

    /// Signal EOF to the sink and close the output.
    ///
    /// Only the first call, among all clones and all threads, signals EOF
    /// and returns the sink's result; every other call returns `Ok(())`
    /// without touching the sink.
    ///
    /// # Cancel Safety
    ///
    /// EOF is signalled by a spawned task, so it is still sent exactly once
    /// if the first call is cancelled, e.g. by a timeout, while it waits
    /// for writes in flight.
    pub async fn close(&self) -> Result<(), Error> {
        if self
            .shared
            .state
            .compare_exchange(OPEN, EOF_SENT, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);

        spawn(async move {
            let res = {
                let _guard = shared.write_lock.lock().await;
                shared.sink.eof().await
            };

            let _ = shared.state.compare_exchange(
                EOF_SENT,
                CLOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );

            res
        })
        .await?
    }

    /// Return an [`tokio::io::AsyncWrite`] adapter over this output.
    pub fn into_writer(self) -> PipedWriter<S> {
        PipedWriter::new(self)
    }

    pub(crate) fn downgrade(&self) -> OutputAbortHandle<S> {
        OutputAbortHandle(Arc::downgrade(&self.shared))
    }
}

/// Lets the channel close the output on teardown without keeping it alive.
#[derive(Debug)]
pub(crate) struct OutputAbortHandle<S: ChannelSink + 'static>(Weak<OutputShared<S>>);

impl<S: ChannelSink + 'static> OutputAbortHandle<S> {
    /// Move the output straight to `Closed`, without signalling EOF.
    ///
    /// Suspended writes are woken by closing the window tracker.
    pub(crate) fn abort(&self) {
        if let Some(shared) = self.0.upgrade() {
            shared.state.store(CLOSED, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Debug, Default)]
    struct Recorder {
        chunks: SyncMutex<Vec<Bytes>>,
        eofs: SyncMutex<usize>,
    }

    #[async_trait]
    impl ChannelSink for Recorder {
        async fn receive(&self, data: Bytes) -> Result<(), Error> {
            self.chunks.lock().push(data);
            Ok(())
        }

        async fn eof(&self) -> Result<(), Error> {
            *self.eofs.lock() += 1;
            Ok(())
        }
    }

    fn output(window: u32, max_packet_size: u32) -> (Arc<Recorder>, PipedOutput<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let output = PipedOutput::from_arc(
            Arc::clone(&recorder),
            Arc::new(WindowTracker::new(window)),
            NonZeroU32::new(max_packet_size).unwrap(),
        );
        (recorder, output)
    }

    #[tokio::test]
    async fn chunks_respect_max_packet_size() {
        let (recorder, output) = output(1024, 4);

        output.write(b"0123456789").await.unwrap();

        let chunks = recorder.chunks.lock().clone();
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"0123"),
                Bytes::from_static(b"4567"),
                Bytes::from_static(b"89"),
            ]
        );
        assert_eq!(output.window().available(), 1024 - 10);
    }

    #[tokio::test]
    async fn close_transitions_to_closed() {
        let (recorder, output) = output(1024, 32);

        assert_eq!(output.state(), OutputState::Open);
        output.close().await.unwrap();
        assert_eq!(output.state(), OutputState::Closed);
        output.close().await.unwrap();

        assert_eq!(*recorder.eofs.lock(), 1);
    }

    #[tokio::test]
    async fn drop_signals_eof_once() {
        let (recorder, output) = output(1024, 32);

        let clone = output.clone();
        drop(output);
        assert_eq!(*recorder.eofs.lock(), 0);
        drop(clone);

        // Let the spawned EOF run.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*recorder.eofs.lock(), 1);
    }

    #[tokio::test]
    async fn drop_after_close_does_not_signal_again() {
        let (recorder, output) = output(1024, 32);

        output.close().await.unwrap();
        drop(output);

        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*recorder.eofs.lock(), 1);
    }

    #[tokio::test]
    async fn abort_skips_eof() {
        let (recorder, output) = output(1024, 32);

        output.downgrade().abort();
        assert!(!output.is_open());
        assert!(matches!(output.write(b"x").await, Err(Error::Closed)));

        output.close().await.unwrap();
        drop(output);

        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*recorder.eofs.lock(), 0);
    }
}
