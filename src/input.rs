use super::{ChannelOptions, Error};

use std::{
    collections::VecDeque,
    future::poll_fn,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::Notify;

#[derive(Debug)]
struct InputState {
    buffers: VecDeque<Bytes>,
    buffered: usize,

    /// Local window left, the peer must not send more than this.
    window_left: usize,
    /// Bytes read since the last window adjustment was queued.
    consumed: u32,
    /// Window adjustment queued for the session.
    pending_adjust: u32,

    eof: bool,
    closed: bool,
    cancelled: bool,

    reader_waker: Option<Waker>,
}

#[derive(Debug)]
struct InputShared {
    state: Mutex<InputState>,

    max_packet_size: usize,
    adjust_threshold: u32,

    adjust_notify: Notify,
}

impl InputShared {
    fn wake_reader(state: &mut InputState) {
        if let Some(waker) = state.reader_waker.take() {
            waker.wake();
        }
    }

    /// Return `n` bytes of local window, queueing an adjustment once enough
    /// has accumulated.
    fn consume(&self, state: &mut InputState, n: usize) {
        state.consumed = state.consumed.saturating_add(n as u32);

        if state.consumed > self.adjust_threshold {
            state.window_left += state.consumed as usize;
            state.pending_adjust = state.pending_adjust.saturating_add(state.consumed);
            state.consumed = 0;

            self.adjust_notify.notify_one();
        }
    }
}

/// Readable half of a channel, fed by inbound data frames through its
/// [`PipedInputSender`].
///
/// Buffered bytes never exceed the local window: the peer is only granted
/// more window once the application has read what it sent.
///
/// Dropping the `PipedInput` closes it.
#[derive(Debug)]
pub struct PipedInput {
    shared: Arc<InputShared>,
}

/// Inbound frame dispatch side of a [`PipedInput`].
#[derive(Debug, Clone)]
pub struct PipedInputSender {
    shared: Arc<InputShared>,
}

impl PipedInput {
    pub fn new(options: &ChannelOptions) -> (Self, PipedInputSender) {
        let shared = Arc::new(InputShared {
            state: Mutex::new(InputState {
                buffers: VecDeque::new(),
                buffered: 0,

                window_left: options.get_local_window_size().get() as usize,
                consumed: 0,
                pending_adjust: 0,

                eof: false,
                closed: false,
                cancelled: false,

                reader_waker: None,
            }),

            max_packet_size: options.get_local_max_packet_size().get() as usize,
            adjust_threshold: options.get_adjust_threshold(),

            adjust_notify: Notify::new(),
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            PipedInputSender { shared },
        )
    }

    /// Return `Some(bytes)` with at most `max_len` bytes, or `None` on
    /// end-of-stream.
    fn poll_read_bytes(
        &self,
        cx: &mut Context<'_>,
        max_len: usize,
    ) -> Poll<Result<Option<Bytes>, Error>> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if state.closed {
            return Poll::Ready(Err(Error::Closed));
        }

        if let Some(front) = state.buffers.front_mut() {
            let bytes = if front.len() <= max_len {
                // front_mut returned Some, so pop_front does too.
                state.buffers.pop_front().unwrap_or_default()
            } else {
                front.split_to(max_len)
            };

            state.buffered -= bytes.len();
            self.shared.consume(state, bytes.len());

            return Poll::Ready(Ok(Some(bytes)));
        }

        if state.eof {
            return Poll::Ready(Ok(None));
        }

        if state.cancelled {
            return Poll::Ready(Err(Error::Cancelled));
        }

        match &state.reader_waker {
            Some(waker) if waker.will_wake(cx.waker()) => (),
            _ => state.reader_waker = Some(cx.waker().clone()),
        }

        Poll::Pending
    }

    /// Read at most `max_len` bytes without copying them.
    ///
    /// Suspend while nothing is buffered and EOF has not been received.
    /// Return `Ok(None)` once every byte sent before EOF has been read.
    ///
    /// Fails with [`Error::Closed`] after [`PipedInput::close`], and with
    /// [`Error::Cancelled`] if the channel is torn down while nothing is
    /// buffered.
    pub async fn read_bytes(&mut self, max_len: usize) -> Result<Option<Bytes>, Error> {
        if max_len == 0 {
            return Ok(Some(Bytes::new()));
        }

        poll_fn(|cx| self.poll_read_bytes(cx, max_len)).await
    }

    /// Read into `buf`, returning `0` on end-of-stream.
    ///
    /// See [`PipedInput::read_bytes`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.read_bytes(buf.len()).await? {
            Some(bytes) => {
                let n = bytes.len();
                buf[..n].copy_from_slice(&bytes);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    /// Number of bytes received but not read yet.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffered
    }

    pub fn is_open(&self) -> bool {
        !self.shared.state.lock().closed
    }

    /// Close the input and release the buffered bytes.
    ///
    /// Every later read fails with [`Error::Closed`]; data that is still
    /// in flight from the peer is discarded on arrival and its window is
    /// granted back right away.
    ///
    /// No read can be suspended at this point since reads borrow the input
    /// mutably; to wake a suspended reader from another task use
    /// [`PipedInputSender::cancel`].
    pub fn close(&self) {
        let mut state = self.shared.state.lock();

        if state.closed {
            return;
        }
        state.closed = true;

        let buffered = state.buffered;
        state.buffers = VecDeque::new();
        state.buffered = 0;
        self.shared.consume(&mut state, buffered);

        // Left behind by a read future that was dropped.
        state.reader_waker = None;
    }
}

impl Drop for PipedInput {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncRead for PipedInput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        match self.poll_read_bytes(cx, buf.remaining()) {
            Poll::Ready(Ok(Some(bytes))) => {
                buf.put_slice(&bytes);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Ok(None)) => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl PipedInputSender {
    /// Append an inbound data frame.
    ///
    /// Fails with [`Error::DataAfterEof`] after [`PipedInputSender::eof`],
    /// with [`Error::WindowExceeded`] if the peer overran the local window
    /// and with [`Error::Cancelled`] after [`PipedInputSender::cancel`].
    pub fn receive(&self, data: Bytes) -> Result<(), Error> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if state.cancelled {
            return Err(Error::Cancelled);
        }
        if state.eof {
            return Err(Error::DataAfterEof);
        }
        if data.len() > self.shared.max_packet_size {
            return Err(Error::InvalidResponse(
                &"data frame larger than the local max packet size",
            ));
        }
        if data.len() > state.window_left {
            return Err(Error::WindowExceeded {
                len: data.len(),
                available: state.window_left,
            });
        }

        state.window_left -= data.len();

        if state.closed {
            // Nobody is going to read it.
            self.shared.consume(state, data.len());
            return Ok(());
        }

        if !data.is_empty() {
            state.buffered += data.len();
            state.buffers.push_back(data);
            InputShared::wake_reader(state);
        }

        Ok(())
    }

    /// Record EOF from the peer.
    ///
    /// Bytes already buffered can still be read; calling this more than
    /// once has no further effect.
    pub fn eof(&self) {
        let mut state = self.shared.state.lock();

        state.eof = true;
        InputShared::wake_reader(&mut state);
    }

    pub fn is_eof(&self) -> bool {
        self.shared.state.lock().eof
    }

    /// Return true once the [`PipedInput`] is closed or dropped, after
    /// which inbound data is discarded.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Wake the reader with [`Error::Cancelled`] once the buffer is drained,
    /// and stop [`PipedInputSender::next_window_adjust`].
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();

        state.cancelled = true;
        InputShared::wake_reader(&mut state);

        self.shared.adjust_notify.notify_one();
    }

    /// Local window left for the peer.
    pub fn window_left(&self) -> usize {
        self.shared.state.lock().window_left
    }

    /// Wait for the next window adjustment the session has to send.
    ///
    /// Return `None` once the channel is cancelled.
    pub async fn next_window_adjust(&self) -> Option<u32> {
        loop {
            {
                let mut state = self.shared.state.lock();

                if state.pending_adjust != 0 {
                    let adjust = state.pending_adjust;
                    state.pending_adjust = 0;
                    return Some(adjust);
                }

                if state.cancelled {
                    return None;
                }
            }

            // `notify_one` stores a permit if nobody is waiting,
            // so a notification sent after the check is not lost.
            self.shared.adjust_notify.notified().await;
        }
    }

    /// Take the pending window adjustment, if any, without waiting.
    pub fn take_window_adjust(&self) -> Option<u32> {
        let mut state = self.shared.state.lock();

        match state.pending_adjust {
            0 => None,
            adjust => {
                state.pending_adjust = 0;
                Some(adjust)
            }
        }
    }
}
