use super::{ChannelSink, Error, PipedOutput};

use std::{
    fmt,
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::io::AsyncWrite;
use tokio_io_utility::ready;

type OutputFuture = BoxFuture<'static, Result<(), Error>>;

/// [`AsyncWrite`] adapter over a [`PipedOutput`].
///
/// At most one write is in flight: `poll_write` accepts `buf` as soon as
/// the previous write has been forwarded, and an error raised by an
/// accepted write is returned by the next `poll_write`, `poll_flush`
/// or `poll_shutdown`.
///
/// `poll_shutdown` closes the output, signalling EOF to the peer. Once
/// the output is closed `poll_flush` fails like [`PipedOutput::flush`].
pub struct PipedWriter<S: ChannelSink + 'static> {
    output: PipedOutput<S>,

    write_future: Option<OutputFuture>,
    close_future: Option<OutputFuture>,
}

impl<S: ChannelSink + 'static> fmt::Debug for PipedWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipedWriter")
            .field("state", &self.output.state())
            .field("write_pending", &self.write_future.is_some())
            .field("close_pending", &self.close_future.is_some())
            .finish()
    }
}

impl<S: ChannelSink + 'static> PipedWriter<S> {
    pub fn new(output: PipedOutput<S>) -> Self {
        Self {
            output,
            write_future: None,
            close_future: None,
        }
    }

    pub fn get_ref(&self) -> &PipedOutput<S> {
        &self.output
    }

    /// Return the inner [`PipedOutput`], dropping any write in flight.
    pub fn into_inner(self) -> PipedOutput<S> {
        self.output
    }

    fn poll_write_future(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(future) = self.write_future.as_mut() {
            let res = ready!(future.as_mut().poll(cx));
            self.write_future = None;
            res?;
        }

        Poll::Ready(Ok(()))
    }
}

impl<S: ChannelSink + 'static> AsyncWrite for PipedWriter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        ready!(this.poll_write_future(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let output = this.output.clone();
        let data = Bytes::copy_from_slice(buf);
        let mut future: OutputFuture = Box::pin(async move { output.write_bytes(data).await });

        // Poll once so that writing to a closed output fails right away.
        match future.as_mut().poll(cx) {
            Poll::Ready(res) => res?,
            Poll::Pending => this.write_future = Some(future),
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        ready!(this.poll_write_future(cx))?;

        if this.output.is_open() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(Error::Closed.into()))
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        ready!(this.poll_write_future(cx))?;

        let future = this.close_future.get_or_insert_with(|| {
            let output = this.output.clone();
            Box::pin(async move { output.close().await })
        });

        let res = ready!(future.as_mut().poll(cx));
        this.close_future = None;

        Poll::Ready(res.map_err(io::Error::from))
    }
}
