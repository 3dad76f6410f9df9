use super::{
    output::OutputAbortHandle, ChannelOptions, ChannelSink, Error, PipedInput, PipedInputSender,
    PipedOutput, RemoteParams, WindowTracker,
};

use std::num::NonZeroU32;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Channel`] as seen from the inbound side.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    Open,
    /// The peer sent EOF, it will not send any more data.
    Eof,
    Closed,
}

/// One multiplexed channel of a session.
///
/// The session owns the `Channel` and feeds it inbound frames, while the
/// application owns the [`PipedOutput`] and [`PipedInput`] returned by
/// [`Channel::open`].
#[derive(Debug)]
pub struct Channel<S: ChannelSink + 'static> {
    local_id: u32,
    remote: RemoteParams,
    local_window_size: NonZeroU32,
    local_max_packet_size: NonZeroU32,

    window: Arc<WindowTracker>,
    output: OutputAbortHandle<S>,
    input: PipedInputSender,

    cancel_token: CancellationToken,
}

impl<S: ChannelSink + 'static> Channel<S> {
    /// Create the channel and its piping adapters.
    ///
    /// The send window can never grow past `remote.window_size`, the window
    /// the peer announced on open: an adjustment beyond it is a window
    /// overflow and tears the channel down. A peer opening with a zero
    /// window therefore cannot be written to.
    pub fn open(
        local_id: u32,
        remote: RemoteParams,
        options: &ChannelOptions,
        sink: S,
    ) -> (Self, PipedOutput<S>, PipedInput) {
        let window = Arc::new(WindowTracker::new(remote.window_size));
        let output = PipedOutput::new(sink, Arc::clone(&window), remote.max_packet_size);
        let (input, input_sender) = PipedInput::new(options);

        let channel = Self {
            local_id,
            remote,
            local_window_size: options.get_local_window_size(),
            local_max_packet_size: options.get_local_max_packet_size(),

            window,
            output: output.downgrade(),
            input: input_sender,

            cancel_token: CancellationToken::new(),
        };

        (channel, output, input)
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn remote_id(&self) -> u32 {
        self.remote.id
    }

    /// Send window currently available.
    pub fn remote_window(&self) -> u32 {
        self.window.available()
    }

    pub fn remote_max_packet_size(&self) -> NonZeroU32 {
        self.remote.max_packet_size
    }

    /// Receive window currently left for the peer.
    pub fn local_window(&self) -> usize {
        self.input.window_left()
    }

    pub fn local_window_size(&self) -> NonZeroU32 {
        self.local_window_size
    }

    pub fn local_max_packet_size(&self) -> NonZeroU32 {
        self.local_max_packet_size
    }

    pub fn state(&self) -> ChannelState {
        if self.cancel_token.is_cancelled() {
            ChannelState::Closed
        } else if self.input.is_eof() {
            ChannelState::Eof
        } else {
            ChannelState::Open
        }
    }

    /// Token cancelled when the channel is torn down.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    fn ensure_not_closed(&self) -> Result<(), Error> {
        if self.cancel_token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// `SSH_MSG_CHANNEL_DATA`
    pub fn handle_data(&self, data: Bytes) -> Result<(), Error> {
        self.ensure_not_closed()?;
        self.input.receive(data)
    }

    /// `SSH_MSG_CHANNEL_EOF`
    pub fn handle_eof(&self) -> Result<(), Error> {
        self.ensure_not_closed()?;
        self.input.eof();
        Ok(())
    }

    /// `SSH_MSG_CHANNEL_WINDOW_ADJUST`
    ///
    /// An adjustment overflowing the negotiated window tears the channel
    /// down before the error is returned.
    pub fn handle_window_adjust(&self, bytes_to_add: u32) -> Result<(), Error> {
        self.ensure_not_closed()?;

        self.window.release(bytes_to_add).map_err(|err| {
            self.teardown();
            err
        })
    }

    /// `SSH_MSG_CHANNEL_CLOSE`, or the session going away.
    ///
    /// Wakes every suspended write with [`Error::Cancelled`], closes the
    /// output without signalling EOF, and lets the reader drain what is
    /// already buffered before failing with [`Error::Cancelled`].
    pub fn teardown(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            local_id = self.local_id,
            remote_id = self.remote.id,
            "tearing down channel"
        );

        self.cancel_token.cancel();
        self.output.abort();
        self.window.close();
        self.input.cancel();
    }

    /// Wait for the next window adjustment to send to the peer.
    ///
    /// Return `None` once the channel is torn down.
    pub async fn next_window_adjust(&self) -> Option<u32> {
        self.input.next_window_adjust().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    #[derive(Debug)]
    struct NullSink;

    #[async_trait]
    impl ChannelSink for NullSink {
        async fn receive(&self, _data: Bytes) -> Result<(), Error> {
            Ok(())
        }

        async fn eof(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn open(remote_window: u32) -> (Channel<NullSink>, PipedOutput<NullSink>, PipedInput) {
        Channel::open(
            3,
            RemoteParams {
                id: 7,
                window_size: remote_window,
                max_packet_size: NonZeroU32::new(16).unwrap(),
            },
            &ChannelOptions::default(),
            NullSink,
        )
    }

    #[tokio::test]
    async fn window_adjust_feeds_the_tracker() {
        let (channel, output, _input) = open(4);

        assert_eq!((channel.local_id(), channel.remote_id()), (3, 7));
        output.write(b"1234").await.unwrap();
        assert_eq!(channel.remote_window(), 0);

        channel.handle_window_adjust(4).unwrap();
        assert_eq!(channel.remote_window(), 4);
    }

    #[tokio::test]
    async fn overflow_tears_down() {
        let (channel, output, _input) = open(4);

        assert!(matches!(
            channel.handle_window_adjust(1),
            Err(Error::WindowOverflow { .. })
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!output.is_open());
        assert!(matches!(channel.handle_eof(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn window_is_bounded_by_the_announced_one() {
        let (channel, output, _input) = open(0);

        assert!(matches!(
            channel.handle_window_adjust(1),
            Err(Error::WindowOverflow {
                available: 0,
                adjust: 1,
                max: 0
            })
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(output.write(b"x").await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn eof_then_teardown() {
        let (channel, _output, mut input) = open(4);

        channel.handle_data(Bytes::from_static(b"xy")).unwrap();
        channel.handle_eof().unwrap();
        assert_eq!(channel.state(), ChannelState::Eof);

        channel.teardown();
        channel.teardown();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.cancellation_token().is_cancelled());

        // Received EOF before the teardown, so this is a graceful end.
        assert_eq!(
            input.read_bytes(8).await.unwrap(),
            Some(Bytes::from_static(b"xy"))
        );
        assert_eq!(input.read_bytes(8).await.unwrap(), None);
        assert_eq!(channel.next_window_adjust().await, None);
    }
}
