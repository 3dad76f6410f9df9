use super::Error;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// The outbound protocol path of one channel.
///
/// Implemented by the session (turning bytes into `SSH_MSG_CHANNEL_DATA`
/// and `SSH_MSG_CHANNEL_EOF`) or by an in-memory double in tests.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Deliver `data` to the peer as channel data.
    ///
    /// `data` never exceeds the remote window or max packet size
    /// at the time it is handed over. May suspend while the session's
    /// write path is congested.
    async fn receive(&self, data: Bytes) -> Result<(), Error>;

    /// Signal EOF for this channel to the peer.
    ///
    /// [`crate::PipedOutput`] calls this at most once per channel; an
    /// implementation is free to reject a second call as a logic error.
    async fn eof(&self) -> Result<(), Error>;
}

#[async_trait]
impl<S: ChannelSink + ?Sized> ChannelSink for Arc<S> {
    async fn receive(&self, data: Bytes) -> Result<(), Error> {
        (**self).receive(data).await
    }

    async fn eof(&self) -> Result<(), Error> {
        (**self).eof().await
    }
}
