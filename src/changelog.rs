#[allow(unused_imports)]
use crate::*;

#[doc(hidden)]
pub mod unreleased {}

/// ## Added
///  - [`WindowTracker`], a fair send window with teardown cancellation.
///  - [`PipedOutput`] and its [`tokio::io::AsyncWrite`] adapter
///    [`PipedWriter`].
///  - [`PipedInput`], implementing [`tokio::io::AsyncRead`], and
///    [`PipedInputSender`].
///  - [`Channel`] and [`ChannelTable`] for inbound frame dispatch.
///  - [`extensions::SftpCommandChannel`],
///    [`extensions::Md5HashExtension`] and
///    [`extensions::PosixRenameExtension`].
pub mod v0_1_0 {}
