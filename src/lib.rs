//! Piping of multiplexed ssh channels.
//!
//! A single ssh connection carries many channels, each a bidirectional byte
//! stream with its own flow control. This crate exposes a channel to the
//! application as an ordinary stream while the session drives it with
//! protocol frames:
//!
//!  - [`PipedOutput`] forwards written bytes to a [`ChannelSink`], never
//!    exceeding the peer's window tracked by [`WindowTracker`], and signals
//!    EOF exactly once no matter how many tasks race to close it.
//!  - [`PipedInput`] buffers inbound data frames fed through its
//!    [`PipedInputSender`] and hands them to the reader, granting the peer
//!    more window as they are consumed.
//!  - [`Channel`] and [`ChannelTable`] route inbound frames and tear
//!    channels down, cancelling every suspended read and write.
//!
//! The [`extensions`] module builds typed request/reply exchanges
//! (e.g. `md5-hash`) on top of a piped sftp channel.
//!
//! Enable the `tracing` feature to log through [`tracing`](https://docs.rs/tracing).

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::num::NonZeroU32;

pub use openssh_channel_error::{Error, RecursiveError, SftpErrorKind};

/// Default channel window of openssh-portable (`CHAN_SES_WINDOW_DEFAULT`).
pub const OPENSSH_DEFAULT_WINDOW_SIZE: NonZeroU32 = match NonZeroU32::new(64 * 32768) {
    Some(size) => size,
    None => unreachable!(),
};

/// Default max packet size of openssh-portable (`CHAN_SES_PACKET_DEFAULT`).
pub const OPENSSH_DEFAULT_MAX_PACKET_SIZE: NonZeroU32 = match NonZeroU32::new(32768) {
    Some(size) => size,
    None => unreachable!(),
};

#[cfg(doc)]
/// Changelog for this crate.
pub mod changelog;

mod constants;
mod utils;
mod wire;

mod options;
pub use options::{ChannelOptions, RemoteParams};

mod window;
pub use window::WindowTracker;

mod sink;
pub use sink::ChannelSink;

mod output;
pub use output::{OutputState, PipedOutput, PipedWriter};

mod input;
pub use input::{PipedInput, PipedInputSender};

mod channel;
pub use channel::{Channel, ChannelState};

mod channel_table;
pub use channel_table::{ChannelMessage, ChannelTable};

/// Typed request/reply exchanges layered on an sftp channel.
pub mod extensions;
