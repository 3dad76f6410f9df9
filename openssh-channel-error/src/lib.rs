#![forbid(unsafe_code)]

use std::{fmt, io, num::TryFromIntError};

use thiserror::Error as ThisError;

/// Error returned by
/// [`openssh-channel-pipe`](https://docs.rs/openssh-channel-pipe).
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum Error {
    /// The stream is closed, or (for writes) EOF has already been sent.
    #[error("The channel stream is already closed.")]
    Closed,

    /// The channel was torn down while the operation was suspended.
    ///
    /// This is distinct from a graceful EOF: the connection died
    /// mid-operation.
    #[error("The channel was torn down before the operation completed.")]
    Cancelled,

    /// The reply to an extended command echoed a different opcode.
    #[error("Mismatched reply target type: expected={expected}, actual={actual}.")]
    ProtocolMismatch {
        /// Opcode of the request.
        expected: String,
        /// Opcode found in the reply.
        actual: String,
    },

    /// The reply to an extended command carried no payload.
    #[error("Missing extended reply data.")]
    MissingReplyData,

    /// The peer adjusted the send window beyond the negotiated maximum.
    ///
    /// The channel owning the window is torn down when this is raised.
    #[error("Window adjust of {adjust} on top of {available} exceeds the maximum {max}.")]
    WindowOverflow {
        /// Window available before the adjustment.
        available: u32,
        /// Size of the adjustment.
        adjust: u32,
        /// Negotiated maximum.
        max: u32,
    },

    /// The peer sent more data than the local window allows.
    #[error("Peer sent {len} bytes while only {available} bytes of window are left.")]
    WindowExceeded {
        /// Length of the offending data frame.
        len: usize,
        /// Local window left.
        available: usize,
    },

    /// The peer sent data after sending EOF.
    #[error("Peer sent data after EOF.")]
    DataAfterEof,

    /// A frame was addressed to a channel that is not allocated.
    #[error("No channel is allocated for local id {id}.")]
    UnknownChannel {
        /// The local id the frame was addressed to.
        id: u32,
    },

    /// All local channel ids are in use.
    #[error("All local channel ids are in use.")]
    ChannelIdsExhausted,

    /// Sftp server error
    #[error("Sftp server reported error kind {0:#?}, msg: {1}")]
    SftpError(SftpErrorKind, String),

    /// Invalid response from the peer.
    #[error("Response from peer is invalid: {0}")]
    InvalidResponse(
        // Use `&&str` since `&str` takes 16 bytes while `&&str` only takes 8 bytes.
        &'static &'static str,
    ),

    /// IO Error (Excluding [`io::ErrorKind::WouldBlock`]): {0}.
    #[error("IO Error (Excluding `io::ErrorKind::WouldBlock`): {0}.")]
    IOError(#[from] io::Error),

    /// Packets can carry at most [`u32::MAX`] bytes.
    #[error("A packet can carry at most u32::MAX bytes.")]
    BufferTooLong(#[from] TryFromIntError),

    /// Raised 2 errors when cleaning up.
    #[error(transparent)]
    RecursiveErrors(Box<RecursiveError>),

    /// tokio join error
    #[error("Failed to join tokio task")]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IOError(io_error) => io_error,
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, err),
            Error::Cancelled => io::Error::new(io::ErrorKind::ConnectionAborted, err),
            err => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

#[derive(Debug, ThisError)]
#[error("OriginalError: {original_error}, curr err raised when cleaning up: {occuring_error}.")]
pub struct RecursiveError {
    /// Original error
    pub original_error: Error,

    /// Current error raised when performing cleanup
    /// for original error.
    #[source]
    pub occuring_error: Error,
}

/// Status codes defined in sftp v3.
#[non_exhaustive]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SftpErrorKind {
    /// Attempt to read past the end of file.
    Eof,
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    NoConnection,
    ConnectionLost,
    OpUnsupported,

    /// A status code not defined in sftp v3.
    Unknown(u32),
}

impl From<u32> for SftpErrorKind {
    fn from(code: u32) -> Self {
        use SftpErrorKind::*;

        match code {
            1 => Eof,
            2 => NoSuchFile,
            3 => PermissionDenied,
            4 => Failure,
            5 => BadMessage,
            6 => NoConnection,
            7 => ConnectionLost,
            8 => OpUnsupported,
            code => Unknown(code),
        }
    }
}

impl fmt::Display for SftpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
