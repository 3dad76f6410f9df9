//! Typed request/reply exchanges carried over an sftp channel as
//! `SSH_FXP_EXTENDED` requests.
//!
//! Every extension is built on [`ExtensionClient`], which frames the
//! request, submits it through an [`ExtendedCommandTransport`] and
//! validates the reply envelope. Correlating a reply with its request is
//! the transport's job: [`SftpCommandChannel`] does it for a piped channel.

use super::{
    constants::{SSH_FXP_EXTENDED_REPLY, SSH_FXP_STATUS, SSH_FX_OK},
    wire, Error, SftpErrorKind,
};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

mod command_channel;
pub use command_channel::{CommandHandle, SftpCommandChannel};

mod hash;
pub use hash::Md5HashExtension;

mod posix_rename;
pub use posix_rename::PosixRenameExtension;

/// Correlated request/reply exchange of extended commands.
#[async_trait]
pub trait ExtendedCommandTransport: Send + Sync {
    /// Identifies an outstanding request.
    type Handle: Send;

    /// Submit `buffer` as the payload of an `SSH_FXP_EXTENDED` request.
    async fn send_extended_command(&self, buffer: Bytes) -> Result<Self::Handle, Error>;

    /// Wait for the reply to the request identified by `handle`.
    ///
    /// The reply starts with its packet type, the request id is already
    /// stripped.
    async fn receive(&self, handle: Self::Handle) -> Result<Bytes, Error>;

    /// Validate the reply envelope, see [`check_extended_reply_buffer`].
    fn check_extended_reply_buffer(&self, reply: Bytes) -> Result<Option<Bytes>, Error> {
        check_extended_reply_buffer(reply)
    }
}

#[async_trait]
impl<T: ExtendedCommandTransport + ?Sized> ExtendedCommandTransport for Arc<T> {
    type Handle = T::Handle;

    async fn send_extended_command(&self, buffer: Bytes) -> Result<Self::Handle, Error> {
        (**self).send_extended_command(buffer).await
    }

    async fn receive(&self, handle: Self::Handle) -> Result<Bytes, Error> {
        (**self).receive(handle).await
    }

    fn check_extended_reply_buffer(&self, reply: Bytes) -> Result<Option<Bytes>, Error> {
        (**self).check_extended_reply_buffer(reply)
    }
}

#[async_trait]
impl<T: ExtendedCommandTransport + ?Sized> ExtendedCommandTransport for &T {
    type Handle = T::Handle;

    async fn send_extended_command(&self, buffer: Bytes) -> Result<Self::Handle, Error> {
        (**self).send_extended_command(buffer).await
    }

    async fn receive(&self, handle: Self::Handle) -> Result<Bytes, Error> {
        (**self).receive(handle).await
    }

    fn check_extended_reply_buffer(&self, reply: Bytes) -> Result<Option<Bytes>, Error> {
        (**self).check_extended_reply_buffer(reply)
    }
}

/// Strip the envelope of a reply to an extended request.
///
///  - `SSH_FXP_EXTENDED_REPLY`: return its payload, `None` if empty.
///  - `SSH_FXP_STATUS` with `SSH_FX_OK`: `None`.
///  - `SSH_FXP_STATUS` with any other code: [`Error::SftpError`].
///  - Anything else: [`Error::InvalidResponse`].
pub fn check_extended_reply_buffer(mut reply: Bytes) -> Result<Option<Bytes>, Error> {
    match wire::get_u8(&mut reply)? {
        SSH_FXP_EXTENDED_REPLY => Ok(if reply.is_empty() { None } else { Some(reply) }),
        SSH_FXP_STATUS => {
            let code = wire::get_u32(&mut reply)?;
            if code == SSH_FX_OK {
                return Ok(None);
            }

            // Some servers omit the message and language tag.
            let msg = if reply.is_empty() {
                String::new()
            } else {
                wire::get_utf8(&mut reply)?
            };

            Err(Error::SftpError(SftpErrorKind::from(code), msg))
        }
        _ => Err(Error::InvalidResponse(
            &"expected SSH_FXP_EXTENDED_REPLY or SSH_FXP_STATUS",
        )),
    }
}

/// What an extension operates on: a remote path or an open handle.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Target {
    Path(String),
    Handle(Bytes),
}

impl Target {
    fn encode(&self, buffer: &mut BytesMut) -> Result<(), Error> {
        match self {
            Target::Path(path) => wire::put_string(buffer, path.as_bytes()),
            Target::Handle(handle) => wire::put_string(buffer, handle),
        }
    }

    fn encoded_len(&self) -> usize {
        4 + match self {
            Target::Path(path) => path.len(),
            Target::Handle(handle) => handle.len(),
        }
    }
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(path.to_owned())
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Target::Path(path)
    }
}

impl From<Bytes> for Target {
    fn from(handle: Bytes) -> Self {
        Target::Handle(handle)
    }
}

/// Paths are logged as is, handles as hex without separator.
impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(path) => f.write_str(path),
            Target::Handle(handle) => fmt::Display::fmt(&Hex::new(handle), f),
        }
    }
}

/// Lowercase hex formatting of a byte sequence.
#[derive(Debug, Copy, Clone)]
pub struct Hex<'a> {
    bytes: &'a [u8],
    separator: Option<char>,
}

impl<'a> Hex<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            separator: None,
        }
    }

    pub fn with_separator(bytes: &'a [u8], separator: char) -> Self {
        Self {
            bytes,
            separator: Some(separator),
        }
    }
}

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if let (Some(separator), true) = (self.separator, i != 0) {
                write!(f, "{separator}")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Shared base of every extension: its name and the transport to send
/// its requests through.
#[derive(Debug, Clone)]
pub struct ExtensionClient<T> {
    name: &'static str,
    transport: T,
}

impl<T: ExtendedCommandTransport> ExtensionClient<T> {
    pub fn new(name: &'static str, transport: T) -> Self {
        Self { name, transport }
    }

    /// Name of the extension, which is also the request opcode.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Create a request buffer starting with the extension name, with room
    /// for `extra` more bytes.
    pub fn command_buffer(&self, extra: usize) -> Result<BytesMut, Error> {
        let mut buffer = BytesMut::with_capacity(4 + self.name.len() + extra);
        wire::put_string(&mut buffer, self.name.as_bytes())?;
        Ok(buffer)
    }

    /// Send `buffer`, wait for the reply and strip its envelope.
    pub async fn send_and_receive(&self, buffer: BytesMut) -> Result<Option<Bytes>, Error> {
        let handle = self
            .transport
            .send_extended_command(buffer.freeze())
            .await?;
        let reply = self.transport.receive(handle).await?;

        self.transport.check_extended_reply_buffer(reply)
    }

    /// Send `buffer` and expect a plain `SSH_FX_OK` status in return.
    pub async fn send_and_check_status(&self, buffer: BytesMut) -> Result<(), Error> {
        match self.send_and_receive(buffer).await? {
            None => Ok(()),
            Some(_) => Err(Error::InvalidResponse(
                &"expected SSH_FXP_STATUS, got SSH_FXP_EXTENDED_REPLY",
            )),
        }
    }
}
