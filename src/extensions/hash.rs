use super::{wire, Error, ExtendedCommandTransport, ExtensionClient, Target};

#[cfg(feature = "tracing")]
use super::Hex;

use bytes::{BufMut, Bytes};

/// Request a hash of `length` bytes of `target` starting at `offset`,
/// and return the raw hash from the reply.
///
/// The reply must echo the request opcode (compared case-insensitively)
/// before the hash.
async fn get_hash<T: ExtendedCommandTransport>(
    client: &ExtensionClient<T>,
    target: &Target,
    offset: u64,
    length: u64,
    quick_hash: &[u8],
) -> Result<Bytes, Error> {
    let opcode = client.name();

    let mut buffer = client.command_buffer(target.encoded_len() + 8 + 8 + 4 + quick_hash.len())?;
    target.encode(&mut buffer)?;
    buffer.put_u64(offset);
    buffer.put_u64(length);
    wire::put_string(&mut buffer, quick_hash)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "get_hash({opcode})[{target}] - offset={offset}, length={length}, quick-hash={}",
        Hex::with_separator(quick_hash, ':'),
    );

    let mut reply = client
        .send_and_receive(buffer)
        .await?
        .ok_or(Error::MissingReplyData)?;

    let target_type = wire::get_utf8(&mut reply)?;
    if !target_type.eq_ignore_ascii_case(opcode) {
        return Err(Error::ProtocolMismatch {
            expected: opcode.to_owned(),
            actual: target_type,
        });
    }

    let hash = wire::get_string(&mut reply)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "get_hash({opcode})[{target}] - offset={offset}, length={length}, quick-hash={} - result={}",
        Hex::with_separator(quick_hash, ':'),
        Hex::with_separator(&hash, ':'),
    );

    Ok(hash)
}

/// The `md5-hash` (by path) and `md5-hash-handle` (by open handle)
/// extensions.
#[derive(Debug, Clone)]
pub struct Md5HashExtension<T> {
    transport: T,
}

impl<T: ExtendedCommandTransport> Md5HashExtension<T> {
    pub const BY_PATH: &'static str = "md5-hash";
    pub const BY_HANDLE: &'static str = "md5-hash-handle";

    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Opcode used for `target`.
    pub fn opcode(target: &Target) -> &'static str {
        match target {
            Target::Path(_) => Self::BY_PATH,
            Target::Handle(_) => Self::BY_HANDLE,
        }
    }

    /// MD5 of `length` bytes of `target` starting at `offset`, `length == 0`
    /// meaning up to the end of file.
    ///
    /// If `quick_hash` (the MD5 of the first 2048 bytes of the range) does
    /// not match, the server may reply with an empty hash instead of
    /// hashing the whole range.
    pub async fn get_hash(
        &self,
        target: impl Into<Target>,
        offset: u64,
        length: u64,
        quick_hash: Option<&[u8]>,
    ) -> Result<Bytes, Error> {
        let target = target.into();
        let client = ExtensionClient::new(Self::opcode(&target), &self.transport);

        get_hash(
            &client,
            &target,
            offset,
            length,
            quick_hash.unwrap_or_default(),
        )
        .await
    }
}
