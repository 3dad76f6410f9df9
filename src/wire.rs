//! SSH wire primitives (RFC 4251 section 5) over [`bytes`].

use super::Error;

use std::convert::TryInto;

use bytes::{Buf, BufMut, Bytes, BytesMut};

const SHORT_BUFFER: &&str = &"reply ended before all fields were read";

/// `string`: `uint32` length followed by the bytes.
pub(crate) fn put_string(buffer: &mut BytesMut, bytes: &[u8]) -> Result<(), Error> {
    let len: u32 = bytes.len().try_into()?;

    buffer.reserve(4 + bytes.len());
    buffer.put_u32(len);
    buffer.put_slice(bytes);

    Ok(())
}

pub(crate) fn get_u8(buffer: &mut Bytes) -> Result<u8, Error> {
    if buffer.remaining() < 1 {
        return Err(Error::InvalidResponse(SHORT_BUFFER));
    }
    Ok(buffer.get_u8())
}

pub(crate) fn get_u32(buffer: &mut Bytes) -> Result<u32, Error> {
    if buffer.remaining() < 4 {
        return Err(Error::InvalidResponse(SHORT_BUFFER));
    }
    Ok(buffer.get_u32())
}

pub(crate) fn get_string(buffer: &mut Bytes) -> Result<Bytes, Error> {
    let len = get_u32(buffer)? as usize;

    if buffer.remaining() < len {
        return Err(Error::InvalidResponse(SHORT_BUFFER));
    }
    Ok(buffer.split_to(len))
}

/// A `string` holding ISO-10646 UTF-8 text.
pub(crate) fn get_utf8(buffer: &mut Bytes) -> Result<String, Error> {
    String::from_utf8(get_string(buffer)?.to_vec())
        .map_err(|_| Error::InvalidResponse(&"string is not valid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_layout() {
        let mut buffer = BytesMut::new();
        put_string(&mut buffer, b"md5-hash").unwrap();

        assert_eq!(&buffer[..4], &[0, 0, 0, 8]);

        let mut bytes = buffer.freeze();
        assert_eq!(get_utf8(&mut bytes).unwrap(), "md5-hash");
        assert!(bytes.is_empty());
    }

    #[test]
    fn short_buffers_are_invalid() {
        let mut bytes = Bytes::from_static(&[0, 0, 0, 9, b'a']);
        assert!(matches!(
            get_string(&mut bytes),
            Err(Error::InvalidResponse(_))
        ));

        let mut bytes = Bytes::from_static(&[0, 0]);
        assert!(get_u32(&mut bytes).is_err());

        let mut bytes = Bytes::new();
        assert!(get_u8(&mut bytes).is_err());
    }
}
