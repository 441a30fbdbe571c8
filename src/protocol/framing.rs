use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::protocol::codec::{Codec, DecodeError};
use crate::protocol::packet::Packet;


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("invalid packet at offset {offset}: {source}")]
    Decode {
        offset: usize,
        #[source]
        source: DecodeError,
    },

    #[error("packet at offset {offset} reports a total length of 0")]
    ZeroLength { offset: usize },

    #[error("packet at offset {offset} with length {total_length} exceeds buffer length {buf_len}")]
    Overrun { offset: usize, total_length: usize, buf_len: usize },
}

/// Splits a buffer into the packets it contains, back to back. The entire buffer must consist
///  of complete packets - a single malformed or incomplete packet fails the whole buffer.
pub fn split(codec: &dyn Codec, buf: &[u8]) -> Result<Vec<Packet>, FramingError> {
    let mut packets = Vec::new();

    let mut offset = 0;
    while offset < buf.len() {
        let decoded = codec.decode(buf, offset)
            .map_err(|source| FramingError::Decode { offset, source })?;

        if decoded.total_length == 0 {
            return Err(FramingError::ZeroLength { offset });
        }
        if decoded.total_length > buf.len() - offset {
            return Err(FramingError::Overrun { offset, total_length: decoded.total_length, buf_len: buf.len() });
        }

        trace!("split packet at offset {}: {:?}", offset, decoded.packet);
        offset += decoded.total_length;
        packets.push(decoded.packet);
    }

    Ok(packets)
}

/// Concatenates the packets' wire representations in the given order
pub fn combine<'a>(codec: &dyn Codec, packets: impl IntoIterator<Item = &'a Packet>) -> Bytes {
    let mut buf = BytesMut::new();
    for packet in packets {
        codec.encode(packet, &mut buf);
    }
    buf.freeze()
}
