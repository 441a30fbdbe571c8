//! Wire representation of a single [Packet].
//!
//! The engine only relies on the [Codec] trait; [WireCodec] is the binary format that ships with
//!  this crate. All numbers are in network byte order (BE):
//!
//! ```ascii
//!  0: flags (u8)
//!     * bit 7-4: message type (1 SEND, 2 ACK, 3 RECEIVED, 4 RELEASE, 5 COMPLETED)
//!     * bit 3:   dup, i.e. this is a retransmission
//!     * bit 2-1: qos (0, 1 or 2)
//!     * bit 0:   reserved, must be 0
//!  1: remaining length (varint u64): number of bytes following this field
//!  *: identifier (u32) - present for all packets except qos 0 SEND
//!  *: payload - SEND only, everything up to the end of the remaining length
//! ```
//!
//! Retry bookkeeping ([crate::protocol::packet::RetrySchedule]) is not part of the wire format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::TryFromPrimitive;
use tracing::error;

use crate::protocol::packet::{MsgType, Packet, PacketId, QoS};


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer ends before the packet is complete: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("unknown message type: {0}")]
    UnknownMsgType(u8),

    #[error("invalid qos: {0}")]
    InvalidQoS(u8),

    #[error("reserved flag bit is set: 0x{0:02x}")]
    ReservedFlagSet(u8),

    #[error("{0:?} packet without identifier")]
    MissingIdentifier(MsgType),

    #[error("{len} unexpected trailing bytes in {msg_type:?} packet")]
    TrailingBytes { msg_type: MsgType, len: usize },
}

/// A packet as it was read from a buffer, together with the number of bytes its encoding
///  occupied there.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DecodedPacket {
    pub packet: Packet,
    pub total_length: usize,
}

pub trait Codec: Send + Sync + 'static {
    fn encode(&self, packet: &Packet, buf: &mut BytesMut);

    fn encoded_len(&self, packet: &Packet) -> usize;

    /// Decodes a single packet starting at `offset`. Bytes after the end of that packet are left
    ///  alone: They belong to the next packet.
    fn decode(&self, buf: &[u8], offset: usize) -> Result<DecodedPacket, DecodeError>;
}


const DUP_FLAG: u8 = 0b1000;
const RESERVED_FLAG: u8 = 0b0001;
const IDENTIFIER_SIZE: usize = std::mem::size_of::<u32>();

#[derive(Debug, Default, Clone, Copy)]
pub struct WireCodec {}

impl WireCodec {
    fn flags(packet: &Packet) -> u8 {
        let msg_type: u8 = packet.msg_type.into();
        let qos: u8 = packet.qos.into();

        let mut flags = (msg_type << 4) | (qos << 1);
        if packet.dup {
            flags |= DUP_FLAG;
        }
        flags
    }

    fn remaining_len(packet: &Packet) -> usize {
        let identifier_len = if Packet::has_identifier_on_wire(packet.msg_type, packet.qos) {
            IDENTIFIER_SIZE
        }
        else {
            0
        };
        let payload_len = match packet.msg_type {
            MsgType::Send => packet.payload.len(),
            _ => 0,
        };
        identifier_len + payload_len
    }

    fn varint_len(value: u64) -> usize {
        let significant_bits = u64::BITS - value.leading_zeros();
        (significant_bits.max(1) as usize).div_ceil(7)
    }
}

impl Codec for WireCodec {
    fn encode(&self, packet: &Packet, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len(packet));

        buf.put_u8(Self::flags(packet));
        buf.put_u64_varint(Self::remaining_len(packet) as u64);

        if Packet::has_identifier_on_wire(packet.msg_type, packet.qos) {
            let identifier = match packet.identifier {
                Some(id) => id,
                None => {
                    error!("encoding {:?} packet without identifier - using 0", packet.msg_type);
                    PacketId(0)
                }
            };
            buf.put_u32(identifier.0);
        }

        if packet.msg_type == MsgType::Send {
            buf.put_slice(&packet.payload);
        }
    }

    fn encoded_len(&self, packet: &Packet) -> usize {
        let remaining_len = Self::remaining_len(packet);
        1 + Self::varint_len(remaining_len as u64) + remaining_len
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<DecodedPacket, DecodeError> {
        let mut cursor = buf.get(offset..).unwrap_or_default();
        let available = cursor.len();

        if !cursor.has_remaining() {
            return Err(DecodeError::Truncated { needed: 1 });
        }
        let flags = cursor.get_u8();

        let raw_msg_type = flags >> 4;
        let msg_type = MsgType::try_from_primitive(raw_msg_type)
            .map_err(|_| DecodeError::UnknownMsgType(raw_msg_type))?;
        let raw_qos = (flags >> 1) & 0b11;
        let qos = QoS::try_from_primitive(raw_qos)
            .map_err(|_| DecodeError::InvalidQoS(raw_qos))?;
        if flags & RESERVED_FLAG != 0 {
            return Err(DecodeError::ReservedFlagSet(flags));
        }
        let dup = flags & DUP_FLAG != 0;

        let remaining_len = VarIntSupport::try_get_u64_varint(&mut cursor)
            .map_err(|_| DecodeError::MalformedRemainingLength)?;
        let remaining_len = usize::try_from(remaining_len)
            .map_err(|_| DecodeError::MalformedRemainingLength)?;
        if cursor.len() < remaining_len {
            return Err(DecodeError::Truncated { needed: remaining_len - cursor.len() });
        }
        let header_len = available - cursor.len();

        let mut body = &cursor[..remaining_len];

        let identifier = if Packet::has_identifier_on_wire(msg_type, qos) {
            if body.remaining() < IDENTIFIER_SIZE {
                return Err(DecodeError::MissingIdentifier(msg_type));
            }
            Some(PacketId(body.get_u32()))
        }
        else {
            None
        };

        let payload = match msg_type {
            MsgType::Send => Bytes::copy_from_slice(body),
            _ if body.is_empty() => Bytes::new(),
            _ => return Err(DecodeError::TrailingBytes { msg_type, len: body.len() }),
        };

        Ok(DecodedPacket {
            packet: Packet {
                msg_type,
                qos,
                dup,
                identifier,
                payload,
                retry: None,
            },
            total_length: header_len + remaining_len,
        })
    }
}


#[cfg(test)]
mod test {
    use rstest::rstest;
    use MsgType::*;
    use QoS::*;

    use super::*;

    fn packet(msg_type: MsgType, qos: QoS, dup: bool, identifier: Option<u32>, payload: &'static [u8]) -> Packet {
        Packet {
            msg_type,
            qos,
            dup,
            identifier: identifier.map(PacketId),
            payload: Bytes::from_static(payload),
            retry: None,
        }
    }

    #[rstest]
    #[case::send_qos0(packet(Send, AtMostOnce, false, None, b"hi"), vec![0x10, 2, b'h', b'i'])]
    #[case::send_qos0_empty(packet(Send, AtMostOnce, false, None, b""), vec![0x10, 0])]
    #[case::send_qos1(packet(Send, AtLeastOnce, false, Some(7), b"abc"), vec![0x12, 7, 0,0,0,7, b'a', b'b', b'c'])]
    #[case::send_qos2_dup(packet(Send, ExactlyOnce, true, Some(1), b""), vec![0x1C, 4, 0,0,0,1])]
    #[case::ack(packet(Ack, AtMostOnce, false, Some(7), b""), vec![0x20, 4, 0,0,0,7])]
    #[case::received(packet(Received, AtMostOnce, false, Some(0x01020304), b""), vec![0x30, 4, 1,2,3,4])]
    #[case::release_dup(packet(Release, AtLeastOnce, true, Some(7), b""), vec![0x4A, 4, 0,0,0,7])]
    #[case::completed(packet(Completed, AtMostOnce, false, Some(256), b""), vec![0x50, 4, 0,0,1,0])]
    fn test_encode(#[case] packet: Packet, #[case] expected: Vec<u8>) {
        let codec = WireCodec::default();

        let mut buf = BytesMut::new();
        codec.encode(&packet, &mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(codec.encoded_len(&packet), expected.len());

        let decoded = codec.decode(&expected, 0).unwrap();
        assert_eq!(decoded, DecodedPacket {
            packet,
            total_length: expected.len(),
        });
    }

    #[test]
    fn test_encode_ignores_payload_of_control_packet() {
        let codec = WireCodec::default();

        let mut buf = BytesMut::new();
        let packet = packet(Ack, AtMostOnce, false, Some(7), b"ignored");
        codec.encode(&packet, &mut buf);
        assert_eq!(buf.as_ref(), &[0x20, 4, 0,0,0,7]);
        assert_eq!(codec.encoded_len(&packet), buf.len());

        let decoded = codec.decode(&buf, 0).unwrap();
        assert_eq!(decoded.packet, Packet { payload: Bytes::new(), ..packet });
        assert_eq!(decoded.total_length, buf.len());
    }

    #[test]
    fn test_decode_long_payload() {
        let codec = WireCodec::default();
        let payload = Bytes::from(vec![0xab; 300]);
        let packet = Packet::send(AtLeastOnce, Some(PacketId(9)), payload);

        let mut buf = BytesMut::new();
        codec.encode(&packet, &mut buf);
        assert_eq!(buf.len(), 1 + 2 + 4 + 300);
        assert_eq!(codec.encoded_len(&packet), buf.len());

        let decoded = codec.decode(&buf, 0).unwrap();
        assert_eq!(decoded.packet, packet);
        assert_eq!(decoded.total_length, buf.len());
    }

    #[rstest]
    #[case::start(vec![0x20, 4, 0,0,0,7, 0x10, 1, b'x'], 0, packet(Ack, AtMostOnce, false, Some(7), b""), 6)]
    #[case::offset(vec![0x20, 4, 0,0,0,7, 0x10, 1, b'x'], 6, packet(Send, AtMostOnce, false, None, b"x"), 3)]
    fn test_decode_at_offset(#[case] buf: Vec<u8>, #[case] offset: usize, #[case] expected: Packet, #[case] total_length: usize) {
        let decoded = WireCodec::default().decode(&buf, offset).unwrap();
        assert_eq!(decoded.packet, expected);
        assert_eq!(decoded.total_length, total_length);
    }

    #[rstest]
    #[case::empty(vec![], 0, DecodeError::Truncated { needed: 1 })]
    #[case::offset_at_end(vec![0x20, 4, 0,0,0,7], 6, DecodeError::Truncated { needed: 1 })]
    #[case::offset_beyond_end(vec![0x20], 5, DecodeError::Truncated { needed: 1 })]
    #[case::no_length(vec![0x20], 0, DecodeError::MalformedRemainingLength)]
    #[case::unterminated_length(vec![0x12, 0x80], 0, DecodeError::MalformedRemainingLength)]
    #[case::unknown_type_0(vec![0x00, 0], 0, DecodeError::UnknownMsgType(0))]
    #[case::unknown_type_6(vec![0x60, 0], 0, DecodeError::UnknownMsgType(6))]
    #[case::invalid_qos(vec![0x16, 0], 0, DecodeError::InvalidQoS(3))]
    #[case::reserved_bit(vec![0x11, 0], 0, DecodeError::ReservedFlagSet(0x11))]
    #[case::truncated_body(vec![0x12, 5, 0,0,0], 0, DecodeError::Truncated { needed: 2 })]
    #[case::missing_identifier(vec![0x12, 2, 0,0], 0, DecodeError::MissingIdentifier(Send))]
    #[case::control_missing_identifier(vec![0x20, 0], 0, DecodeError::MissingIdentifier(Ack))]
    #[case::trailing_bytes(vec![0x20, 5, 0,0,0,7, 9], 0, DecodeError::TrailingBytes { msg_type: Ack, len: 1 })]
    fn test_decode_error(#[case] buf: Vec<u8>, #[case] offset: usize, #[case] expected: DecodeError) {
        assert_eq!(WireCodec::default().decode(&buf, offset), Err(expected));
    }

    #[rstest]
    #[case(0, 1)]
    #[case(127, 1)]
    #[case(128, 2)]
    #[case(16383, 2)]
    #[case(16384, 3)]
    #[case(u64::MAX, 10)]
    fn test_varint_len(#[case] value: u64, #[case] expected: usize) {
        assert_eq!(WireCodec::varint_len(value), expected);

        let mut buf = BytesMut::new();
        buf.put_u64_varint(value);
        assert_eq!(buf.len(), expected);
    }
}
