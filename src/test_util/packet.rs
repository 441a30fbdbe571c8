use bytes::Bytes;

use crate::protocol::codec::WireCodec;
use crate::protocol::framing;
use crate::protocol::packet::{MsgType, Packet, PacketId, QoS};


/// convenience for test code: a SEND packet as it would be received from a peer. `identifier`
///  is ignored for qos 0.
pub fn test_send(qos: QoS, identifier: u32, payload: &'static [u8]) -> Packet {
    Packet::send(qos, Some(PacketId(identifier)), Bytes::from_static(payload))
}

/// convenience for test code: a control packet with the qos the protocol uses for its type, i.e.
///  qos 1 for RELEASE and qos 0 for everything else
pub fn test_control(msg_type: MsgType, identifier: u32) -> Packet {
    let qos = match msg_type {
        MsgType::Release => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    };
    Packet::control(msg_type, qos, PacketId(identifier))
}

/// encodes packets into a single buffer, using [WireCodec]
pub fn test_buffer(packets: &[Packet]) -> Bytes {
    framing::combine(&WireCodec::default(), packets)
}

/// decodes a buffer using [WireCodec], panicking if it is malformed
pub fn test_packets(buf: &[u8]) -> Vec<Packet> {
    framing::split(&WireCodec::default(), buf)
        .unwrap_or_else(|e| panic!("malformed buffer {:?}: {}", buf, e))
}

/// the (msg_type, identifier, dup) of each packet in a buffer - what a peer would act on
pub fn test_summary(buf: &[u8]) -> Vec<(MsgType, Option<PacketId>, bool)> {
    test_packets(buf).iter()
        .map(|p| (p.msg_type, p.identifier, p.dup))
        .collect()
}
