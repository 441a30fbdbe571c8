use std::fmt::{Debug, Formatter};
use std::time::SystemTime;

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};


/// The kind of a packet, i.e. its role in the acknowledgement handshake.
///
/// SEND carries application payload. All other kinds are control packets that refer to a SEND
///  by its [PacketId]:
/// * qos 1: SEND -> ACK
/// * qos 2: SEND -> RECEIVED -> RELEASE -> COMPLETED
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MsgType {
    Send = 1,
    Ack = 2,
    Received = 3,
    Release = 4,
    Completed = 5,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum QoS {
    /// fire and forget
    AtMostOnce = 0,
    /// SEND is retried until it is ACKed, so the receiver may see it more than once
    AtLeastOnce = 1,
    /// two-phase handshake, deduplicated on the receiving side
    ExactlyOnce = 2,
}

/// Correlates a SEND with the control packets of its handshake. Identifiers are generated by
///  the store and are unique per scope for as long as an exchange is in flight.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PacketId(pub u32);

impl Debug for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for PacketId {
    fn from(value: u32) -> Self {
        PacketId(value)
    }
}


/// Retransmission bookkeeping. This is not part of a packet's wire representation, it travels
///  with the packet through the store.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetrySchedule {
    /// number of retransmissions so far, >= 1
    pub retry_times: u32,
    /// the packet becomes eligible for its next retransmission at this point
    pub due: SystemTime,
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Packet {
    pub msg_type: MsgType,
    pub qos: QoS,
    pub dup: bool,
    pub identifier: Option<PacketId>,
    pub payload: Bytes,
    pub retry: Option<RetrySchedule>,
}

impl Packet {
    pub fn send(qos: QoS, identifier: Option<PacketId>, payload: Bytes) -> Packet {
        let identifier = match qos {
            QoS::AtMostOnce => None,
            _ => identifier,
        };

        Packet {
            msg_type: MsgType::Send,
            qos,
            dup: false,
            identifier,
            payload,
            retry: None,
        }
    }

    /// Creates a payload-less control packet, i.e. anything except SEND.
    pub fn control(msg_type: MsgType, qos: QoS, identifier: PacketId) -> Packet {
        debug_assert_ne!(msg_type, MsgType::Send);

        Packet {
            msg_type,
            qos,
            dup: false,
            identifier: Some(identifier),
            payload: Bytes::new(),
            retry: None,
        }
    }

    /// qos 0 SEND is the only kind of packet that is sent without identifier
    pub fn has_identifier_on_wire(msg_type: MsgType, qos: QoS) -> bool {
        !(msg_type == MsgType::Send && qos == QoS::AtMostOnce)
    }

    pub fn retry_times(&self) -> Option<u32> {
        self.retry.map(|r| r.retry_times)
    }

    /// 'due' means that there is no scheduled retransmission time in the future
    pub fn is_due(&self, now: SystemTime) -> bool {
        match self.retry {
            None => true,
            Some(r) => r.due <= now,
        }
    }
}
