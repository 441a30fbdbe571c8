use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::protocol::packet::{Packet, QoS, RetrySchedule};


/// Creates the retransmission of a packet that is still waiting for acknowledgement, scheduled
///  for the retransmission after it. Returns `None` for qos 0 packets which are never retried.
///
/// The n-th retransmission is due `n * step` after `now`. The result always has its `dup` flag
///  set, so the wire representation depends only on the packet's identity and not on how often
///  it was armed before.
pub fn arm_retry(packet: &Packet, now: SystemTime, step: Duration) -> Option<Packet> {
    if packet.qos == QoS::AtMostOnce {
        return None;
    }

    let retry_times = match packet.retry_times() {
        Some(n) if n > 0 => n.saturating_add(1),
        _ => 1,
    };

    let due = match now.checked_add(step.saturating_mul(retry_times)) {
        Some(due) => due,
        None => {
            warn!("retry time for {:?} {:?} overflows - scheduling it immediately", packet.msg_type, packet.identifier);
            now
        }
    };

    Some(Packet {
        msg_type: packet.msg_type,
        qos: packet.qos,
        dup: true,
        identifier: packet.identifier,
        payload: packet.payload.clone(),
        retry: Some(RetrySchedule { retry_times, due }),
    })
}
