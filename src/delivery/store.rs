use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::delivery::scope::Scope;
use crate::protocol::packet::{Packet, PacketId};


/// This trait decouples durable protocol state from the delivery engine: the engine itself is
///  stateless between requests, everything that must survive a request lives here.
///
/// All operations are scoped, and implementations must make `confirm_packet` and
///  `release_packet` atomic per identifier - the engine dispatches packets of a single request
///  concurrently and does no locking of its own.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketStore: Send + Sync + 'static {
    /// returns an identifier that is not in use by any in-flight exchange of this scope
    async fn generate_id(&self, scope: &Scope) -> anyhow::Result<PacketId>;

    /// Stores a packet for (re)transmission. A packet with qos >= 1 replaces a previously
    ///  stored packet with the same identifier.
    async fn save_packet(&self, scope: &Scope, packet: &Packet) -> anyhow::Result<()>;

    /// Records the payload of an exactly-once SEND until it is released. Retransmissions of
    ///  the same SEND must not overwrite or duplicate the record.
    async fn receive_packet(&self, scope: &Scope, identifier: PacketId, payload: Bytes) -> anyhow::Result<()>;

    /// The stored packet with this identifier is acknowledged and must not be retransmitted
    ///  anymore. Confirming an unknown identifier is not an error.
    async fn confirm_packet(&self, scope: &Scope, identifier: PacketId) -> anyhow::Result<()>;

    /// Removes and returns a payload previously recorded by `receive_packet`, or `None` if there
    ///  is none (e.g. because it was released before).
    async fn release_packet(&self, scope: &Scope, identifier: PacketId) -> anyhow::Result<Option<Bytes>>;

    /// Returns up to `limit` packets that are due for (re)transmission.
    async fn unconfirmed_packets(&self, scope: &Scope, limit: usize) -> anyhow::Result<Vec<Packet>>;
}
