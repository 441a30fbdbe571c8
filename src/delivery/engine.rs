use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::bail;
use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, error, trace, warn};

use crate::delivery::delivery_config::{CommitFailurePolicy, DeliveryConfig};
use crate::delivery::dispatch::dispatch_packet;
use crate::delivery::handler::DeliveryHandler;
use crate::delivery::retry::arm_retry;
use crate::delivery::scope::Scope;
use crate::delivery::store::PacketStore;
use crate::protocol::codec::{Codec, WireCodec};
use crate::protocol::framing;
use crate::protocol::packet::{Packet, PacketId, QoS};


/// The request-level driver of the protocol. Each request carries a buffer of packets from the
///  peer, and the response carries everything the peer should get: replies, handshake
///  continuations and retransmissions.
///
/// The engine holds no protocol state of its own, everything lives in the [PacketStore]. So
///  a single engine can serve any number of scopes, and requests can be served by different
///  engine instances as long as they share a store.
pub struct DeliveryEngine {
    config: Arc<DeliveryConfig>,
    store: Arc<dyn PacketStore>,
    codec: Arc<dyn Codec>,
}

impl Debug for DeliveryEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliveryEngine{{config:{:?}}}", &self.config)
    }
}

impl DeliveryEngine {
    pub fn new(config: Arc<DeliveryConfig>, store: Arc<dyn PacketStore>) -> anyhow::Result<DeliveryEngine> {
        Self::new_with_codec(config, store, Arc::new(WireCodec::default()))
    }

    pub fn new_with_codec(config: Arc<DeliveryConfig>, store: Arc<dyn PacketStore>, codec: Arc<dyn Codec>) -> anyhow::Result<DeliveryEngine> {
        config.validate()?;
        Ok(DeliveryEngine {
            config,
            store,
            codec,
        })
    }

    /// Handles a single request from the peer, returning the response buffer.
    ///
    /// All packets in `body` are dispatched concurrently, and there is no ordering between them.
    ///  If any of them fails, the request fails as a whole - but only after all of them were
    ///  dispatched. A malformed `body` fails the request before anything is dispatched.
    ///
    /// A request without body is answered with an empty response, without looking at the store.
    ///  An empty body on the other hand is a regular poll for pending packets.
    #[tracing::instrument(skip(self, body, handler))]
    pub async fn ingest(&self, scope: &Scope, body: Option<&[u8]>, handler: &dyn DeliveryHandler) -> anyhow::Result<Bytes> {
        let body = match body {
            Some(body) => body,
            None => return Ok(Bytes::new()),
        };

        let packets = framing::split(self.codec.as_ref(), body)?;
        trace!("received {} packets", packets.len());

        let dispatched = join_all(packets.into_iter()
            .map(|packet| dispatch_packet(self.store.as_ref(), scope, packet, handler))
        ).await;

        let mut first_error = None;
        for result in dispatched {
            if let Err(e) = result {
                warn!("error dispatching packet: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let outbound = self.outbound_packets(scope).await?;
        Ok(framing::combine(self.codec.as_ref(), &outbound))
    }

    async fn outbound_packets(&self, scope: &Scope) -> anyhow::Result<Vec<Packet>> {
        let batch_size = self.config.retry_batch_size;

        let mut unconfirmed = self.store.unconfirmed_packets(scope, batch_size).await?;
        if unconfirmed.len() > batch_size {
            warn!("store returned {} unconfirmed packets for a batch size of {} - sending only the first {}", unconfirmed.len(), batch_size, batch_size);
            unconfirmed.truncate(batch_size);
        }

        let now = SystemTime::now();
        join_all(unconfirmed.into_iter()
            .map(|packet| self.arm_for_sending(scope, packet, now))
        ).await
            .into_iter()
            .collect()
    }

    /// Packets that wait for acknowledgement are replaced by their retransmission, both in the
    ///  store and in the response. This includes their first transmission, which therefore goes
    ///  out with the `dup` flag set. qos 0 packets are sent as they are.
    async fn arm_for_sending(&self, scope: &Scope, packet: Packet, now: SystemTime) -> anyhow::Result<Packet> {
        if Packet::has_identifier_on_wire(packet.msg_type, packet.qos) && packet.identifier.is_none() {
            bail!("store returned {:?} packet with qos {:?} but without identifier", packet.msg_type, packet.qos);
        }

        match arm_retry(&packet, now, self.config.retry_step) {
            Some(retry) => {
                debug!(?scope, "sending {:?} {:?}, attempt {:?}", retry.msg_type, retry.identifier, retry.retry_times());
                self.store.save_packet(scope, &retry).await?;
                Ok(retry)
            }
            None => Ok(packet),
        }
    }

    /// Stores a new message for the peer, returning its identifier. It is sent in the response
    ///  to one of the peer's next requests.
    pub async fn try_commit(&self, scope: &Scope, payload: impl Into<Bytes>, qos: QoS) -> anyhow::Result<PacketId> {
        let identifier = self.store.generate_id(scope).await?;
        let packet = Packet::send(qos, Some(identifier), payload.into());
        self.store.save_packet(scope, &packet).await?;

        trace!(?scope, "committed message {:?} with qos {:?}", identifier, qos);
        Ok(identifier)
    }

    /// This is the fire-and-forget version of [DeliveryEngine::try_commit]: Unless the config
    ///  says otherwise, failure to store the message is logged but not returned.
    pub async fn commit(&self, scope: &Scope, payload: impl Into<Bytes>, qos: QoS) -> anyhow::Result<()> {
        match self.try_commit(scope, payload, qos).await {
            Ok(_) => Ok(()),
            Err(e) => match self.config.commit_failure {
                CommitFailurePolicy::Log => {
                    error!(?scope, "error committing message - dropping it: {}", e);
                    Ok(())
                }
                CommitFailurePolicy::Propagate => Err(e),
            }
        }
    }
}
