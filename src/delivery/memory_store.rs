use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::delivery::scope::Scope;
use crate::delivery::store::PacketStore;
use crate::protocol::packet::{Packet, PacketId, QoS};


#[derive(Default)]
struct ScopeState {
    last_id: u32,
    /// qos 0 packets are sent once and then forgotten
    outbox: VecDeque<Packet>,
    /// packets waiting for acknowledgement, by identifier
    in_flight: BTreeMap<PacketId, Packet>,
    /// exactly-once payloads that were received but not released yet
    received: FxHashMap<PacketId, Bytes>,
}

impl ScopeState {
    fn next_free_id(&mut self) -> Option<PacketId> {
        // among len+1 consecutive candidates, at least one is not in flight
        for _ in 0..=self.in_flight.len() {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id == 0 {
                self.last_id = 1;
            }

            let candidate = PacketId(self.last_id);
            if !self.in_flight.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}


/// A [PacketStore] that keeps everything in memory. This is useful for testing and for
///  applications where protocol state does not need to survive a restart.
#[derive(Default)]
pub struct MemoryPacketStore {
    scopes: RwLock<FxHashMap<Scope, ScopeState>>,
}

impl MemoryPacketStore {
    pub fn new() -> MemoryPacketStore {
        Default::default()
    }
}

#[async_trait]
impl PacketStore for MemoryPacketStore {
    async fn generate_id(&self, scope: &Scope) -> anyhow::Result<PacketId> {
        self.scopes.write().await
            .entry(scope.clone())
            .or_default()
            .next_free_id()
            .ok_or_else(|| anyhow!("no free packet identifier left in {:?}", scope))
    }

    async fn save_packet(&self, scope: &Scope, packet: &Packet) -> anyhow::Result<()> {
        let mut lock = self.scopes.write().await;
        let state = lock.entry(scope.clone()).or_default();

        if packet.qos == QoS::AtMostOnce {
            state.outbox.push_back(packet.clone());
            return Ok(());
        }

        let identifier = packet.identifier
            .ok_or_else(|| anyhow!("cannot track {:?} packet without identifier", packet.msg_type))?;
        if let Some(prev) = state.in_flight.insert(identifier, packet.clone()) {
            trace!(?scope, "replacing {:?} {:?} with {:?}", prev.msg_type, identifier, packet.msg_type);
        }
        Ok(())
    }

    async fn receive_packet(&self, scope: &Scope, identifier: PacketId, payload: Bytes) -> anyhow::Result<()> {
        self.scopes.write().await
            .entry(scope.clone())
            .or_default()
            .received
            .entry(identifier)
            .or_insert(payload);
        Ok(())
    }

    async fn confirm_packet(&self, scope: &Scope, identifier: PacketId) -> anyhow::Result<()> {
        if let Some(state) = self.scopes.write().await.get_mut(scope) {
            state.in_flight.remove(&identifier);
        }
        Ok(())
    }

    async fn release_packet(&self, scope: &Scope, identifier: PacketId) -> anyhow::Result<Option<Bytes>> {
        Ok(self.scopes.write().await
            .get_mut(scope)
            .and_then(|state| state.received.remove(&identifier)))
    }

    async fn unconfirmed_packets(&self, scope: &Scope, limit: usize) -> anyhow::Result<Vec<Packet>> {
        let mut lock = self.scopes.write().await;
        let state = match lock.get_mut(scope) {
            Some(state) => state,
            None => return Ok(Vec::new()),
        };

        let num_from_outbox = limit.min(state.outbox.len());
        let mut result = state.outbox.drain(..num_from_outbox).collect::<Vec<_>>();

        let now = SystemTime::now();
        result.extend(state.in_flight.values()
            .filter(|p| p.is_due(now))
            .take(limit - num_from_outbox)
            .cloned());

        Ok(result)
    }
}
