use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::delivery::handler::DeliveryHandler;
use crate::delivery::scope::Scope;


/// A [DeliveryHandler] that remembers everything delivered to it
#[derive(Debug, Default)]
pub struct TrackingDeliveryHandler {
    tracker: RwLock<Vec<(Scope, Bytes)>>,
}
impl TrackingDeliveryHandler {
    pub fn new() -> Self {
        Default::default()
    }

    /// returns delivered payloads, clearing the internal buffer
    pub async fn delivered(&self) -> Vec<(Scope, Bytes)> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
    }

    pub async fn assert_delivered(&self, scope: &Scope, payload: &[u8]) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("nothing was delivered");
        }

        let (actual_scope, actual_payload) = lock.remove(0);
        assert_eq!(&actual_scope, scope);
        assert_eq!(actual_payload.as_ref(), payload);
    }

    pub async fn assert_nothing_delivered(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected deliveries: {:?}", *lock);
    }
}

#[async_trait]
impl DeliveryHandler for TrackingDeliveryHandler {
    async fn deliver(&self, scope: &Scope, payload: Bytes) {
        self.tracker.write().await.push((scope.clone(), payload));
    }
}
