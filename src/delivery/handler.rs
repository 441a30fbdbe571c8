use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::delivery::scope::Scope;


/// The application's side of the protocol: received payloads are passed here once the protocol
///  considers them delivered.
///
/// This is a blocking call from the engine's perspective, holding up the request that carried
///  the payload. Non-trivial work should be offloaded.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, scope: &Scope, payload: Bytes);
}
