use anyhow::anyhow;
use tracing::{debug, trace};

use crate::delivery::handler::DeliveryHandler;
use crate::delivery::scope::Scope;
use crate::delivery::store::PacketStore;
use crate::protocol::packet::{MsgType, Packet, PacketId, QoS};


/// Reacts to a single received packet: updates the store, stores the reply (if any) for the
///  next response, and hands payload to the application when the protocol says it is delivered.
///
/// ```ascii
///  received             store                                reply                delivery
///  SEND qos 0           -                                    -                    immediately
///  SEND qos 1           -                                    ACK                  after ACK is stored
///  SEND qos 2           receive(id, payload)                 RECEIVED             -
///  ACK                  confirm(id)                          -                    -
///  RECEIVED             confirm(id)                          RELEASE (qos 1)      -
///  RELEASE              release(id)                          COMPLETED            if not released before
///  COMPLETED            confirm(id)                          -                    -
/// ```
///
/// Replies are stored rather than returned: they reach the peer through the store's unconfirmed
///  packets, together with retransmissions.
pub async fn dispatch_packet(store: &dyn PacketStore, scope: &Scope, packet: Packet, handler: &dyn DeliveryHandler) -> anyhow::Result<()> {
    trace!(?scope, "dispatching {:?}", packet);

    match packet.msg_type {
        MsgType::Send => on_send(store, scope, packet, handler).await,
        MsgType::Ack => {
            store.confirm_packet(scope, required_identifier(&packet)?).await
        }
        MsgType::Received => {
            let identifier = required_identifier(&packet)?;
            store.confirm_packet(scope, identifier).await?;
            store.save_packet(scope, &Packet::control(MsgType::Release, QoS::AtLeastOnce, identifier)).await
        }
        MsgType::Release => {
            let identifier = required_identifier(&packet)?;
            match store.release_packet(scope, identifier).await? {
                Some(payload) => handler.deliver(scope, payload).await,
                None => debug!(?scope, "duplicate RELEASE for {:?} - payload was delivered before", identifier),
            }
            // NB: COMPLETED is sent for duplicates as well, otherwise the peer would keep retrying
            store.save_packet(scope, &Packet::control(MsgType::Completed, QoS::AtMostOnce, identifier)).await
        }
        MsgType::Completed => {
            store.confirm_packet(scope, required_identifier(&packet)?).await
        }
    }
}

async fn on_send(store: &dyn PacketStore, scope: &Scope, packet: Packet, handler: &dyn DeliveryHandler) -> anyhow::Result<()> {
    match packet.qos {
        QoS::AtMostOnce => {
            handler.deliver(scope, packet.payload).await;
        }
        QoS::AtLeastOnce => {
            let identifier = required_identifier(&packet)?;
            // delivery only after the ACK is stored: if storing fails, the peer retries
            store.save_packet(scope, &Packet::control(MsgType::Ack, QoS::AtMostOnce, identifier)).await?;
            handler.deliver(scope, packet.payload).await;
        }
        QoS::ExactlyOnce => {
            let identifier = required_identifier(&packet)?;
            store.receive_packet(scope, identifier, packet.payload).await?;
            store.save_packet(scope, &Packet::control(MsgType::Received, QoS::AtMostOnce, identifier)).await?;
        }
    }
    Ok(())
}

fn required_identifier(packet: &Packet) -> anyhow::Result<PacketId> {
    packet.identifier
        .ok_or_else(|| anyhow!("{:?} packet with qos {:?} has no identifier", packet.msg_type, packet.qos))
}


#[cfg(test)]
mod test {
    use anyhow::anyhow;
    use bytes::Bytes;
    use mockall::predicate::eq;
    use mockall::Sequence;

    use crate::delivery::handler::MockDeliveryHandler;
    use crate::delivery::store::MockPacketStore;
    use crate::test_util::packet::{test_control, test_send};

    use super::*;

    fn scope() -> Scope {
        Scope::new("peer-1")
    }

    fn expect_saved(store: &mut MockPacketStore, expected: Packet, seq: &mut Sequence) {
        store.expect_save_packet()
            .with(eq(scope()), eq(expected))
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(()));
    }

    #[tokio::test]
    async fn test_send_qos0_delivers_without_store() {
        let store = MockPacketStore::new();
        let mut handler = MockDeliveryHandler::new();
        handler.expect_deliver()
            .with(eq(scope()), eq(Bytes::from_static(b"fire")))
            .times(1)
            .return_const(());

        dispatch_packet(&store, &scope(), test_send(QoS::AtMostOnce, 0, b"fire"), &handler).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_qos1_delivers_after_storing_ack() {
        let mut seq = Sequence::new();
        let mut store = MockPacketStore::new();
        let mut handler = MockDeliveryHandler::new();

        expect_saved(&mut store, test_control(MsgType::Ack, 4), &mut seq);
        handler.expect_deliver()
            .with(eq(scope()), eq(Bytes::from_static(b"once or more")))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        dispatch_packet(&store, &scope(), test_send(QoS::AtLeastOnce, 4, b"once or more"), &handler).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_qos1_does_not_deliver_if_ack_is_not_stored() {
        let mut store = MockPacketStore::new();
        store.expect_save_packet()
            .returning(|_, _| Err(anyhow!("disk full")));
        let mut handler = MockDeliveryHandler::new();
        handler.expect_deliver().never();

        let result = dispatch_packet(&store, &scope(), test_send(QoS::AtLeastOnce, 4, b"x"), &handler).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_qos2_records_payload_and_replies_received() {
        let mut seq = Sequence::new();
        let mut store = MockPacketStore::new();
        let mut handler = MockDeliveryHandler::new();
        handler.expect_deliver().never();

        store.expect_receive_packet()
            .with(eq(scope()), eq(PacketId(7)), eq(Bytes::from_static(b"exactly once")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        expect_saved(&mut store, test_control(MsgType::Received, 7), &mut seq);

        dispatch_packet(&store, &scope(), test_send(QoS::ExactlyOnce, 7, b"exactly once"), &handler).await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_confirms() {
        let mut store = MockPacketStore::new();
        store.expect_confirm_packet()
            .with(eq(scope()), eq(PacketId(11)))
            .times(1)
            .returning(|_, _| Ok(()));

        dispatch_packet(&store, &scope(), test_control(MsgType::Ack, 11), &MockDeliveryHandler::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_received_confirms_and_replies_release() {
        let mut seq = Sequence::new();
        let mut store = MockPacketStore::new();
        store.expect_confirm_packet()
            .with(eq(scope()), eq(PacketId(7)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        expect_saved(&mut store, test_control(MsgType::Release, 7), &mut seq);

        dispatch_packet(&store, &scope(), test_control(MsgType::Received, 7), &MockDeliveryHandler::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_received_does_not_reply_if_confirm_fails() {
        let mut store = MockPacketStore::new();
        store.expect_confirm_packet()
            .returning(|_, _| Err(anyhow!("connection reset")));

        let result = dispatch_packet(&store, &scope(), test_control(MsgType::Received, 7), &MockDeliveryHandler::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_release_delivers_and_replies_completed() {
        let mut seq = Sequence::new();
        let mut store = MockPacketStore::new();
        let mut handler = MockDeliveryHandler::new();

        store.expect_release_packet()
            .with(eq(scope()), eq(PacketId(7)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(Bytes::from_static(b"P"))));
        handler.expect_deliver()
            .with(eq(scope()), eq(Bytes::from_static(b"P")))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        expect_saved(&mut store, test_control(MsgType::Completed, 7), &mut seq);

        dispatch_packet(&store, &scope(), test_control(MsgType::Release, 7), &handler).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_release_replies_completed_without_delivery() {
        let mut seq = Sequence::new();
        let mut store = MockPacketStore::new();
        let mut handler = MockDeliveryHandler::new();
        handler.expect_deliver().never();

        store.expect_release_packet()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        expect_saved(&mut store, test_control(MsgType::Completed, 7), &mut seq);

        dispatch_packet(&store, &scope(), test_control(MsgType::Release, 7), &handler).await.unwrap();
    }

    #[tokio::test]
    async fn test_completed_confirms() {
        let mut store = MockPacketStore::new();
        store.expect_confirm_packet()
            .with(eq(scope()), eq(PacketId(3)))
            .times(1)
            .returning(|_, _| Ok(()));

        dispatch_packet(&store, &scope(), test_control(MsgType::Completed, 3), &MockDeliveryHandler::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_identifier_is_rejected_without_store_access() {
        let packet = Packet {
            identifier: None,
            ..test_send(QoS::ExactlyOnce, 1, b"x")
        };

        let result = dispatch_packet(&MockPacketStore::new(), &scope(), packet, &MockDeliveryHandler::new()).await;
        assert!(result.is_err());
    }
}
