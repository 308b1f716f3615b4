#[cfg(test)]
mod tests {
    use crate::cluster::types::NodeId;
    use crate::mutex::protocol::{
        MutexMessage, RequestBroadcast, TOPIC_CRITICAL_SECTION, TOPIC_CRITICAL_SECTION_TOKEN,
        TokenTransfer,
    };
    use crate::mutex::types::Token;
    use crate::node::runtime::Inbound;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::udp::UdpTransport;
    use crate::transport::{Envelope, Outbound, Outbox, Transport, spawn_outbound_worker};

    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn request(sender: u32, number: u64) -> MutexMessage {
        MutexMessage::Request(RequestBroadcast {
            sender_id: NodeId(sender),
            request_number: number,
        })
    }

    fn transfer(sender: u32, destination: u32) -> MutexMessage {
        MutexMessage::Token(TokenTransfer {
            sender_id: NodeId(sender),
            destination_id: NodeId(destination),
            token: Some(Token::bootstrap(3)),
        })
    }

    async fn next_envelope(inbox: &mut mpsc::UnboundedReceiver<Inbound>) -> Envelope {
        match tokio::time::timeout(WAIT, inbox.recv()).await {
            Ok(Some(Inbound::Message(envelope))) => envelope,
            Ok(Some(Inbound::Submit(_))) => panic!("expected a protocol message"),
            Ok(None) => panic!("inbox closed"),
            Err(_) => panic!("timed out waiting for a message"),
        }
    }

    // ============================================================
    // Outbox
    // ============================================================

    #[test]
    fn test_outbox_preserves_order() {
        let (outbox, mut outbound) = Outbox::channel();

        outbox.broadcast(request(1, 1), TOPIC_CRITICAL_SECTION);
        outbox.dispatch(transfer(1, 2), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(2));

        assert_eq!(
            outbound.try_recv().unwrap(),
            Outbound::Broadcast {
                topic: TOPIC_CRITICAL_SECTION,
                message: request(1, 1),
            }
        );

        let second = outbound.try_recv().unwrap();
        assert_eq!(second.topic(), TOPIC_CRITICAL_SECTION_TOKEN);
        assert!(matches!(
            second,
            Outbound::Dispatch { destination, .. } if destination == NodeId(2)
        ));
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn test_outbox_closed_does_not_panic() {
        let (outbox, outbound) = Outbox::channel();
        drop(outbound);

        outbox.broadcast(request(1, 1), TOPIC_CRITICAL_SECTION);
        outbox.dispatch(transfer(1, 2), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(2));
    }

    #[test]
    fn test_envelope_bincode() {
        let envelope = Envelope::new(transfer(2, 3), TOPIC_CRITICAL_SECTION_TOKEN);

        let bytes = bincode::serialize(&envelope).unwrap();
        let decoded: Envelope = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.topic, decoded.message.topic());
    }

    // ============================================================
    // Memory transport
    // ============================================================

    #[tokio::test]
    async fn test_memory_broadcast_skips_sender() {
        let network = MemoryNetwork::new();
        let mut inboxes = Vec::new();
        for id in NodeId::all(3) {
            let (sender, receiver) = mpsc::unbounded_channel();
            network.attach(id, sender);
            inboxes.push(receiver);
        }

        network
            .transport(NodeId(1))
            .broadcast(&request(1, 4), TOPIC_CRITICAL_SECTION)
            .await
            .unwrap();

        assert!(inboxes[0].try_recv().is_err(), "sender received its own broadcast");
        for inbox in inboxes.iter_mut().skip(1) {
            let envelope = next_envelope(inbox).await;
            assert_eq!(envelope.topic, TOPIC_CRITICAL_SECTION);
            assert_eq!(envelope.message, request(1, 4));
        }
    }

    #[tokio::test]
    async fn test_memory_dispatch_to_unknown_node_fails() {
        let network = MemoryNetwork::new();
        let (sender, _receiver) = mpsc::unbounded_channel();
        network.attach(NodeId(1), sender);

        let result = network
            .transport(NodeId(1))
            .dispatch(&transfer(1, 2), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(2))
            .await;

        assert!(result.unwrap_err().to_string().contains("No route to node-2"));
    }

    #[tokio::test]
    async fn test_memory_detach_stops_delivery() {
        let network = MemoryNetwork::new();
        let (sender, _receiver) = mpsc::unbounded_channel();
        network.attach(NodeId(2), sender);
        network.detach(NodeId(2));

        let result = network
            .transport(NodeId(1))
            .dispatch(&transfer(1, 2), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(2))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_outbound_worker_delivers_in_order() {
        let network = MemoryNetwork::new();
        let (sender, mut inbox) = mpsc::unbounded_channel();
        network.attach(NodeId(2), sender);

        let (outbox, outbound) = Outbox::channel();
        let transport: Arc<dyn Transport> = network.transport(NodeId(1));
        let worker = spawn_outbound_worker(transport, outbound);

        outbox.broadcast(request(1, 1), TOPIC_CRITICAL_SECTION);
        // No route: logged and skipped, the worker keeps going.
        outbox.dispatch(transfer(1, 3), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(3));
        outbox.dispatch(transfer(1, 2), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(2));

        assert_eq!(next_envelope(&mut inbox).await.message, request(1, 1));
        assert_eq!(next_envelope(&mut inbox).await.message, transfer(1, 2));

        drop(outbox);
        tokio::time::timeout(WAIT, worker)
            .await
            .expect("worker did not stop after the outbox closed")
            .unwrap();
    }

    // ============================================================
    // UDP transport
    // ============================================================

    #[tokio::test]
    async fn test_udp_dispatch_delivers_envelope() {
        let sender = UdpTransport::bind(NodeId(1), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let receiver = UdpTransport::bind(NodeId(2), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        sender.add_peer(NodeId(2), receiver.local_addr().unwrap());

        let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
        receiver.spawn_receiver(inbox_tx);

        sender
            .dispatch(&transfer(1, 2), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(2))
            .await
            .unwrap();

        let envelope = next_envelope(&mut inbox).await;
        assert_eq!(envelope.topic, TOPIC_CRITICAL_SECTION_TOKEN);
        assert_eq!(envelope.message, transfer(1, 2));
    }

    #[tokio::test]
    async fn test_udp_dispatch_without_address_fails() {
        let transport = UdpTransport::bind(NodeId(1), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let result = transport
            .dispatch(&transfer(1, 4), TOPIC_CRITICAL_SECTION_TOKEN, NodeId(4))
            .await;

        assert!(result.unwrap_err().to_string().contains("node-4"));
    }

    #[tokio::test]
    async fn test_udp_receiver_skips_malformed_datagram() {
        let receiver = UdpTransport::bind(NodeId(2), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let target = receiver.local_addr().unwrap();
        let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
        receiver.spawn_receiver(inbox_tx);

        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[0xff, 0x00, 0x13], target).await.unwrap();

        let valid = bincode::serialize(&Envelope::new(request(1, 9), TOPIC_CRITICAL_SECTION))
            .unwrap();
        raw.send_to(&valid, target).await.unwrap();

        let envelope = next_envelope(&mut inbox).await;
        assert_eq!(envelope.message, request(1, 9));
    }
}
