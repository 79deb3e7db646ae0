use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncRead;

use crate::callbacks::{CallbackTable, Dispatch};
use crate::packet::Packet;
use crate::{ErrorKind, RconError};

/// Receive side of a connection: routes incoming packets to the requests waiting for them.
pub(crate) struct Engine {
    authenticated: AtomicBool,
    callbacks: CallbackTable,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            authenticated: AtomicBool::new(false),
            callbacks: CallbackTable::new(),
        }
    }

    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub(crate) fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Reads packets until the connection fails, then fails every pending request with the cause.
    ///
    /// Only one of these may run per connection, the order of packets on the wire is what makes
    /// confirmation packets work.
    pub async fn run<R: AsyncRead + Unpin>(&self, mut reader: R) -> crate::Error {
        if !self.is_authenticated() {
            let err = crate::Error::from(RconError::NotAuthenticated);
            self.callbacks.fail_all(err.kind(), &err.to_string());
            return err;
        }

        loop {
            let packet = match Packet::read_from(&mut reader).await {
                Ok(packet) => packet,
                Err(err) => {
                    let err = crate::Error::from(err);
                    match err.kind() {
                        ErrorKind::TransportClosed => warn!("Connection closed: {}", err),
                        _ => error!("Encountered an error processing packets. Stopping. {}", err),
                    }

                    let failed = self.callbacks.fail_all(err.kind(), &err.to_string());
                    if failed > 0 {
                        debug!("Failed {} pending requests", failed);
                    }
                    return err;
                }
            };

            debug!(
                "Packet received; id: {}, type: {}, body size: {}",
                packet.id,
                packet.packet_type.0,
                packet.body_size()
            );

            let id = packet.id;
            if self.callbacks.dispatch(packet) == Dispatch::Orphan {
                warn!("Callback for ID {} not registered, dropping packet", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    fn response(id: i32, body: &str) -> Vec<u8> {
        Packet::new(PacketType::RESPONSE_VALUE, id, body).encode()
    }

    #[tokio::test]
    async fn multi_packet_response_is_delivered_once() {
        let engine = Arc::new(Engine::new());
        engine.set_authenticated();
        let mut pending = engine.callbacks().register(10000).unwrap();

        let (client, mut server) = tokio::io::duplex(4096);
        let reader = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(client).await }
        });

        server.write_all(&response(10000, "first ")).await.unwrap();
        server.write_all(&response(10000, "second")).await.unwrap();
        server.write_all(&response(10001, "Map: Gorodok")).await.unwrap();
        server.write_all(&response(10001, "Map: Gorodok")).await.unwrap();

        assert_eq!(pending.response(None).await.unwrap(), "first second");
        assert_eq!(engine.callbacks().len(), 0);

        drop(server);
        let err = reader.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::TransportClosed);
    }

    #[tokio::test]
    async fn orphan_packets_are_skipped() {
        let engine = Arc::new(Engine::new());
        engine.set_authenticated();
        let mut pending = engine.callbacks().register(10002).unwrap();

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(client).await }
        });

        server.write_all(&response(1, "someone else")).await.unwrap();
        server.write_all(&response(10000, "abandoned")).await.unwrap();
        server.write_all(&response(10002, "mine")).await.unwrap();
        server.write_all(&response(10003, "")).await.unwrap();

        assert_eq!(pending.response(None).await.unwrap(), "mine");
    }

    #[tokio::test]
    async fn malformed_packet_fails_pending_requests() {
        let engine = Arc::new(Engine::new());
        engine.set_authenticated();
        let mut pending = engine.callbacks().register(10000).unwrap();

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(client).await }
        });

        server.write_all(&response(10000, "partial")).await.unwrap();
        server.write_all(&100_000i32.to_le_bytes()).await.unwrap();

        let err = pending.response(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPacket);
        assert!(engine.callbacks().is_closed());
    }

    #[tokio::test]
    async fn truncated_packet_is_transport_error() {
        let engine = Arc::new(Engine::new());
        engine.set_authenticated();
        let mut pending = engine.callbacks().register(10000).unwrap();

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(client).await }
        });

        let packet = response(10000, "cut short");
        server.write_all(&packet[..packet.len() - 3]).await.unwrap();
        drop(server);

        let err = pending.response(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }

    #[tokio::test]
    async fn refuses_to_run_before_authentication() {
        let engine = Engine::new();
        let (client, _server) = tokio::io::duplex(64);

        let err = engine.run(client).await;
        assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
        assert!(engine.callbacks().is_closed());
    }
}
