//! Server half of the Freelance pattern.
//!
//! Heartbeats are answered by the agent and never reach the application.
//! Requests come up with their routing envelope stripped; the envelope is
//! kept until the matching reply goes out.

pub(crate) mod agent;

use crate::config::FreelanceConfig;
use crate::error::{FreelanceError, FreelanceResult};
use agent::{ServerAgent, ServerDirective};
use bytes::Bytes;
use freelance_wire::{Endpoint, Message, RouterSocket, WireError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Routing metadata of the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    identity: Bytes,
    control: Bytes,
}

impl Envelope {
    /// Identity of the client that sent the request.
    pub fn identity(&self) -> &Bytes {
        &self.identity
    }

    /// Control word, the client's sequence number.
    pub fn control(&self) -> &Bytes {
        &self.control
    }
}

/// Serves one request at a time: receive, then send the reply.
///
/// Must be created inside a tokio runtime.
pub struct ServerFrontend {
    directives: mpsc::Sender<ServerDirective>,
    requests: mpsc::Receiver<Message>,
    envelope: Option<Envelope>,
    agent: JoinHandle<()>,
}

impl ServerFrontend {
    /// Validate the configuration, then spawn the agent task and its socket.
    pub fn new(config: FreelanceConfig) -> FreelanceResult<Self> {
        config.validate()?;
        Ok(Self::spawn(config))
    }

    fn spawn(config: FreelanceConfig) -> Self {
        let capacity = config.pipe_capacity.max(1);
        let (directive_tx, directive_rx) = mpsc::channel(capacity);
        let (request_tx, request_rx) = mpsc::channel(capacity);

        let socket = RouterSocket::new(config.socket_config());
        let agent = ServerAgent::new(socket, directive_rx, request_tx);

        Self {
            directives: directive_tx,
            requests: request_rx,
            envelope: None,
            agent: tokio::spawn(agent.run()),
        }
    }

    /// Set the identity clients route by. Call before [`bind`](Self::bind).
    pub async fn set_identity(&self, identity: impl Into<Bytes>) -> FreelanceResult<()> {
        self.dispatch(ServerDirective::Ident(identity.into())).await
    }

    /// Listen on an endpoint and return it with the port resolved.
    ///
    /// Without an explicit identity, the returned endpoint is the identity,
    /// so clients must connect to exactly that string. Binding `tcp://*:port`
    /// therefore requires [`set_identity`](Self::set_identity) first.
    pub async fn bind(&self, endpoint: &str) -> FreelanceResult<Endpoint> {
        let endpoint: Endpoint = endpoint.parse()?;
        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(ServerDirective::Bind(endpoint, done_tx)).await?;
        let bound = done_rx.await.map_err(|_| FreelanceError::Shutdown)??;
        Ok(bound)
    }

    /// Wait for the next request and return its payload.
    pub async fn receive(&mut self) -> FreelanceResult<Message> {
        if self.envelope.is_some() {
            return Err(FreelanceError::ProtocolViolation(
                "receive called before replying to the previous request".into(),
            ));
        }
        let mut msg = self.requests.recv().await.ok_or(FreelanceError::Shutdown)?;
        let (Some(identity), Some(control)) = (msg.pop_front(), msg.pop_front()) else {
            return Err(WireError::MissingIdentity.into());
        };
        self.envelope = Some(Envelope { identity, control });
        Ok(msg)
    }

    /// Reply to the request returned by the last [`receive`](Self::receive).
    pub async fn send(&mut self, mut reply: Message) -> FreelanceResult<()> {
        let Some(envelope) = self.envelope.take() else {
            return Err(FreelanceError::ProtocolViolation(
                "send called without a request to reply to".into(),
            ));
        };
        reply.push_front(envelope.control);
        reply.push_front(envelope.identity);
        self.dispatch(ServerDirective::Reply(reply)).await
    }

    /// Envelope of the request awaiting a reply.
    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Stop the agent and wait for it to close its socket.
    pub async fn destroy(self) {
        let Self {
            directives, agent, ..
        } = self;
        drop(directives);
        let _ = agent.await;
    }

    async fn dispatch(&self, directive: ServerDirective) -> FreelanceResult<()> {
        self.directives
            .send(directive)
            .await
            .map_err(|_| FreelanceError::Shutdown)
    }
}

impl Default for ServerFrontend {
    fn default() -> Self {
        Self::spawn(FreelanceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freelance_wire::SocketConfig;
    use std::time::Duration;

    fn frames(parts: &[&str]) -> Message {
        parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect()
    }

    async fn connected_peer(server: &Endpoint) -> RouterSocket {
        let mut peer = RouterSocket::new(SocketConfig::default());
        peer.set_identity("tester");
        peer.connect(server);
        let identity = server.to_string();
        for _ in 0..500 {
            if peer.is_connected(identity.as_bytes()) {
                return peer;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never connected to {server}");
    }

    async fn next(peer: &mut RouterSocket) -> Message {
        tokio::time::timeout(Duration::from_secs(5), peer.recv())
            .await
            .expect("timed out")
            .expect("socket closed")
    }

    #[tokio::test]
    async fn test_bind_resolves_port() {
        let server = ServerFrontend::default();
        let bound = server.bind("tcp://127.0.0.1:0").await.unwrap();
        assert_eq!(bound.host(), "127.0.0.1");
        assert_ne!(bound.port(), 0);
        server.destroy().await;
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_endpoint() {
        let server = ServerFrontend::default();
        assert!(server.bind("udp://127.0.0.1:0").await.is_err());
        server.destroy().await;
    }

    #[tokio::test]
    async fn test_wildcard_bind_without_identity_is_rejected() {
        let server = ServerFrontend::default();
        let err = server.bind("tcp://*:0").await.unwrap_err();
        assert!(matches!(
            err,
            FreelanceError::Wire(WireError::InvalidEndpoint { .. })
        ));
        server.destroy().await;
    }

    #[tokio::test]
    async fn test_wildcard_bind_serves_by_identity() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let loopback = Endpoint::new("127.0.0.1", port);

        let mut server = ServerFrontend::default();
        server.set_identity(loopback.to_string()).await.unwrap();
        let bound = server.bind(&format!("tcp://*:{port}")).await.unwrap();
        assert_eq!(bound.port(), port);

        let mut client = crate::ClientFrontend::new(FreelanceConfig {
            connect_grace_ms: 10,
            ..FreelanceConfig::default()
        })
        .unwrap();
        client.connect(&loopback.to_string()).await.unwrap();

        let pending = tokio::spawn(async move {
            let reply = client.request(Message::from_frames(["hello"])).await;
            client.destroy().await;
            reply
        });
        let request = tokio::time::timeout(Duration::from_secs(5), server.receive())
            .await
            .unwrap()
            .unwrap();
        server.send(request).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.unwrap(), Message::from_frames(["hello"]));
        server.destroy().await;
    }

    #[test]
    fn test_new_rejects_zero_ttl() {
        let config = FreelanceConfig {
            server_ttl_ms: 0,
            ..FreelanceConfig::default()
        };
        assert!(matches!(
            ServerFrontend::new(config).err(),
            Some(FreelanceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_send_without_request_is_violation() {
        let mut server = ServerFrontend::default();
        let err = server.send(Message::from_frames(["OK"])).await.unwrap_err();
        assert!(matches!(err, FreelanceError::ProtocolViolation(_)));
        server.destroy().await;
    }

    #[tokio::test]
    async fn test_ping_answered_and_request_relayed() {
        let mut server = ServerFrontend::default();
        let bound = server.bind("tcp://127.0.0.1:0").await.unwrap();
        let identity = bound.to_string();
        let mut peer = connected_peer(&bound).await;

        peer.send(frames(&[identity.as_str(), "PING"])).unwrap();
        assert_eq!(
            next(&mut peer).await,
            frames(&[identity.as_str(), "PONG"])
        );

        peer.send(frames(&[identity.as_str(), "7", "hello"])).unwrap();
        let request = tokio::time::timeout(Duration::from_secs(5), server.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request, Message::from_frames(["hello"]));
        let envelope = server.envelope().unwrap().clone();
        assert_eq!(envelope.identity().as_ref(), b"tester");
        assert_eq!(envelope.control().as_ref(), b"7");

        let err = server.receive().await.unwrap_err();
        assert!(matches!(err, FreelanceError::ProtocolViolation(_)));

        server.send(Message::from_frames(["world"])).await.unwrap();
        assert!(server.envelope().is_none());
        assert_eq!(
            next(&mut peer).await,
            frames(&[identity.as_str(), "7", "world"])
        );
        server.destroy().await;
    }

    #[tokio::test]
    async fn test_explicit_identity_is_announced() {
        let server = ServerFrontend::default();
        server.set_identity("tcp://public.example:5555").await.unwrap();
        let bound = server.bind("tcp://127.0.0.1:0").await.unwrap();

        let mut peer = RouterSocket::new(SocketConfig::default());
        peer.connect(&bound);
        for _ in 0..500 {
            if peer.is_connected(b"tcp://public.example:5555") {
                server.destroy().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server identity never announced");
    }
}
