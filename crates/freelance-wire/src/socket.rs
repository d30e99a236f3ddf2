//! RouterSocket: identity-routed multipart messaging over TCP.
//!
//! A [`RouterSocket`] can bind listeners and connect outward any number of
//! times. Every connection starts with a greeting that exchanges identities;
//! afterwards the socket keeps one outbound queue per peer identity.
//!
//! Outgoing messages name their destination in the first frame. Incoming
//! messages arrive with the sender's identity prepended as the first frame.
//! Messages for a peer that is not connected are dropped, and outbound
//! connections are retried until the socket is dropped.

use crate::endpoint::Endpoint;
use crate::error::WireError;
use crate::message::{read_message, write_message, Message};

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Current protocol version, sent in every greeting.
pub const PROTOCOL_VERSION: u32 = 1;

const GREETING_SIGNATURE: &[u8] = b"FLP";

/// Tunables for a [`RouterSocket`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Delay between outbound connection attempts.
    pub reconnect_interval: Duration,
    /// How long a new connection may take to complete its greeting.
    pub handshake_timeout: Duration,
    /// Per-peer outbound queue and shared inbound queue capacity.
    pub queue_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(5),
            queue_capacity: 1000,
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound queue of one live connection.
#[derive(Debug, Clone)]
struct Route {
    connection: u64,
    tx: mpsc::Sender<Message>,
}

type RouteTable = Arc<DashMap<Bytes, Route>>;

/// A ROUTER-style socket.
pub struct RouterSocket {
    identity: Option<Bytes>,
    config: SocketConfig,
    routes: RouteTable,
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: mpsc::Receiver<Message>,
    shutdown_tx: watch::Sender<bool>,
}

impl RouterSocket {
    /// Create a socket with no identity, listeners or connections yet.
    pub fn new(config: SocketConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            identity: None,
            config,
            routes: Arc::new(DashMap::new()),
            inbound_tx,
            inbound_rx,
            shutdown_tx,
        }
    }

    /// Set the identity announced to peers.
    ///
    /// Applies to listeners and connections created afterwards.
    pub fn set_identity(&mut self, identity: impl Into<Bytes>) {
        self.identity = Some(identity.into());
    }

    /// The identity announced to peers, if one has been set or assigned.
    pub fn identity(&self) -> Option<&Bytes> {
        self.identity.as_ref()
    }

    /// Bind a listener and start accepting connections.
    ///
    /// Returns the bound endpoint, with port `0` resolved to the real port.
    /// If no identity was set, the bound endpoint becomes the identity, which
    /// is the address clients route their requests by. A wildcard host is
    /// not an address anyone can connect to, so it needs an explicit
    /// identity.
    pub async fn bind(&mut self, endpoint: &Endpoint) -> Result<Endpoint, WireError> {
        if self.identity.is_none() && endpoint.is_wildcard() {
            return Err(WireError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "wildcard bind requires an explicit identity".into(),
            });
        }
        let listener = TcpListener::bind(endpoint.bind_address()).await?;
        let bound = endpoint.with_port(listener.local_addr()?.port());

        if self.identity.is_none() {
            self.identity = Some(Bytes::from(bound.to_string()));
        }

        info!(endpoint = %bound, "Wire: listening");
        let link = self.link();
        tokio::spawn(link.accept_loop(listener));
        Ok(bound)
    }

    /// Start connecting to an endpoint in the background.
    ///
    /// Returns immediately. The connection is retried every
    /// `reconnect_interval` for as long as the socket lives.
    pub fn connect(&mut self, endpoint: &Endpoint) {
        debug!(endpoint = %endpoint, "Wire: connecting");
        let link = self.link();
        tokio::spawn(link.connect_loop(endpoint.clone()));
    }

    /// Route a message to the peer named by its first frame.
    ///
    /// Returns `Ok(false)` when the message was dropped because the peer is
    /// not connected or its queue is full.
    pub fn send(&self, mut msg: Message) -> Result<bool, WireError> {
        let identity = msg.pop_front().ok_or(WireError::MissingIdentity)?;
        let Some(route) = self.routes.get(&identity).map(|r| r.tx.clone()) else {
            debug!(
                peer = %String::from_utf8_lossy(&identity),
                "Wire: dropping message for unknown peer"
            );
            return Ok(false);
        };

        match route.try_send(msg) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                warn!(
                    peer = %String::from_utf8_lossy(&identity),
                    "Wire: peer queue full, dropping message"
                );
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Ok(false),
        }
    }

    /// Receive the next inbound message, sender identity first.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbound_rx.recv().await
    }

    /// Whether a connected peer currently announces this identity.
    pub fn is_connected(&self, identity: &[u8]) -> bool {
        self.routes.contains_key(identity)
    }

    /// Number of peers with a live connection.
    pub fn peer_count(&self) -> usize {
        self.routes.len()
    }

    fn link(&mut self) -> Link {
        let identity = self
            .identity
            .get_or_insert_with(|| Bytes::from(uuid::Uuid::new_v4().to_string()))
            .clone();
        Link {
            identity,
            config: self.config.clone(),
            routes: Arc::clone(&self.routes),
            inbound: self.inbound_tx.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        }
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Everything a background connection task needs from its socket.
#[derive(Clone)]
struct Link {
    identity: Bytes,
    config: SocketConfig,
    routes: RouteTable,
    inbound: mpsc::Sender<Message>,
    shutdown: watch::Receiver<bool>,
}

impl Link {
    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_requested(self.shutdown.clone()) => break,
            };
            match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "Wire: accepted connection");
                    let link = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = link.serve(stream, None).await {
                            debug!(%addr, error = %e, "Wire: inbound connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Wire: accept error");
                    tokio::time::sleep(self.config.reconnect_interval).await;
                }
            }
        }
        debug!("Wire: listener closed");
    }

    async fn connect_loop(self, endpoint: Endpoint) {
        while !*self.shutdown.borrow() {
            tokio::select! {
                result = self.dial(&endpoint) => match result {
                    Ok(()) => debug!(endpoint = %endpoint, "Wire: connection closed"),
                    Err(e) => debug!(endpoint = %endpoint, error = %e, "Wire: connection failed"),
                },
                _ = shutdown_requested(self.shutdown.clone()) => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = shutdown_requested(self.shutdown.clone()) => break,
            }
        }
    }

    async fn dial(&self, endpoint: &Endpoint) -> Result<(), WireError> {
        let stream = TcpStream::connect(endpoint.address()).await?;
        self.serve(stream, Some(endpoint)).await
    }

    /// Greet the peer, register its route and pump messages until either
    /// side closes.
    async fn serve(&self, stream: TcpStream, dialed: Option<&Endpoint>) -> Result<(), WireError> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let peer = tokio::time::timeout(
            self.config.handshake_timeout,
            exchange_greeting(&mut reader, &mut writer, &self.identity),
        )
        .await
        .map_err(|_| WireError::HandshakeFailed("greeting timed out".into()))??;

        let peer_name = String::from_utf8_lossy(&peer).into_owned();
        if let Some(endpoint) = dialed {
            if peer.as_ref() != endpoint.to_string().as_bytes() {
                warn!(
                    endpoint = %endpoint,
                    peer = %peer_name,
                    "Wire: peer identity differs from the endpoint it was reached at"
                );
            }
        }

        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let connection = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        if self
            .routes
            .insert(peer.clone(), Route { connection, tx })
            .is_some()
        {
            debug!(peer = %peer_name, "Wire: replacing existing route");
        }
        info!(peer = %peer_name, "Wire: peer connected");

        let result = tokio::select! {
            r = pump_inbound(&mut reader, &peer, &self.inbound) => r,
            r = pump_outbound(&mut writer, &mut rx) => r,
            _ = shutdown_requested(self.shutdown.clone()) => Ok(()),
        };

        self.routes
            .remove_if(&peer, |_, route| route.connection == connection);
        info!(peer = %peer_name, "Wire: peer disconnected");
        result
    }
}

/// Resolves once the owning socket is dropped.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn greeting(identity: &Bytes) -> Message {
    let mut msg = Message::new();
    msg.push_back(Bytes::from_static(GREETING_SIGNATURE));
    msg.push_back(PROTOCOL_VERSION.to_string());
    msg.push_back(identity.clone());
    msg
}

/// Validate a peer greeting and return the identity it announces.
fn parse_greeting(mut msg: Message) -> Result<Bytes, WireError> {
    match msg.pop_front() {
        Some(sig) if sig.as_ref() == GREETING_SIGNATURE => {}
        _ => {
            return Err(WireError::HandshakeFailed(
                "peer did not send a greeting".into(),
            ))
        }
    }

    let version = msg.pop_front_str().unwrap_or_default();
    if version != PROTOCOL_VERSION.to_string() {
        return Err(WireError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: version,
        });
    }

    match msg.pop_front() {
        Some(identity) if !identity.is_empty() => Ok(identity),
        _ => Err(WireError::HandshakeFailed(
            "greeting carries no identity".into(),
        )),
    }
}

async fn exchange_greeting(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    identity: &Bytes,
) -> Result<Bytes, WireError> {
    write_message(writer, &greeting(identity)).await?;
    let reply = read_message(reader).await?;
    parse_greeting(reply)
}

async fn pump_inbound(
    reader: &mut OwnedReadHalf,
    peer: &Bytes,
    inbound: &mpsc::Sender<Message>,
) -> Result<(), WireError> {
    loop {
        let mut msg = match read_message(reader).await {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        msg.push_front(peer.clone());
        if inbound.send(msg).await.is_err() {
            return Ok(());
        }
    }
}

async fn pump_outbound(
    writer: &mut OwnedWriteHalf,
    rx: &mut mpsc::Receiver<Message>,
) -> Result<(), WireError> {
    while let Some(msg) = rx.recv().await {
        write_message(writer, &msg).await?;
    }
    Ok(())
}
