//! Server agent: owns the socket, answers heartbeats, relays requests.

use crate::protocol::{PING, PONG};
use bytes::Bytes;
use freelance_wire::{Endpoint, Message, RouterSocket, WireError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Frontend to agent.
#[derive(Debug)]
pub(crate) enum ServerDirective {
    /// Identity announced to clients on later connections.
    Ident(Bytes),
    /// Listen on an endpoint; the bound endpoint or the error comes back.
    Bind(Endpoint, oneshot::Sender<Result<Endpoint, WireError>>),
    /// `[identity, control, ...payload]` to send back to a client.
    Reply(Message),
}

pub(crate) struct ServerAgent {
    socket: RouterSocket,
    directives: mpsc::Receiver<ServerDirective>,
    requests: mpsc::Sender<Message>,
}

impl ServerAgent {
    pub fn new(
        socket: RouterSocket,
        directives: mpsc::Receiver<ServerDirective>,
        requests: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            socket,
            directives,
            requests,
        }
    }

    /// Run until the frontend goes away, then close the socket.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                directive = self.directives.recv() => match directive {
                    Some(directive) => self.handle_directive(directive).await,
                    None => break,
                },
                msg = self.socket.recv() => match msg {
                    Some(msg) => {
                        if !self.handle_inbound(msg) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("Server agent stopped");
    }

    async fn handle_directive(&mut self, directive: ServerDirective) {
        match directive {
            ServerDirective::Ident(identity) => {
                info!(identity = %String::from_utf8_lossy(&identity), "Server identity set");
                self.socket.set_identity(identity);
            }
            ServerDirective::Bind(endpoint, done) => {
                let result = self.socket.bind(&endpoint).await;
                if let Err(e) = &result {
                    warn!(endpoint = %endpoint, error = %e, "Bind failed");
                }
                let _ = done.send(result);
            }
            ServerDirective::Reply(msg) => self.transmit(msg),
        }
    }

    /// Returns false once the frontend has stopped listening.
    ///
    /// Never waits on the frontend, so heartbeats are answered while it is
    /// busy. Requests that find the pipe full are dropped and left to the
    /// client's timeout.
    fn handle_inbound(&mut self, mut msg: Message) -> bool {
        let (Some(identity), Some(control)) = (msg.pop_front(), msg.pop_front()) else {
            warn!("Inbound message without envelope, dropping");
            return true;
        };

        if control.as_ref() == PING {
            let pong = Message::from_frames([identity, Bytes::from_static(PONG)]);
            self.transmit(pong);
            return true;
        }

        msg.push_front(control);
        msg.push_front(identity);
        match self.requests.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                let peer = msg.front().map(|id| String::from_utf8_lossy(id).into_owned());
                warn!(peer = ?peer, "Frontend pipe full, dropping request");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn transmit(&self, msg: Message) {
        let peer = msg
            .front()
            .map(|id| String::from_utf8_lossy(id).into_owned())
            .unwrap_or_default();
        match self.socket.send(msg) {
            Ok(true) => {}
            Ok(false) => debug!(peer = %peer, "Client gone, reply dropped"),
            Err(e) => warn!(error = %e, "Reply not sent"),
        }
    }
}
