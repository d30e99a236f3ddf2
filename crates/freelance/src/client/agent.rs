//! Client agent: the background half of [`ClientFrontend`](super::ClientFrontend).
//!
//! [`ClientState`] holds all protocol state and is driven with explicit
//! instants, so every transition can be tested without a network or a
//! clock. [`ClientAgent`] is the event loop around it: it waits on the
//! frontend pipe, the socket and the next deadline, feeds what arrived into
//! the state, and performs the sends the state asks for.

use super::registry::ServerRegistry;
use super::{Directive, Reply};
use crate::config::Timing;
use crate::error::{FreelanceError, FreelanceResult};
use crate::protocol::{encode_sequence, parse_sequence, PONG};
use freelance_wire::{Endpoint, Message, RouterSocket};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Upper bound on how long the loop sleeps when nothing is scheduled.
const MAX_IDLE: Duration = Duration::from_secs(3600);

/// The single request in flight.
#[derive(Debug)]
struct OutstandingRequest {
    sequence: u64,
    payload: Message,
    expires: Instant,
    /// Server the payload was last sent to.
    dispatched_to: Option<usize>,
}

/// What one pass over the deadlines produced.
#[derive(Debug, Default)]
pub(crate) struct Actions {
    /// Messages for the socket, destination identity first.
    pub outbound: Vec<Message>,
    /// Reply for the frontend, if the request resolved.
    pub reply: Option<Reply>,
}

#[derive(Debug)]
pub(crate) struct ClientState {
    timing: Timing,
    servers: ServerRegistry,
    sequence: u64,
    request: Option<OutstandingRequest>,
}

impl ClientState {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            servers: ServerRegistry::default(),
            sequence: 0,
            request: None,
        }
    }

    /// Start tracking a server. Returns false if it is already known.
    pub fn connect(&mut self, endpoint: &Endpoint, now: Instant) -> bool {
        match self.servers.register(endpoint.to_string(), now, &self.timing) {
            Some(_) => {
                info!(endpoint = %endpoint, servers = self.servers.len(), "Connecting to server");
                true
            }
            None => {
                warn!(endpoint = %endpoint, "Already connected, ignoring");
                false
            }
        }
    }

    /// Accept a new request. Fails if one is already outstanding.
    pub fn submit(&mut self, payload: Message, now: Instant) -> FreelanceResult<u64> {
        if let Some(request) = &self.request {
            return Err(FreelanceError::ProtocolViolation(format!(
                "request {} is still outstanding",
                request.sequence
            )));
        }
        self.sequence += 1;
        self.request = Some(OutstandingRequest {
            sequence: self.sequence,
            payload,
            expires: now + self.timing.global_timeout,
            dispatched_to: None,
        });
        debug!(sequence = self.sequence, "Request submitted");
        Ok(self.sequence)
    }

    /// Handle `[identity, control, ...payload]` from a server.
    ///
    /// Any traffic refreshes the sender's liveness. Returns the reply to
    /// forward when the message answers the outstanding request.
    pub fn on_message(&mut self, mut msg: Message, now: Instant) -> Option<Reply> {
        let identity = msg.pop_front_str()?;
        let Some(id) = self.servers.position(&identity) else {
            warn!(peer = %identity, "Message from unknown server, dropping");
            return None;
        };
        if self.servers.touch(id, now, &self.timing) {
            info!(endpoint = %identity, "Server is back");
        }

        let Some(control) = msg.pop_front() else {
            warn!(endpoint = %identity, "Message without control frame, dropping");
            return None;
        };
        if control.as_ref() == PONG {
            return None;
        }

        let sequence = parse_sequence(&control);
        match &self.request {
            Some(request) if sequence == Some(request.sequence) => {
                debug!(endpoint = %identity, sequence = request.sequence, "Reply received");
                self.request = None;
                Some(Reply::Ok(msg))
            }
            _ => {
                debug!(
                    endpoint = %identity,
                    control = %String::from_utf8_lossy(&control),
                    "Dropping stale reply"
                );
                None
            }
        }
    }

    /// Run the deadline checks: request timeout, dispatch and heartbeats.
    pub fn tick(&mut self, now: Instant) -> Actions {
        let mut actions = Actions::default();

        let timed_out = matches!(&self.request, Some(request) if now >= request.expires);
        if timed_out {
            if let Some(request) = self.request.take() {
                warn!(sequence = request.sequence, "No server replied in time");
            }
            actions.reply = Some(Reply::Failed);
        } else if let Some(request) = &mut self.request {
            for id in self.servers.prune_expired(now) {
                if let Some(record) = self.servers.get(id) {
                    warn!(endpoint = %record.endpoint, "Server expired");
                }
                if request.dispatched_to == Some(id) {
                    request.dispatched_to = None;
                }
            }
            if let Some(head) = self.servers.head() {
                if request.dispatched_to != Some(head) {
                    if let Some(record) = self.servers.get(head) {
                        let mut msg = request.payload.clone();
                        msg.push_front(encode_sequence(request.sequence));
                        msg.push_front(record.endpoint.clone());
                        debug!(endpoint = %record.endpoint, sequence = request.sequence, "Dispatching");
                        actions.outbound.push(msg);
                        request.dispatched_to = Some(head);
                    }
                }
            }
        }

        actions
            .outbound
            .extend(self.servers.due_pings(now, &self.timing));
        actions
    }

    /// When the loop must wake next: the request deadline or a heartbeat.
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        let mut wake = now + MAX_IDLE;
        if let Some(request) = &self.request {
            wake = wake.min(request.expires);
        }
        if let Some(ping_at) = self.servers.next_ping() {
            wake = wake.min(ping_at);
        }
        wake
    }

    #[cfg(test)]
    fn outstanding(&self) -> Option<u64> {
        self.request.as_ref().map(|r| r.sequence)
    }
}

enum Event {
    Directive(Directive),
    Inbound(Message),
    Wake,
}

pub(crate) struct ClientAgent {
    socket: RouterSocket,
    directives: mpsc::Receiver<Directive>,
    replies: mpsc::Sender<Reply>,
    state: ClientState,
}

impl ClientAgent {
    pub fn new(
        socket: RouterSocket,
        directives: mpsc::Receiver<Directive>,
        replies: mpsc::Sender<Reply>,
        timing: Timing,
    ) -> Self {
        Self {
            socket,
            directives,
            replies,
            state: ClientState::new(timing),
        }
    }

    /// Run until the frontend closes the pipe.
    pub async fn run(mut self) {
        loop {
            let wake = self.state.next_wakeup(Instant::now());
            let event = tokio::select! {
                directive = self.directives.recv() => match directive {
                    Some(directive) => Event::Directive(directive),
                    None => break,
                },
                msg = self.socket.recv() => match msg {
                    Some(msg) => Event::Inbound(msg),
                    None => break,
                },
                _ = sleep_until(wake) => Event::Wake,
            };

            let now = Instant::now();
            let mut reply = None;
            match event {
                Event::Directive(Directive::Connect(endpoint)) => {
                    if self.state.connect(&endpoint, now) {
                        self.socket.connect(&endpoint);
                    }
                }
                Event::Directive(Directive::Request(payload)) => {
                    if let Err(e) = self.state.submit(payload, now) {
                        warn!(error = %e, "Dropping request");
                    }
                }
                Event::Inbound(msg) => reply = self.state.on_message(msg, now),
                Event::Wake => {}
            }

            let actions = self.state.tick(now);
            for msg in actions.outbound {
                if let Err(e) = self.socket.send(msg) {
                    warn!(error = %e, "Send failed");
                }
            }
            if let Some(reply) = reply.or(actions.reply) {
                if self.replies.send(reply).await.is_err() {
                    break;
                }
            }
        }
        debug!("Client agent stopped");
    }
}
