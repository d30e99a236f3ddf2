//! Client half of the Freelance pattern.
//!
//! [`ClientFrontend`] is what the application holds. Every call is turned
//! into a [`Directive`] for the agent task, which owns the socket and all
//! per-server state.

pub(crate) mod agent;
mod registry;

use crate::config::FreelanceConfig;
use crate::error::{FreelanceError, FreelanceResult};
use agent::ClientAgent;
use freelance_wire::{Endpoint, Message, RouterSocket};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Frontend to agent.
#[derive(Debug)]
pub(crate) enum Directive {
    Connect(Endpoint),
    Request(Message),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Connect(_) => f.write_str("CONNECT"),
            Directive::Request(_) => f.write_str("REQUEST"),
        }
    }
}

/// Agent to frontend: the outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok(Message),
    Failed,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok(_) => f.write_str("OK"),
            Reply::Failed => f.write_str("FAILED"),
        }
    }
}

/// Reliable request/reply client over any number of servers.
///
/// One request may be outstanding at a time. The agent keeps sending it to
/// the first live server until a reply arrives or the global timeout
/// passes, failing over when a server goes silent.
///
/// Must be created inside a tokio runtime.
pub struct ClientFrontend {
    directives: mpsc::Sender<Directive>,
    replies: mpsc::Receiver<Reply>,
    pending: bool,
    connect_grace: Duration,
    agent: JoinHandle<()>,
}

impl ClientFrontend {
    /// Validate the configuration, then spawn the agent task and its socket.
    pub fn new(config: FreelanceConfig) -> FreelanceResult<Self> {
        config.validate()?;
        Ok(Self::spawn(config))
    }

    fn spawn(config: FreelanceConfig) -> Self {
        let capacity = config.pipe_capacity.max(1);
        let (directive_tx, directive_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::channel(capacity);

        let socket = RouterSocket::new(config.socket_config());
        let agent = ClientAgent::new(socket, directive_rx, reply_tx, config.timing());

        Self {
            directives: directive_tx,
            replies: reply_rx,
            pending: false,
            connect_grace: config.connect_grace(),
            agent: tokio::spawn(agent.run()),
        }
    }

    /// Add a server.
    ///
    /// Waits a short grace period so the connection has a chance to come
    /// up before the first request. Does not confirm the server exists.
    pub async fn connect(&self, endpoint: &str) -> FreelanceResult<()> {
        let endpoint: Endpoint = endpoint.parse()?;
        self.dispatch(Directive::Connect(endpoint)).await?;
        tokio::time::sleep(self.connect_grace).await;
        Ok(())
    }

    /// Submit a request. Fails if the previous one has not been received.
    pub async fn send(&mut self, request: Message) -> FreelanceResult<()> {
        if self.pending {
            return Err(FreelanceError::ProtocolViolation(
                "send called while a request is outstanding".into(),
            ));
        }
        self.dispatch(Directive::Request(request)).await?;
        self.pending = true;
        Ok(())
    }

    /// Wait for the reply to the outstanding request.
    ///
    /// Returns [`FreelanceError::RequestTimeout`] when no server answered
    /// in time. The request is finished either way.
    pub async fn receive(&mut self) -> FreelanceResult<Message> {
        if !self.pending {
            return Err(FreelanceError::ProtocolViolation(
                "receive called without an outstanding request".into(),
            ));
        }
        let reply = self.replies.recv().await.ok_or(FreelanceError::Shutdown)?;
        self.pending = false;
        debug!(status = %reply, "Reply from agent");
        match reply {
            Reply::Ok(msg) => Ok(msg),
            Reply::Failed => Err(FreelanceError::RequestTimeout),
        }
    }

    /// Send a request and wait for its reply.
    pub async fn request(&mut self, request: Message) -> FreelanceResult<Message> {
        self.send(request).await?;
        self.receive().await
    }

    /// Stop the agent and wait for it to close its socket.
    pub async fn destroy(self) {
        let Self {
            directives, agent, ..
        } = self;
        drop(directives);
        let _ = agent.await;
    }

    async fn dispatch(&self, directive: Directive) -> FreelanceResult<()> {
        debug!(directive = %directive, "Directive to agent");
        self.directives
            .send(directive)
            .await
            .map_err(|_| FreelanceError::Shutdown)
    }
}

impl Default for ClientFrontend {
    fn default() -> Self {
        Self::spawn(FreelanceConfig::default())
    }
}
