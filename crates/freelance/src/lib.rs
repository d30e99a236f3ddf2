//! Freelance pattern: reliable request/reply across several servers.
//!
//! A client connects to any number of independent servers and sends one
//! request at a time. A background agent dispatches it to the server at the
//! head of its active queue, heartbeats every server, and fails over to the
//! next live server when the current one goes silent. The caller only sees
//! a send/receive API.
//!
//! ## Architecture
//!
//! Both halves are split into a frontend the application calls and an agent
//! task that owns the transport socket. They talk over an in-process pipe.
//!
//! - **ClientFrontend** / client agent: server bookkeeping, dispatch,
//!   heartbeats, global request timeout
//! - **ServerFrontend** / server agent: answers heartbeats itself and passes
//!   application requests through with their routing envelope

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ClientFrontend;
pub use config::{load_config, FreelanceConfig};
pub use error::{FreelanceError, FreelanceResult};
pub use freelance_wire::{Bytes, Endpoint, Message};
pub use server::{Envelope, ServerFrontend};
