//! Freelance wire layer: addressable multipart messaging over TCP.
//!
//! Provides the transport the Freelance client and server agents are built
//! on: a ROUTER-style socket that routes by peer identity, over
//! length-prefixed multipart frames.
//!
//! ## Architecture
//!
//! - **Message**: ordered multipart message of byte frames
//! - **Endpoint**: parsed `tcp://host:port` address
//! - **RouterSocket**: binds and connects, exchanges identities with every
//!   peer, then routes outgoing messages by their first frame

pub mod endpoint;
pub mod error;
pub mod message;
pub mod socket;

pub use bytes::Bytes;
pub use endpoint::Endpoint;
pub use error::WireError;
pub use message::Message;
pub use socket::{RouterSocket, SocketConfig};
