//! Message-bus transport seam
//!
//! The agent only needs four things from the bus: start it, ask whether it is
//! up, subscribe, publish. Connection changes and inbound messages come back
//! as [`LinkEvent`]s that the host feeds into the agent from its run loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport already started")]
    AlreadyStarted,
    #[error("request for `{topic}` rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Transport callbacks, queued onto the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

pub trait Transport: Send {
    /// Starts connecting. Completion is reported as [`LinkEvent::Connected`].
    fn connect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;
}
