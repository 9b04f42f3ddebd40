//! MPC coordination: the participant contract and the in-process router

use crate::{PartyIdentity, ProtocolMessage, Result};

pub use ::async_trait::async_trait;

/// What a participant produced after being started or fed a message
#[derive(Debug)]
pub struct Progress<O> {
    /// Messages to route; `to == None` broadcasts
    pub outgoing: Vec<ProtocolMessage>,
    /// Set exactly once, when the participant is done
    pub output: Option<O>,
}

impl<O> Progress<O> {
    /// Nothing to send yet
    pub fn idle() -> Self {
        Self {
            outgoing: Vec::new(),
            output: None,
        }
    }

    pub fn send(outgoing: Vec<ProtocolMessage>) -> Self {
        Self {
            outgoing,
            output: None,
        }
    }

    pub fn finish(mut self, output: O) -> Self {
        self.output = Some(output);
        self
    }
}

/// One protocol participant, driven as an opaque state machine.
///
/// The router calls [`Participant::start`] once, then [`Participant::update`]
/// for every message addressed to this party. Messages from the same sender
/// may arrive in any order. A returned error is reported as the run's failure.
#[async_trait]
pub trait Participant: Send + 'static {
    /// Completion result
    type Output: Send + 'static;

    fn identity(&self) -> &PartyIdentity;

    async fn start(&mut self) -> Result<Progress<Self::Output>>;

    async fn update(&mut self, message: ProtocolMessage) -> Result<Progress<Self::Output>>;
}

pub mod router;

pub use router::{run_protocol, RunConfig};

#[cfg(test)]
pub(crate) mod testing;
