//! Scripted participants for router tests

use super::{async_trait, Participant, Progress};
use crate::{Error, PartyIdentity, PartyIndex, ProtocolMessage, Result, ShareId};

#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Finish on start without sending anything
    Finish,
    /// Broadcast once on start, then finish
    BroadcastAndFinish,
    /// Broadcast once on start, finish after receiving this many messages
    BroadcastThenCollect(usize),
    /// Finish after receiving this many messages
    Collect(usize),
    /// Send one targeted message on start, then finish
    SendTo(PartyIndex),
    /// Fail on start
    Fail,
    /// Fail on the first received message
    FailOnReceive,
}

pub struct Scripted {
    identity: PartyIdentity,
    script: Script,
    received: Vec<ProtocolMessage>,
}

impl Scripted {
    pub fn new(index: PartyIndex, script: Script) -> Self {
        let mut identity = PartyIdentity::new((index + 1).to_string(), ShareId::from(index as u64 + 1));
        identity.index = index;
        Self {
            identity,
            script,
            received: Vec::new(),
        }
    }

    fn me(&self) -> PartyIndex {
        self.identity.index
    }

    fn failure(&self) -> Error {
        Error::Protocol {
            party: self.me(),
            reason: "scripted failure".into(),
        }
    }
}

#[async_trait]
impl Participant for Scripted {
    type Output = Vec<ProtocolMessage>;

    fn identity(&self) -> &PartyIdentity {
        &self.identity
    }

    async fn start(&mut self) -> Result<Progress<Self::Output>> {
        let me = self.me();
        match self.script {
            Script::Finish => Ok(Progress::idle().finish(Vec::new())),
            Script::BroadcastAndFinish => {
                let msg = ProtocolMessage::broadcast(me, 1, &me)?;
                Ok(Progress::send(vec![msg]).finish(Vec::new()))
            }
            Script::BroadcastThenCollect(_) => {
                let msg = ProtocolMessage::broadcast(me, 1, &me)?;
                Ok(Progress::send(vec![msg]))
            }
            Script::SendTo(to) => {
                let msg = ProtocolMessage::direct(me, to, 1, &me)?;
                Ok(Progress::send(vec![msg]).finish(Vec::new()))
            }
            Script::Fail => Err(self.failure()),
            Script::Collect(_) | Script::FailOnReceive => Ok(Progress::idle()),
        }
    }

    async fn update(&mut self, message: ProtocolMessage) -> Result<Progress<Self::Output>> {
        self.received.push(message);
        match self.script {
            Script::FailOnReceive => Err(self.failure()),
            Script::Collect(k) | Script::BroadcastThenCollect(k) if self.received.len() >= k => {
                Ok(Progress::idle().finish(std::mem::take(&mut self.received)))
            }
            _ => Ok(Progress::idle()),
        }
    }
}
