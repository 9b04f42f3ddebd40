//! In-process message router
//!
//! Runs one task per participant and a single control loop that owns every
//! routing decision and the completion set. Deliveries are spawned as their
//! own short-lived tasks so a full inbox never stalls the loop. Once the run
//! completes or aborts, every task it spawned is aborted.

use super::{Participant, Progress};
use crate::{Error, PartyIndex, ProtocolMessage, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default capacity of each participant's inbox
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Run-level knobs
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Abort the run if it has not completed after this long
    pub deadline: Option<Duration>,
    /// Bounded inbox size per participant
    pub inbox_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl RunConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

enum Event<O> {
    Outgoing(ProtocolMessage),
    Finished { party: PartyIndex, output: O },
    Failed { party: PartyIndex, error: Error },
}

/// Run every participant to completion.
///
/// `parties[i]` must carry index `i`. `on_finish` is called from the control
/// loop once per party as its completion is observed; an error from it aborts
/// the run. Returns the outputs ordered by party index, or the first failure.
#[instrument(skip_all, fields(run_id = %Uuid::new_v4(), parties = parties.len()))]
pub async fn run_protocol<P, F>(
    parties: Vec<P>,
    config: &RunConfig,
    mut on_finish: F,
) -> Result<Vec<P::Output>>
where
    P: Participant,
    F: FnMut(PartyIndex, &P::Output) -> Result<()>,
{
    let n = parties.len();
    if n == 0 {
        return Err(Error::InvalidConfig("A run needs at least one party".into()));
    }
    for (position, party) in parties.iter().enumerate() {
        if party.identity().index != position {
            return Err(Error::InvalidConfig(format!(
                "party {} listed at position {}",
                party.identity(),
                position
            )));
        }
    }

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut participants = JoinSet::new();
    let mut inboxes = Vec::with_capacity(n);
    for party in parties {
        let (inbox_tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        inboxes.push(inbox_tx);
        participants.spawn(drive(party, inbox, events_tx.clone()));
    }
    drop(events_tx);

    info!("Run started");

    let deadline = config.deadline.map(|d| Instant::now() + d);
    let mut deliveries = JoinSet::new();
    let mut finished: BTreeMap<PartyIndex, P::Output> = BTreeMap::new();

    let outcome = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = wait_until(deadline) => {
                break Err(Error::Timeout(format!(
                    "{} of {} parties to finish",
                    n - finished.len(),
                    n
                )));
            }
            Some(joined) = participants.join_next(), if !participants.is_empty() => {
                match joined {
                    Err(e) if e.is_panic() => {
                        break Err(Error::Internal("participant task panicked".into()));
                    }
                    _ => continue,
                }
            }
            Some(_) = deliveries.join_next(), if !deliveries.is_empty() => continue,
        };

        let Some(event) = event else {
            break Err(Error::Internal(
                "participants exited without reporting completion".into(),
            ));
        };

        match event {
            Event::Failed { party, error } => {
                error!(party, %error, "Participant failed, aborting run");
                break Err(error);
            }
            Event::Outgoing(message) => {
                if let Err(e) = route(message, &inboxes, &mut deliveries) {
                    error!(error = %e, "Routing failed, aborting run");
                    break Err(e);
                }
            }
            Event::Finished { party, output } => {
                if finished.contains_key(&party) {
                    warn!(party, "Duplicate completion report ignored");
                    continue;
                }
                if let Err(e) = on_finish(party, &output) {
                    break Err(e);
                }
                finished.insert(party, output);
                debug!(party, ended = finished.len(), "Party finished");

                if finished.len() == n {
                    info!(ended = n, "Received results from all participants");
                    break Ok(finished.into_values().collect());
                }
            }
        }
    };

    participants.abort_all();
    deliveries.abort_all();

    outcome
}

/// Dispatch one message: broadcasts go to every party but the sender,
/// targeted messages to their single recipient.
fn route(
    message: ProtocolMessage,
    inboxes: &[mpsc::Sender<ProtocolMessage>],
    deliveries: &mut JoinSet<()>,
) -> Result<usize> {
    if message.from >= inboxes.len() {
        return Err(Error::InvalidPartyId(message.from));
    }

    match message.to {
        None => {
            let mut copies = 0;
            for (to, inbox) in inboxes.iter().enumerate() {
                if to == message.from {
                    continue;
                }
                deliver(deliveries, to, inbox.clone(), message.clone());
                copies += 1;
            }
            Ok(copies)
        }
        Some(to) if to == message.from => Err(Error::SelfAddressed { party: to }),
        Some(to) => {
            let inbox = inboxes.get(to).ok_or(Error::InvalidPartyId(to))?;
            deliver(deliveries, to, inbox.clone(), message);
            Ok(1)
        }
    }
}

fn deliver(
    deliveries: &mut JoinSet<()>,
    to: PartyIndex,
    inbox: mpsc::Sender<ProtocolMessage>,
    message: ProtocolMessage,
) {
    deliveries.spawn(async move {
        let from = message.from;
        if inbox.send(message).await.is_err() {
            debug!(from, to, "Recipient already exited, message dropped");
        }
    });
}

async fn drive<P: Participant>(
    mut party: P,
    mut inbox: mpsc::Receiver<ProtocolMessage>,
    events: mpsc::UnboundedSender<Event<P::Output>>,
) {
    let index = party.identity().index;
    let mut step = party.start().await;

    loop {
        match step {
            Err(error) => {
                let _ = events.send(Event::Failed { party: index, error });
                return;
            }
            Ok(Progress { outgoing, output }) => {
                for message in outgoing {
                    if events.send(Event::Outgoing(message)).is_err() {
                        return;
                    }
                }
                if let Some(output) = output {
                    let _ = events.send(Event::Finished { party: index, output });
                    return;
                }
            }
        }

        let Some(message) = inbox.recv().await else {
            return;
        };
        step = party.update(message).await;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
