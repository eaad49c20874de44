//! Topic-based broadcast hub.
//!
//! Fanout to live session connections. Delivery is fire-and-forget per
//! subscriber: a full or disconnected queue drops that subscriber instead
//! of blocking the publisher, and empty topics are pruned as a side effect
//! of publish/unsubscribe.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::core::{Address, StreamId};
use crate::error::{Effect, Transience};

use super::messages::ServerMessage;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Stream(StreamId),
    Dashboard(Address),
    Withdrawals(Address),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Stream(id) => write!(f, "stream:{id}"),
            Topic::Dashboard(addr) => write!(f, "dashboard:{addr}"),
            Topic::Withdrawals(addr) => write!(f, "withdrawals:{addr}"),
        }
    }
}

/// Subscriber handle. Dropping the handle (or its receiver) makes the next
/// publish to the topic unregister it.
pub struct Subscription {
    pub id: u64,
    pub topic: Topic,
    receiver: Receiver<ServerMessage>,
}

impl Subscription {
    pub fn recv(&self) -> Result<ServerMessage, crossbeam::channel::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<ServerMessage, crossbeam::channel::TryRecvError> {
        self.receiver.try_recv()
    }
}

struct SubscriberSlot {
    id: u64,
    sender: Sender<ServerMessage>,
}

#[derive(Default)]
struct HubState {
    topics: HashMap<Topic, Vec<SubscriberSlot>>,
    next_id: u64,
}

/// Shared pub/sub fanout. One connection may hold many subscriptions.
pub struct BroadcastHub {
    state: Mutex<HubState>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        BroadcastHub {
            state: Mutex::new(HubState::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Result<Subscription, HubError> {
        let (sender, receiver) = crossbeam::channel::bounded(self.queue_capacity);
        let mut state = self.state.lock().map_err(|_| HubError::LockPoisoned)?;
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state
            .topics
            .entry(topic.clone())
            .or_default()
            .push(SubscriberSlot { id, sender });
        Ok(Subscription {
            id,
            topic,
            receiver,
        })
    }

    /// Remove one subscriber from a topic; prunes the topic when empty.
    pub fn unsubscribe(&self, topic: &Topic, subscriber_id: u64) -> Result<(), HubError> {
        let mut state = self.state.lock().map_err(|_| HubError::LockPoisoned)?;
        if let Some(slots) = state.topics.get_mut(topic) {
            slots.retain(|slot| slot.id != subscriber_id);
            if slots.is_empty() {
                state.topics.remove(topic);
            }
        }
        Ok(())
    }

    /// Deliver to every live subscriber of `topic`. No subscribers is a
    /// no-op. Slow or closed subscribers are dropped, never retried.
    pub fn publish(&self, topic: &Topic, message: ServerMessage) -> Result<usize, HubError> {
        let mut state = self.state.lock().map_err(|_| HubError::LockPoisoned)?;
        let Some(slots) = state.topics.get_mut(topic) else {
            return Ok(0);
        };

        let mut delivered = 0usize;
        slots.retain(|slot| match slot.sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(topic = %topic, subscriber = slot.id, "dropping lagged subscriber");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if slots.is_empty() {
            state.topics.remove(topic);
        }
        Ok(delivered)
    }

    pub fn subscriber_count(&self, topic: &Topic) -> Result<usize, HubError> {
        let state = self.state.lock().map_err(|_| HubError::LockPoisoned)?;
        Ok(state.topics.get(topic).map_or(0, Vec::len))
    }

    pub fn topic_count(&self) -> Result<usize, HubError> {
        let state = self.state.lock().map_err(|_| HubError::LockPoisoned)?;
        Ok(state.topics.len())
    }
}

#[derive(Debug, Error, Clone)]
pub enum HubError {
    #[error("hub lock poisoned")]
    LockPoisoned,
}

impl HubError {
    pub fn transience(&self) -> Transience {
        Transience::Unknown
    }

    pub fn effect(&self) -> Effect {
        Effect::Unknown
    }
}
