//! Transport collaborator and an in-process implementation.
//!
//! The messenger never talks to the network directly. It hands sealed bytes
//! to a [`Transport`] and pulls delivered envelopes back out of it. Delivery
//! order and uniqueness are not guaranteed by any implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use parley_shared::crypto::derive_id;
use parley_shared::UserId;

use crate::clock::TimeSource;

const ENVELOPE_ID_CONTEXT: &str = "parley-envelope-id-v1";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not subscribed to topic {0}")]
    NotSubscribed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

/// A sealed unit of data as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Transport-assigned identifier.
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Transport receive time (ms).
    pub timestamp: u64,
}

pub trait Transport: Send + Sync {
    fn send_private(&self, recipient: &UserId, payload: &[u8]) -> Result<String, TransportError>;

    fn send_public(&self, topic: &str, payload: &[u8]) -> Result<String, TransportError>;

    fn send_group(&self, recipients: &[UserId], payload: &[u8]) -> Result<String, TransportError>;

    /// Drain everything delivered since the last call, grouped by topic.
    fn retrieve_all(&self) -> Result<HashMap<String, Vec<Envelope>>, TransportError>;

    fn join_private(&self, key: &UserId) -> Result<(), TransportError>;

    fn join_public(&self, topic: &str) -> Result<(), TransportError>;

    fn join_group(&self, members: &[UserId]) -> Result<(), TransportError>;

    fn remove_filter(&self, topic: &str) -> Result<(), TransportError>;

    /// Topics currently subscribed to.
    fn filters(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// In-process network
// ---------------------------------------------------------------------------

/// How an outbound payload was addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentTarget {
    Private(UserId),
    Public(String),
    Group(Vec<UserId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub id: String,
    pub target: SentTarget,
    pub payload: Vec<u8>,
}

struct Endpoint {
    identity: UserId,
    topics: BTreeSet<String>,
    inbox: HashMap<String, Vec<Envelope>>,
}

#[derive(Default)]
struct NetworkState {
    endpoints: Vec<Endpoint>,
}

/// A shared in-memory network. Each [`MemoryTransport`] is one endpoint.
///
/// Private and group sends reach every other endpoint of the recipient
/// identity. Public sends reach every other endpoint subscribed to the
/// topic.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new endpoint for `identity`.
    pub fn endpoint(&self, identity: UserId, time: Arc<dyn TimeSource>) -> MemoryTransport {
        let mut state = self.lock();
        let index = state.endpoints.len();
        let mut topics = BTreeSet::new();
        topics.insert(identity.private_topic());
        state.endpoints.push(Endpoint {
            identity,
            topics,
            inbox: HashMap::new(),
        });
        MemoryTransport {
            network: self.clone(),
            index,
            time,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn deliver(
        &self,
        from: usize,
        topic: &str,
        payload: &[u8],
        timestamp: u64,
        accept: impl Fn(&Endpoint) -> bool,
    ) -> String {
        let id = derive_id(ENVELOPE_ID_CONTEXT, &[topic.as_bytes(), payload, &timestamp.to_le_bytes()]);
        let mut state = self.lock();
        let mut delivered = 0;
        for (index, endpoint) in state.endpoints.iter_mut().enumerate() {
            if index == from || !accept(endpoint) {
                continue;
            }
            endpoint
                .inbox
                .entry(topic.to_string())
                .or_default()
                .push(Envelope {
                    id: id.clone(),
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                    timestamp,
                });
            delivered += 1;
        }
        debug!(topic, delivered, "Envelope delivered");
        id
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    index: usize,
    time: Arc<dyn TimeSource>,
    sent: Mutex<Vec<SentRecord>>,
}

impl MemoryTransport {
    /// Every payload this endpoint sent, oldest first.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_sent(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, id: &str, target: SentTarget, payload: &[u8]) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentRecord {
                id: id.to_string(),
                target,
                payload: payload.to_vec(),
            });
    }

    fn deliver_private(&self, recipient: &UserId, payload: &[u8]) -> String {
        let topic = recipient.private_topic();
        self.network.deliver(
            self.index,
            &topic,
            payload,
            self.time.now_ms(),
            |endpoint| endpoint.identity == *recipient,
        )
    }
}

impl Transport for MemoryTransport {
    fn send_private(&self, recipient: &UserId, payload: &[u8]) -> Result<String, TransportError> {
        let id = self.deliver_private(recipient, payload);
        self.record(&id, SentTarget::Private(*recipient), payload);
        Ok(id)
    }

    fn send_public(&self, topic: &str, payload: &[u8]) -> Result<String, TransportError> {
        let id = self.network.deliver(
            self.index,
            topic,
            payload,
            self.time.now_ms(),
            |endpoint| endpoint.topics.contains(topic),
        );
        self.record(&id, SentTarget::Public(topic.to_string()), payload);
        Ok(id)
    }

    fn send_group(&self, recipients: &[UserId], payload: &[u8]) -> Result<String, TransportError> {
        let unique: BTreeSet<UserId> = recipients.iter().copied().collect();
        let mut id = String::new();
        for recipient in &unique {
            id = self.deliver_private(recipient, payload);
        }
        self.record(&id, SentTarget::Group(unique.into_iter().collect()), payload);
        Ok(id)
    }

    fn retrieve_all(&self) -> Result<HashMap<String, Vec<Envelope>>, TransportError> {
        let mut state = self.network.lock();
        let endpoint = state
            .endpoints
            .get_mut(self.index)
            .ok_or(TransportError::Closed)?;
        Ok(std::mem::take(&mut endpoint.inbox))
    }

    fn join_private(&self, key: &UserId) -> Result<(), TransportError> {
        self.join_public(&key.private_topic())
    }

    fn join_public(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let endpoint = state
            .endpoints
            .get_mut(self.index)
            .ok_or(TransportError::Closed)?;
        endpoint.topics.insert(topic.to_string());
        Ok(())
    }

    fn join_group(&self, members: &[UserId]) -> Result<(), TransportError> {
        for member in members {
            self.join_private(member)?;
        }
        Ok(())
    }

    fn remove_filter(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let endpoint = state
            .endpoints
            .get_mut(self.index)
            .ok_or(TransportError::Closed)?;
        if !endpoint.topics.remove(topic) {
            return Err(TransportError::NotSubscribed(topic.to_string()));
        }
        Ok(())
    }

    fn filters(&self) -> Vec<String> {
        let state = self.network.lock();
        state
            .endpoints
            .get(self.index)
            .map(|endpoint| endpoint.topics.iter().cloned().collect())
            .unwrap_or_default()
    }
}
