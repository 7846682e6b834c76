//! In-process broker.
//!
//! Subjects are matched exactly. Every queue group bound to a subject gets
//! one copy of each envelope, handed to its members in turn.

use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::transport::{
    Connector, Envelope, Subscription, SubscriptionId, Transport, SUBSCRIPTION_CAPACITY,
};
use crate::config::NodeConfig;
use crate::error::{NavError, Result};

struct Member {
    id: SubscriptionId,
    connection: u64,
    sender: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct QueueGroup {
    members: Vec<Member>,
    cursor: usize,
}

impl QueueGroup {
    /// Next live member in rotation; members whose receiver is gone are pruned.
    fn next_member(&mut self) -> Option<&Member> {
        self.members.retain(|m| !m.sender.is_closed());
        if self.members.is_empty() {
            return None;
        }
        let index = self.cursor % self.members.len();
        self.cursor = index + 1;
        self.members.get(index)
    }
}

#[derive(Default)]
struct BrokerState {
    shut_down: bool,
    next_id: u64,
    /// subject -> queue group -> members
    subjects: HashMap<String, HashMap<String, QueueGroup>>,
}

impl BrokerState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove_where(&mut self, predicate: impl Fn(&Member) -> bool) {
        for groups in self.subjects.values_mut() {
            for group in groups.values_mut() {
                group.members.retain(|m| !predicate(m));
            }
            groups.retain(|_, group| !group.members.is_empty());
        }
        self.subjects.retain(|_, groups| !groups.is_empty());
    }
}

/// Server URLs with this scheme select the in-process broker
pub const MEMORY_SCHEME: &str = "memory://";

/// True when every server in the list names the in-process broker.
pub fn is_memory_url(servers: &[String]) -> bool {
    !servers.is_empty() && servers.iter().all(|s| s.starts_with(MEMORY_SCHEME))
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop the broker: existing subscriptions end, later connects and
    /// publishes fail.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.subjects.clear();
        info!("Memory broker shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Number of members bound to `subject` across all of its groups.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.lock()
            .subjects
            .get(subject)
            .map(|groups| groups.values().map(|g| g.members.len()).sum())
            .unwrap_or(0)
    }

    /// Open a connection without going through a [`NodeConfig`].
    pub fn open(&self) -> Result<Arc<MemoryConnection>> {
        let mut state = self.lock();
        if state.shut_down {
            return Err(NavError::Connection("broker is shut down".into()));
        }
        let id = state.allocate_id();
        Ok(Arc::new(MemoryConnection {
            id,
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

impl Connector for MemoryBroker {
    fn connect<'a>(&'a self, config: &'a NodeConfig) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        async move {
            if config.servers.is_empty() {
                return Err(NavError::Connection(format!(
                    "no servers configured for node '{}'",
                    config.name
                )));
            }
            let connection = self.open()?;
            debug!(
                "Node '{}' connected to memory broker ({})",
                config.name,
                config.servers.join(",")
            );
            Ok(connection as Arc<dyn Transport>)
        }
        .boxed()
    }
}

pub struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(NavError::Transport("connection is closed".into()));
        }
        Ok(())
    }
}

impl Transport for MemoryConnection {
    fn publish(&self, envelope: Envelope) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if state.shut_down {
            return Err(NavError::Transport("broker is shut down".into()));
        }

        let Some(groups) = state.subjects.get_mut(&envelope.subject) else {
            return Ok(());
        };
        for (name, group) in groups.iter_mut() {
            let Some(member) = group.next_member() else {
                continue;
            };
            match member.sender.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Queue group '{}' on '{}' is full, dropping message",
                        name, envelope.subject
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Subscription> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if state.shut_down {
            return Err(NavError::Transport("broker is shut down".into()));
        }

        let id = state.allocate_id();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        state
            .subjects
            .entry(subject.to_string())
            .or_default()
            .entry(queue_group.to_string())
            .or_default()
            .members
            .push(Member {
                id,
                connection: self.id,
                sender,
            });
        debug!("Subscribed to '{}' as '{}' (#{})", subject, queue_group, id);
        Ok(Subscription { id, receiver })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.broker.lock().remove_where(|m| m.id == id);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let connection = self.id;
        self.broker.lock().remove_where(|m| m.connection == connection);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
