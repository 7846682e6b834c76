//! Boundary between the typed topic layer and whatever moves the bytes.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::error::Result;

/// Per-subscription buffer; deliveries beyond this are dropped
pub const SUBSCRIPTION_CAPACITY: usize = 256;

pub type SubscriptionId = u64;

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub subject: String,
    /// Name of the publishing node
    pub origin: String,
    pub payload: Vec<u8>,
}

pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<Envelope>,
}

/// One live connection.
///
/// Publishing is fire-and-forget. Within a queue group each envelope goes
/// to at most one member.
pub trait Transport: Send + Sync {
    fn publish(&self, envelope: Envelope) -> Result<()>;
    fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Subscription>;
    fn unsubscribe(&self, id: SubscriptionId);
    /// Drops every subscription of this connection. Idempotent.
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, config: &'a NodeConfig) -> BoxFuture<'a, Result<Arc<dyn Transport>>>;
}
