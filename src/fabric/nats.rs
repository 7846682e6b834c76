//! NATS transport.
//!
//! Each node holds its own client connection. Subjects map one to one,
//! queue groups become NATS queue subscriptions and the publishing node's
//! name travels in the `node` header.

use async_nats::{ConnectOptions, HeaderMap, ServerAddr};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::transport::{
    Connector, Envelope, Subscription, SubscriptionId, Transport, SUBSCRIPTION_CAPACITY,
};
use crate::config::NodeConfig;
use crate::error::{NavError, Result};

/// Header carrying the name of the publishing node
pub const ORIGIN_HEADER: &str = "node";

/// Envelopes queued for the writer task; beyond this publishes are dropped
const PUBLISH_CAPACITY: usize = 1024;

pub(crate) fn server_addrs(servers: &[String]) -> Result<Vec<ServerAddr>> {
    if servers.is_empty() {
        return Err(NavError::Connection("no NATS servers configured".into()));
    }
    servers
        .iter()
        .map(|server| {
            server.parse::<ServerAddr>().map_err(|e| {
                NavError::Connection(format!("invalid NATS server '{server}': {e}"))
            })
        })
        .collect()
}

pub(crate) fn origin_headers(origin: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ORIGIN_HEADER, origin);
    headers
}

pub(crate) fn origin_from(headers: Option<&HeaderMap>) -> String {
    headers
        .and_then(|h| h.get(ORIGIN_HEADER))
        .map(|value| value.as_str().to_string())
        .unwrap_or_default()
}

fn envelope_from(message: async_nats::Message) -> Envelope {
    Envelope {
        subject: message.subject.to_string(),
        origin: origin_from(message.headers.as_ref()),
        payload: message.payload.to_vec(),
    }
}

/// Connects nodes to a NATS cluster.
#[derive(Clone, Copy, Debug, Default)]
pub struct NatsConnector;

impl NatsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for NatsConnector {
    fn connect<'a>(&'a self, config: &'a NodeConfig) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        async move {
            let addrs = server_addrs(&config.servers)?;
            let runtime = Handle::try_current()
                .map_err(|e| NavError::Connection(format!("no tokio runtime: {e}")))?;
            let client = ConnectOptions::new()
                .name(&config.name)
                .connect(addrs.as_slice())
                .await
                .map_err(|e| {
                    NavError::Connection(format!(
                        "node '{}' could not reach {}: {}",
                        config.name,
                        config.servers.join(","),
                        e
                    ))
                })?;
            info!(
                "Node '{}' connected to NATS ({})",
                config.name,
                config.servers.join(",")
            );
            Ok(Arc::new(NatsConnection::start(client, runtime)) as Arc<dyn Transport>)
        }
        .boxed()
    }
}

pub struct NatsConnection {
    client: Mutex<Option<async_nats::Client>>,
    outbound: Mutex<Option<mpsc::Sender<Envelope>>>,
    forwarders: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    runtime: Handle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NatsConnection {
    /// Spawns the writer task that keeps publishes in order.
    fn start(client: async_nats::Client, runtime: Handle) -> Self {
        let (outbound, mut queue) = mpsc::channel::<Envelope>(PUBLISH_CAPACITY);
        let writer = client.clone();
        runtime.spawn(async move {
            while let Some(envelope) = queue.recv().await {
                let headers = origin_headers(&envelope.origin);
                if let Err(e) = writer
                    .publish_with_headers(envelope.subject.clone(), headers, envelope.payload.into())
                    .await
                {
                    warn!("NATS publish on '{}' failed: {}", envelope.subject, e);
                }
            }
            if let Err(e) = writer.flush().await {
                debug!("NATS flush on close failed: {}", e);
            }
        });

        Self {
            client: Mutex::new(Some(client)),
            outbound: Mutex::new(Some(outbound)),
            forwarders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            runtime,
        }
    }

    fn live_client(&self) -> Result<async_nats::Client> {
        if self.is_closed() {
            return Err(NavError::Transport("connection is closed".into()));
        }
        lock(&self.client)
            .clone()
            .ok_or_else(|| NavError::Transport("connection is closed".into()))
    }
}

impl Transport for NatsConnection {
    fn publish(&self, envelope: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(NavError::Transport("connection is closed".into()));
        }
        let outbound = lock(&self.outbound);
        let Some(sender) = outbound.as_ref() else {
            return Err(NavError::Transport("connection is closed".into()));
        };
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(envelope)) => {
                warn!("NATS publish queue full, dropping message on '{}'", envelope.subject);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(NavError::Transport("NATS writer has stopped".into()))
            }
        }
    }

    fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Subscription> {
        let client = self.live_client()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let subject = subject.to_string();
        let queue_group = queue_group.to_string();

        let forwarder = self.runtime.spawn(async move {
            let mut inbound = match client
                .queue_subscribe(subject.clone(), queue_group.clone())
                .await
            {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!("NATS subscribe to '{}' as '{}' failed: {}", subject, queue_group, e);
                    return;
                }
            };
            debug!("Subscribed to '{}' as '{}' (#{})", subject, queue_group, id);
            while let Some(message) = inbound.next().await {
                match sender.try_send(envelope_from(message)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Queue group '{}' on '{}' is full, dropping message",
                            queue_group, subject
                        );
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        });
        lock(&self.forwarders).insert(id, forwarder);
        Ok(Subscription { id, receiver })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(forwarder) = lock(&self.forwarders).remove(&id) {
            forwarder.abort();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, forwarder) in lock(&self.forwarders).drain() {
            forwarder.abort();
        }
        // The writer drains what is queued, flushes and drops its client
        lock(&self.outbound).take();
        lock(&self.client).take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
