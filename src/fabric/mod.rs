//! Typed publish/subscribe between navigation nodes.

pub mod codec;
pub mod memory;
pub mod nats;
pub mod node;
pub mod topic;
pub mod transport;

pub use codec::{Codec, CodecError, JsonCodec};
pub use memory::{is_memory_url, MemoryBroker, MEMORY_SCHEME};
pub use nats::NatsConnector;
pub use node::{remaining_period, ConnectionState, Node};
pub use topic::{TopicPublisher, TopicSubscriber};
pub use transport::{Connector, Envelope, Subscription, Transport};
