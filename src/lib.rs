//! Consumer group client core for Kafka-like brokers.
//!
//! A [`Consumer`] joins a consumer group through a [`Handle`], receives a
//! balanced share of its topics' partitions, polls messages and commits
//! offsets. Group rebalances are applied by the [`RebalanceCoordinator`]
//! while polling. [`MemoryBroker`] provides an in-process handle; with the
//! `rdkafka` feature, `NativeHandle` drives librdkafka.

pub mod config;
pub mod consumer;
pub mod error;
pub mod handle;
pub mod memory;
pub mod message;
#[cfg(feature = "rdkafka")]
pub mod native;
pub mod rebalance;
pub mod topic_partition;

pub use config::Configuration;
pub use consumer::Consumer;
pub use error::{ErrorCode, KafkaError};
pub use handle::{Handle, HandleEvent};
pub use memory::{MemoryBroker, MemoryHandle};
pub use message::Message;
#[cfg(feature = "rdkafka")]
pub use native::NativeHandle;
pub use rebalance::{RebalanceCoordinator, RebalanceEvent};
pub use topic_partition::{Offset, OffsetTuple, TopicPartition, TopicPartitionList};

pub type Result<T> = std::result::Result<T, KafkaError>;
