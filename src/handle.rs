use std::time::Duration;

use async_trait::async_trait;

use crate::error::ErrorCode;
use crate::message::Message;
use crate::topic_partition::{OffsetTuple, TopicPartition, TopicPartitionList};
use crate::Result;

/// Something a [`Handle`] surfaces from a poll.
#[derive(Clone, Debug, PartialEq)]
pub enum HandleEvent {
    /// A message, error notification or end-of-partition status.
    Message(Message),
    /// A group rebalance notification. `code` is
    /// [`ErrorCode::ASSIGN_PARTITIONS`], [`ErrorCode::REVOKE_PARTITIONS`] or
    /// a rebalance failure.
    Rebalance {
        code: ErrorCode,
        partitions: TopicPartitionList,
    },
}

/// The lower-level client a consumer drives.
///
/// A handle owns the broker connection, topic metadata and the raw poll
/// loop, and implements the group membership wire protocol. It never
/// applies a rebalance on its own: every assignment change the group
/// decides is returned from [`Handle::poll`] as a
/// [`HandleEvent::Rebalance`], exactly once, and applied later through
/// [`Handle::assign`] or [`Handle::unassign`].
///
/// Methods that only touch local client state are synchronous. Methods that
/// need a broker round-trip are `async`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Handle: Send + Sync {
    /// Waits up to `timeout` for the next event. `Ok(None)` on timeout.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<HandleEvent>>;

    fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    fn unsubscribe(&mut self) -> Result<()>;

    /// Replaces the whole assignment, starting at each entry's offset.
    fn assign(&mut self, partitions: &TopicPartitionList) -> Result<()>;

    fn unassign(&mut self) -> Result<()>;

    /// Commits the offsets in `offsets`. When `asynchronous` is set the call
    /// returns once the request is queued and broker failures are only
    /// reported by the handle itself.
    async fn commit(&mut self, offsets: &TopicPartitionList, asynchronous: bool) -> Result<()>;

    async fn get_watermark_offsets(&self, partition: &TopicPartition) -> Result<OffsetTuple>;

    async fn get_committed_offsets(
        &self,
        partitions: &TopicPartitionList,
    ) -> Result<TopicPartitionList>;

    fn get_position(&self, partitions: &TopicPartitionList) -> Result<TopicPartitionList>;

    fn get_assignment(&self) -> Result<TopicPartitionList>;

    fn get_subscription(&self) -> Result<Vec<String>>;

    fn get_member_id(&self) -> String;

    /// Leaves the group and releases the connection. Called once.
    fn close(&mut self) -> Result<()>;
}
