use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::{Configuration, GROUP_ID};
use crate::error::{ErrorCode, KafkaError};
use crate::handle::{Handle, HandleEvent};
use crate::message::Message;
use crate::rebalance::RebalanceCoordinator;
use crate::topic_partition::{OffsetTuple, TopicPartition, TopicPartitionList};
use crate::Result;

/// Poll timeout used by [`Consumer::poll`] until [`Consumer::set_timeout`] is called.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// A consumer group member.
///
/// The `Consumer` subscribes to topics, polls messages from the partitions the
/// group assigns to it and commits its progress. Rebalances are handled while
/// polling: when the group hands out or takes back partitions, the matching
/// callback runs and the new assignment is applied before `poll` returns.
/// There is no need to call [`Consumer::assign`] or [`Consumer::unassign`]
/// from a callback.
///
/// The consumer exclusively owns its [`Handle`] and closes it when dropped.
///
/// # Examples
///
/// Basic usage:
///
/// ```no_run
/// use kafka_group::{Configuration, Consumer, MemoryBroker, TopicPartitionList};
///
/// # async fn run() -> kafka_group::Result<()> {
/// let broker = MemoryBroker::new();
/// let config = Configuration::new()
///     .with("group.id", "my_group")
///     .with("auto.offset.reset", "earliest");
/// let mut consumer = Consumer::new(config, |config| broker.connect(config))?;
///
/// consumer.set_assignment_callback(|partitions: &mut TopicPartitionList| {
///     println!("Got assigned {} partitions", partitions.len());
/// });
/// consumer.set_revocation_callback(|partitions: &TopicPartitionList| {
///     println!("{} partitions revoked", partitions.len());
/// });
///
/// consumer.subscribe(["my_topic"])?;
/// loop {
///     let msg = consumer.poll().await?;
///     if msg.is_empty() {
///         continue;
///     }
///     match msg.get_error() {
///         None => println!("Received: {:?}", msg.payload_str()),
///         Some(_) if msg.is_eof() => {}
///         Some(code) => eprintln!("Consumer error: {code}"),
///     }
/// }
/// # }
/// ```
pub struct Consumer<H: Handle> {
    handle: H,
    rebalance: RebalanceCoordinator,
    timeout: Duration,
    closed: bool,
}

impl<H: Handle> Consumer<H> {
    /// Creates a new consumer.
    ///
    /// The configuration must contain a non-empty `group.id`. It is checked
    /// before `connect` is called, so a bad configuration never opens a
    /// connection. `connect` receives the configuration and builds the
    /// handle; every other option is the handle's business.
    ///
    /// # Arguments
    ///
    /// * `config`: The consumer configuration.
    /// * `connect`: Builds the handle from the configuration.
    ///
    /// # Errors
    ///
    /// * `ConfigurationError` if `group.id` is missing or blank.
    /// * Whatever `connect` returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use kafka_group::{Configuration, Consumer, KafkaError, MemoryBroker};
    ///
    /// let broker = MemoryBroker::new();
    /// let result = Consumer::new(Configuration::new(), |config| broker.connect(config));
    /// assert!(matches!(result, Err(KafkaError::ConfigurationError(_))));
    /// ```
    pub fn new<F>(config: Configuration, connect: F) -> Result<Self>
    where
        F: FnOnce(&Configuration) -> Result<H>,
    {
        let Some(group_id) = config.group_id() else {
            return Err(KafkaError::ConfigurationError(format!(
                "\"{GROUP_ID}\" must be set to create a consumer"
            )));
        };
        let handle = connect(&config)?;
        info!(
            group_id,
            member_id = %handle.get_member_id(),
            "Consumer created"
        );
        Ok(Consumer {
            handle,
            rebalance: RebalanceCoordinator::new(),
            timeout: DEFAULT_POLL_TIMEOUT,
            closed: false,
        })
    }

    /// Sets the callback run when partitions are assigned.
    ///
    /// The callback may rewrite offsets on the entries (for example to seek)
    /// but must leave the partitions themselves, and their order, as given.
    /// Otherwise the assignment is refused and `poll` fails with
    /// [`KafkaError::InvalidAssignment`].
    pub fn set_assignment_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut TopicPartitionList) + Send + Sync + 'static,
    {
        self.rebalance.set_assignment_callback(callback);
    }

    /// Sets the callback run when partitions are revoked. The partitions are
    /// unassigned right after it returns.
    pub fn set_revocation_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&TopicPartitionList) + Send + Sync + 'static,
    {
        self.rebalance.set_revocation_callback(callback);
    }

    pub fn set_rebalance_error_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ErrorCode) + Send + Sync + 'static,
    {
        self.rebalance.set_rebalance_error_callback(callback);
    }

    pub fn rebalance_coordinator(&self) -> &RebalanceCoordinator {
        &self.rebalance
    }

    /// Sets the timeout used by [`Consumer::poll`].
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replaces the current subscription.
    ///
    /// Joining the group happens in the background; partitions show up through
    /// the assignment callback during a later poll.
    ///
    /// # Arguments
    ///
    /// * `topics`: Topic names. Names starting with `^` are regular expressions
    ///   if the handle supports them.
    pub fn subscribe<I, S>(&mut self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        self.handle.subscribe(&topics)?;
        info!(topics = ?topics, "Subscribed");
        Ok(())
    }

    /// Drops the subscription. Assigned partitions are revoked on a later poll.
    pub fn unsubscribe(&mut self) -> Result<()> {
        self.handle.unsubscribe()?;
        info!("Unsubscribed");
        Ok(())
    }

    /// Assigns partitions directly, outside of group management.
    pub fn assign(&mut self, partitions: &TopicPartitionList) -> Result<()> {
        self.handle.assign(partitions)
    }

    pub fn unassign(&mut self) -> Result<()> {
        self.handle.unassign()
    }

    /// Commits the position after `message` and waits for the broker.
    ///
    /// The committed offset is `message.offset() + 1`, the next offset to read.
    ///
    /// # Errors
    ///
    /// * `BrokerError` with `INVALID_ARG` for an empty or error message.
    /// * `BrokerError` if the broker rejects the commit.
    pub async fn commit_message(&mut self, message: &Message) -> Result<()> {
        self.commit_message_with(message, false).await
    }

    /// Like [`Consumer::commit_message`] without waiting for the outcome.
    pub async fn async_commit_message(&mut self, message: &Message) -> Result<()> {
        self.commit_message_with(message, true).await
    }

    /// Commits the offsets in `offsets` and waits for the broker.
    pub async fn commit(&mut self, offsets: &TopicPartitionList) -> Result<()> {
        self.commit_offsets(offsets, false).await
    }

    /// Like [`Consumer::commit`] without waiting for the outcome.
    pub async fn async_commit(&mut self, offsets: &TopicPartitionList) -> Result<()> {
        self.commit_offsets(offsets, true).await
    }

    async fn commit_message_with(&mut self, message: &Message, asynchronous: bool) -> Result<()> {
        if !message.is_record() {
            return Err(KafkaError::broker(ErrorCode::INVALID_ARG));
        }
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(message.topic(), message.partition(), message.offset() + 1);
        self.commit_offsets(&offsets, asynchronous).await
    }

    async fn commit_offsets(&mut self, offsets: &TopicPartitionList, asynchronous: bool) -> Result<()> {
        debug!(asynchronous, "Committing offsets {}", offsets);
        self.handle.commit(offsets, asynchronous).await
    }

    /// Queries the low and high watermarks of a partition from the broker.
    pub async fn get_offsets(&self, partition: &TopicPartition) -> Result<OffsetTuple> {
        self.handle.get_watermark_offsets(partition).await
    }

    /// Returns `partitions` with each offset set to the group's committed
    /// offset, or `Offset::Invalid` when nothing was committed.
    pub async fn get_offsets_committed(
        &self,
        partitions: &TopicPartitionList,
    ) -> Result<TopicPartitionList> {
        self.handle.get_committed_offsets(partitions).await
    }

    /// Returns `partitions` with each offset set to the consumer's current
    /// position, the next offset it will fetch.
    pub fn get_offsets_position(&self, partitions: &TopicPartitionList) -> Result<TopicPartitionList> {
        self.handle.get_position(partitions)
    }

    pub fn get_subscription(&self) -> Result<Vec<String>> {
        self.handle.get_subscription()
    }

    pub fn get_assignment(&self) -> Result<TopicPartitionList> {
        self.handle.get_assignment()
    }

    pub fn get_member_id(&self) -> String {
        self.handle.get_member_id()
    }

    /// Polls for a message using the configured timeout.
    ///
    /// Polling regularly also keeps the membership alive; a consumer that
    /// stops polling is eventually considered dead by the group.
    ///
    /// The returned message is empty when the timeout expires. Otherwise it is
    /// either a record or an error notification, see [`Message::get_error`]
    /// and [`Message::is_eof`].
    ///
    /// # Errors
    ///
    /// * Transport failures from the handle.
    /// * `RebalanceApplyError` or `InvalidAssignment` if a rebalance handled
    ///   during this poll could not be applied.
    pub async fn poll(&mut self) -> Result<Message> {
        self.poll_timeout(self.timeout).await
    }

    /// Same as [`Consumer::poll`] with an explicit timeout.
    ///
    /// Rebalance notifications received before the deadline are handled in
    /// place and polling continues with the time left.
    pub async fn poll_timeout(&mut self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.handle.poll(remaining).await? {
                Some(HandleEvent::Message(message)) => return Ok(message),
                Some(HandleEvent::Rebalance { code, partitions }) => {
                    self.rebalance
                        .handle_rebalance(&mut self.handle, code, partitions)?;
                }
                None => return Ok(Message::empty()),
            }
        }
    }

    /// Leaves the group.
    ///
    /// Any assigned partitions go through a last revocation (callback
    /// included) before the handle is closed, so the group can hand them to
    /// another member right away. Calling it again does nothing. Dropping the
    /// consumer calls it.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let revoked = match self.handle.get_assignment() {
            Ok(assigned) if !assigned.is_empty() => self.rebalance.handle_rebalance(
                &mut self.handle,
                ErrorCode::REVOKE_PARTITIONS,
                assigned,
            ),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        let closed = self.handle.close();
        info!(member_id = %self.handle.get_member_id(), "Consumer closed");
        revoked.and(closed)
    }
}

impl<H: Handle> fmt::Debug for Consumer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("member_id", &self.handle.get_member_id())
            .field("rebalance", &self.rebalance)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<H: Handle> Drop for Consumer<H> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if std::thread::panicking() {
            // Skip user callbacks while unwinding.
            self.closed = true;
            if let Err(e) = self.handle.close() {
                error!("Failed to close consumer handle: {}", e);
            }
            return;
        }
        if let Err(e) = self.close() {
            error!("Failed to close consumer: {}", e);
        }
    }
}

/// Unit tests for the consumer against a mocked handle.
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;

    use crate::error::RebalanceAction;
    use crate::handle::MockHandle;
    use crate::topic_partition::Offset;

    fn group_config() -> Configuration {
        Configuration::new().with(GROUP_ID, "test-group")
    }

    fn mock_handle() -> MockHandle {
        let mut handle = MockHandle::new();
        handle.expect_get_member_id().returning(|| "member-1".to_string());
        handle
    }

    fn expect_teardown(handle: &mut MockHandle) {
        handle
            .expect_get_assignment()
            .returning(|| Ok(TopicPartitionList::new()));
        handle.expect_close().times(1).returning(|| Ok(()));
    }

    fn scripted_polls(handle: &mut MockHandle, events: Vec<Option<HandleEvent>>, log: Arc<Mutex<Vec<String>>>) {
        let events = Mutex::new(VecDeque::from(events));
        handle.expect_poll().returning(move |_| {
            log.lock().unwrap().push("poll".to_string());
            Ok(events.lock().unwrap().pop_front().flatten())
        });
    }

    fn assigned() -> TopicPartitionList {
        vec![TopicPartition::new("t", 0), TopicPartition::new("t", 1)].into()
    }

    #[test]
    fn construction_without_group_id_never_connects() {
        let connected = AtomicBool::new(false);
        let result = Consumer::<MockHandle>::new(Configuration::new(), |_| {
            connected.store(true, Ordering::SeqCst);
            Ok(mock_handle())
        });
        assert_matches!(result, Err(KafkaError::ConfigurationError(msg)) if msg.contains("group.id"));
        assert!(!connected.load(Ordering::SeqCst));
    }

    #[test]
    fn connect_failure_is_returned() {
        let result = Consumer::<MockHandle>::new(group_config(), |_| {
            Err(KafkaError::broker(ErrorCode::DESTROY))
        });
        assert_matches!(result.map(|_| ()), Err(KafkaError::BrokerError { code: ErrorCode::DESTROY, .. }));
    }

    #[tokio::test]
    async fn commit_message_commits_next_offset() {
        let mut handle = mock_handle();
        handle
            .expect_commit()
            .withf(|offsets, asynchronous| {
                !*asynchronous
                    && offsets.len() == 1
                    && offsets.find("t", 3).map(|tp| tp.offset()) == Some(Offset::Offset(42))
            })
            .times(1)
            .returning(|_, _| Ok(()));
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        let message = Message::new("t", 3, 41, None, None);
        consumer.commit_message(&message).await.unwrap();
    }

    #[tokio::test]
    async fn async_commit_passes_flag_through() {
        let mut handle = mock_handle();
        handle
            .expect_commit()
            .withf(|offsets, asynchronous| *asynchronous && offsets.len() == 2)
            .times(1)
            .returning(|_, _| Ok(()));
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        let mut offsets = assigned();
        offsets.set_offset("t", 0, 10);
        offsets.set_offset("t", 1, 20);
        consumer.async_commit(&offsets).await.unwrap();
    }

    #[tokio::test]
    async fn committing_a_non_record_is_rejected_locally() {
        let mut handle = mock_handle();
        handle.expect_commit().never();
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        for message in [Message::empty(), Message::eof("t", 0, 5)] {
            assert_matches!(
                consumer.commit_message(&message).await,
                Err(KafkaError::BrokerError { code: ErrorCode::INVALID_ARG, .. })
            );
        }
    }

    #[tokio::test]
    async fn sync_commit_error_is_propagated() {
        let mut handle = mock_handle();
        handle
            .expect_commit()
            .returning(|_, _| Err(KafkaError::broker(ErrorCode::ILLEGAL_GENERATION)));
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        assert_matches!(
            consumer.commit(&assigned()).await,
            Err(KafkaError::BrokerError { code: ErrorCode::ILLEGAL_GENERATION, .. })
        );
    }

    #[tokio::test]
    async fn poll_applies_rebalance_before_returning() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handle = mock_handle();
        scripted_polls(
            &mut handle,
            vec![
                Some(HandleEvent::Rebalance {
                    code: ErrorCode::ASSIGN_PARTITIONS,
                    partitions: assigned(),
                }),
                Some(HandleEvent::Message(Message::new("t", 1, 0, None, None))),
            ],
            log.clone(),
        );
        let assign_log = log.clone();
        handle.expect_assign().times(1).returning(move |partitions| {
            assign_log
                .lock()
                .unwrap()
                .push(format!("assign {}", partitions.len()));
            Ok(())
        });
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        let callback_log = log.clone();
        consumer.set_assignment_callback(move |partitions: &mut TopicPartitionList| {
            callback_log
                .lock()
                .unwrap()
                .push(format!("callback {}", partitions.len()));
        });

        let message = consumer.poll().await.unwrap();
        assert_eq!(message.partition(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["poll", "callback 2", "assign 2", "poll"]
        );
    }

    #[tokio::test]
    async fn poll_timeout_returns_empty_message() {
        let mut handle = mock_handle();
        handle
            .expect_poll()
            .withf(|timeout| timeout.is_zero())
            .returning(|_| Ok(None));
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        assert!(consumer.poll_timeout(Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_surfaces_rebalance_apply_failure() {
        let mut handle = mock_handle();
        scripted_polls(
            &mut handle,
            vec![Some(HandleEvent::Rebalance {
                code: ErrorCode::ASSIGN_PARTITIONS,
                partitions: assigned(),
            })],
            Arc::new(Mutex::new(Vec::new())),
        );
        handle
            .expect_assign()
            .returning(|_| Err(KafkaError::broker(ErrorCode::STATE)));
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        assert_matches!(
            consumer.poll().await,
            Err(KafkaError::RebalanceApplyError {
                action: RebalanceAction::Assign,
                ..
            })
        );
    }

    #[test]
    fn close_revokes_assignment_once() {
        let mut handle = mock_handle();
        handle
            .expect_get_assignment()
            .times(1)
            .returning(|| Ok(assigned()));
        handle.expect_unassign().times(1).returning(|| Ok(()));
        handle.expect_close().times(1).returning(|| Ok(()));

        let revoked = Arc::new(Mutex::new(Vec::new()));
        let sink = revoked.clone();
        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        consumer.set_revocation_callback(move |partitions: &TopicPartitionList| {
            sink.lock().unwrap().push(partitions.len());
        });

        consumer.close().unwrap();
        consumer.close().unwrap();
        drop(consumer);
        assert_eq!(*revoked.lock().unwrap(), vec![2]);
    }

    #[test]
    fn drop_closes_handle() {
        let mut handle = mock_handle();
        expect_teardown(&mut handle);
        let consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        assert_eq!(consumer.timeout(), DEFAULT_POLL_TIMEOUT);
        drop(consumer);
    }

    #[test]
    fn subscribe_forwards_topic_names() {
        let mut handle = mock_handle();
        handle
            .expect_subscribe()
            .withf(|topics| topics.len() == 2 && topics[0] == "a" && topics[1] == "b")
            .times(1)
            .returning(|_| Ok(()));
        handle
            .expect_subscribe()
            .withf(|topics| topics.len() == 1 && topics[0] == "c")
            .returning(|_| Err(KafkaError::broker(ErrorCode::UNKNOWN_TOPIC)));
        expect_teardown(&mut handle);

        let mut consumer = Consumer::new(group_config(), |_| Ok(handle)).unwrap();
        consumer.subscribe(["a", "b"]).unwrap();
        assert_matches!(
            consumer.subscribe(vec!["c".to_string()]),
            Err(KafkaError::BrokerError { code: ErrorCode::UNKNOWN_TOPIC, .. })
        );
    }
}
