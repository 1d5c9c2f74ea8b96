//! A [`Handle`] backed by librdkafka through the `rdkafka` crate.
//!
//! The consumer context overrides librdkafka's rebalance callback so the
//! client never assigns on its own: each notification is queued and handed
//! out by [`Handle::poll`], and the [`RebalanceCoordinator`] applies it.
//! Only the eager assignment protocol is supported; cooperative assignors
//! need incremental assign calls.
//!
//! Commits and offset queries block the calling task for at most the
//! request timeout.
//!
//! [`RebalanceCoordinator`]: crate::rebalance::RebalanceCoordinator

use std::collections::VecDeque;
use std::ffi::CStr;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::client::NativeClient;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError as NativeError;
use rdkafka::message::BorrowedMessage;
use rdkafka::types::RDKafkaRespErr;
use rdkafka::{ClientContext, Message as _, Offset as NativeOffset};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{ErrorCode, KafkaError};
use crate::handle::{Handle, HandleEvent};
use crate::message::Message;
use crate::topic_partition::{Offset, OffsetTuple, TopicPartition, TopicPartitionList};
use crate::Result;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Queues rebalance notifications instead of applying them.
#[derive(Default)]
pub struct GroupContext {
    pending: Mutex<VecDeque<HandleEvent>>,
    wakeup: Notify,
}

impl GroupContext {
    fn queue(&self, code: ErrorCode, partitions: TopicPartitionList) {
        debug!(code = %code, partitions = partitions.len(), "Queued rebalance notification");
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(HandleEvent::Rebalance { code, partitions });
        self.wakeup.notify_one();
    }

    fn take_event(&self) -> Option<HandleEvent> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn rebalance(
        &self,
        _native_client: &NativeClient,
        err: RDKafkaRespErr,
        tpl: &mut rdkafka::TopicPartitionList,
    ) {
        self.queue(ErrorCode::new(err as i32), from_native(tpl));
    }

    fn commit_callback(
        &self,
        result: rdkafka::error::KafkaResult<()>,
        offsets: &rdkafka::TopicPartitionList,
    ) {
        if let Err(e) = result {
            warn!(partitions = offsets.count(), "Asynchronous commit failed: {}", e);
        }
    }
}

type NativeConsumer = StreamConsumer<GroupContext>;

/// One group member connected through librdkafka.
pub struct NativeHandle {
    consumer: Option<NativeConsumer>,
    request_timeout: Duration,
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("open", &self.consumer.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl NativeHandle {
    /// Creates a librdkafka consumer from every key in `config`.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` when librdkafka rejects a key or value.
    pub fn connect(config: &Configuration) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        for (key, value) in config.iter() {
            client_config.set(key, value);
        }
        let consumer: NativeConsumer = client_config
            .create_with_context(GroupContext::default())
            .map_err(map_error)?;
        info!(keys = config.len(), "Created librdkafka consumer");
        Ok(NativeHandle {
            consumer: Some(consumer),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    fn consumer(&self) -> Result<&NativeConsumer> {
        self.consumer
            .as_ref()
            .ok_or_else(|| KafkaError::broker(ErrorCode::DESTROY))
    }
}

fn map_error(error: NativeError) -> KafkaError {
    match error {
        NativeError::ClientConfig(..) | NativeError::ClientCreation(_) => {
            KafkaError::ConfigurationError(error.to_string())
        }
        other => KafkaError::BrokerError {
            code: other
                .rdkafka_error_code()
                .map_or(ErrorCode::STATE, |code| ErrorCode::new(code as i32)),
            message: other.to_string(),
        },
    }
}

fn from_native(tpl: &rdkafka::TopicPartitionList) -> TopicPartitionList {
    tpl.elements()
        .iter()
        .map(|elem| {
            let raw = elem.offset().to_raw().unwrap_or(Offset::RAW_INVALID);
            TopicPartition::with_offset(elem.topic(), elem.partition(), Offset::from_raw(raw))
        })
        .collect()
}

fn to_native(list: &TopicPartitionList) -> Result<rdkafka::TopicPartitionList> {
    let mut tpl = rdkafka::TopicPartitionList::with_capacity(list.len());
    for tp in list {
        tpl.add_partition_offset(
            tp.topic(),
            tp.partition(),
            NativeOffset::from_raw(tp.offset().to_raw()),
        )
        .map_err(map_error)?;
    }
    Ok(tpl)
}

fn from_received(received: std::result::Result<BorrowedMessage<'_>, NativeError>) -> Message {
    match received {
        Ok(msg) => Message::new(
            msg.topic(),
            msg.partition(),
            msg.offset(),
            msg.key().map(Bytes::copy_from_slice),
            msg.payload().map(Bytes::copy_from_slice),
        ),
        // librdkafka only names the partition for end-of-partition events.
        Err(NativeError::PartitionEOF(partition)) => {
            Message::eof("", partition, Offset::RAW_INVALID)
        }
        Err(e) => {
            let code = e
                .rdkafka_error_code()
                .map_or(ErrorCode::STATE, |code| ErrorCode::new(code as i32));
            warn!(code = %code, "Consume error: {}", e);
            Message::error(code, "", TopicPartition::UNASSIGNED, Offset::RAW_INVALID)
        }
    }
}

#[async_trait]
impl Handle for NativeHandle {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<HandleEvent>> {
        let deadline = Instant::now() + timeout;
        let consumer = self.consumer()?;
        let context = consumer.context();
        loop {
            if let Some(event) = context.take_event() {
                return Ok(Some(event));
            }
            tokio::select! {
                received = consumer.recv() => {
                    return Ok(Some(HandleEvent::Message(from_received(received))));
                }
                _ = context.wakeup.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(context.take_event());
                }
            }
        }
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer()?.subscribe(&topics).map_err(map_error)
    }

    fn unsubscribe(&mut self) -> Result<()> {
        self.consumer()?.unsubscribe();
        Ok(())
    }

    fn assign(&mut self, partitions: &TopicPartitionList) -> Result<()> {
        let tpl = to_native(partitions)?;
        self.consumer()?.assign(&tpl).map_err(map_error)
    }

    fn unassign(&mut self) -> Result<()> {
        self.consumer()?.unassign().map_err(map_error)
    }

    async fn commit(&mut self, offsets: &TopicPartitionList, asynchronous: bool) -> Result<()> {
        let tpl = to_native(offsets)?;
        let mode = if asynchronous {
            CommitMode::Async
        } else {
            CommitMode::Sync
        };
        self.consumer()?.commit(&tpl, mode).map_err(map_error)
    }

    async fn get_watermark_offsets(&self, partition: &TopicPartition) -> Result<OffsetTuple> {
        let (low, high) = self
            .consumer()?
            .fetch_watermarks(partition.topic(), partition.partition(), self.request_timeout)
            .map_err(map_error)?;
        Ok(OffsetTuple::new(low, high))
    }

    async fn get_committed_offsets(
        &self,
        partitions: &TopicPartitionList,
    ) -> Result<TopicPartitionList> {
        let tpl = to_native(partitions)?;
        let committed = self
            .consumer()?
            .committed_offsets(tpl, self.request_timeout)
            .map_err(map_error)?;
        Ok(from_native(&committed))
    }

    fn get_position(&self, partitions: &TopicPartitionList) -> Result<TopicPartitionList> {
        let positions = self.consumer()?.position().map_err(map_error)?;
        Ok(partitions
            .iter()
            .map(|tp| {
                let offset = positions
                    .find_partition(tp.topic(), tp.partition())
                    .and_then(|elem| elem.offset().to_raw())
                    .map_or(Offset::Invalid, Offset::from_raw);
                TopicPartition::with_offset(tp.topic(), tp.partition(), offset)
            })
            .collect())
    }

    fn get_assignment(&self) -> Result<TopicPartitionList> {
        let assignment = self.consumer()?.assignment().map_err(map_error)?;
        Ok(from_native(&assignment))
    }

    fn get_subscription(&self) -> Result<Vec<String>> {
        let subscription = self.consumer()?.subscription().map_err(map_error)?;
        let mut topics: Vec<String> = subscription
            .elements()
            .iter()
            .map(|elem| elem.topic().to_string())
            .collect();
        topics.dedup();
        Ok(topics)
    }

    fn get_member_id(&self) -> String {
        let Some(consumer) = self.consumer.as_ref() else {
            return String::new();
        };
        let client = consumer.client().native_ptr();
        // SAFETY: the client outlives this call and the returned string is
        // released with the allocator librdkafka used for it.
        unsafe {
            let id = rdkafka::bindings::rd_kafka_memberid(client);
            if id.is_null() {
                return String::new();
            }
            let member_id = CStr::from_ptr(id).to_string_lossy().into_owned();
            rdkafka::bindings::rd_kafka_mem_free(client, id.cast());
            member_id
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!("Closing librdkafka consumer");
            drop(consumer);
        }
        Ok(())
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close librdkafka consumer: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rdkafka::error::RDKafkaErrorCode;

    #[test]
    fn rebalance_notifications_are_queued_in_order() {
        let context = GroupContext::default();
        let mut list = TopicPartitionList::new();
        list.add_partition("t", 0);
        context.queue(ErrorCode::ASSIGN_PARTITIONS, list.clone());
        context.queue(ErrorCode::REVOKE_PARTITIONS, list.clone());

        assert_eq!(
            context.take_event(),
            Some(HandleEvent::Rebalance {
                code: ErrorCode::ASSIGN_PARTITIONS,
                partitions: list.clone(),
            })
        );
        assert_matches!(
            context.take_event(),
            Some(HandleEvent::Rebalance { code: ErrorCode::REVOKE_PARTITIONS, .. })
        );
        assert_eq!(context.take_event(), None);
    }

    #[test]
    fn partition_lists_keep_offsets_and_sentinels() {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset("t", 0, 42);
        list.add_partition_offset("t", 1, Offset::Beginning);
        list.add_partition_offset("u", 0, Offset::Stored);

        let native = to_native(&list).unwrap();
        assert_eq!(native.count(), 3);
        assert_eq!(
            native.find_partition("t", 0).map(|e| e.offset()),
            Some(NativeOffset::Offset(42))
        );
        assert_eq!(from_native(&native).to_string(), list.to_string());
    }

    #[test]
    fn errors_keep_librdkafka_codes() {
        let err = map_error(NativeError::MessageConsumption(
            RDKafkaErrorCode::UnknownTopicOrPartition,
        ));
        assert_eq!(err.code(), Some(ErrorCode::UNKNOWN_TOPIC_OR_PART));

        let eof = from_received(Err(NativeError::PartitionEOF(2)));
        assert!(eof.is_eof());
        assert_eq!(eof.partition(), 2);
    }

    #[tokio::test]
    async fn closed_handle_is_rejected() {
        let config = Configuration::new()
            .with("group.id", "g")
            .with("bootstrap.servers", "localhost:9092");
        let mut handle = NativeHandle::connect(&config).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();

        assert_eq!(handle.get_member_id(), "");
        assert_matches!(
            handle.poll(Duration::ZERO).await,
            Err(KafkaError::BrokerError { code: ErrorCode::DESTROY, .. })
        );
    }
}
