//! An in-process [`Handle`] implementation.
//!
//! [`MemoryBroker`] keeps topic logs, group offsets and group membership in
//! memory and runs an eager round-robin rebalance whenever a group's
//! membership or subscriptions change. Each [`MemoryHandle`] is one group
//! member. It is meant for embedding and for exercising consumers without a
//! cluster; it does not speak the wire protocol.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{ErrorCode, KafkaError};
use crate::handle::{Handle, HandleEvent};
use crate::message::Message;
use crate::topic_partition::{Offset, OffsetTuple, TopicPartition, TopicPartitionList};
use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
enum OffsetReset {
    #[serde(rename = "earliest", alias = "smallest", alias = "beginning")]
    Earliest,
    #[default]
    #[serde(rename = "latest", alias = "largest", alias = "end")]
    Latest,
    #[serde(rename = "error")]
    Error,
}

impl OffsetReset {
    fn position(self, log: &PartitionLog) -> Option<i64> {
        match self {
            OffsetReset::Earliest => Some(log.low),
            OffsetReset::Latest => Some(log.high()),
            OffsetReset::Error => None,
        }
    }
}

/// Transport options read from the consumer configuration. Other keys are
/// ignored.
#[derive(Clone, Debug, Deserialize)]
struct MemoryOptions {
    #[serde(rename = "group.id")]
    group_id: String,

    #[serde(rename = "client.id", default = "default_client_id")]
    client_id: String,

    /// Where to start when there is no committed offset or it is out of range.
    #[serde(rename = "auto.offset.reset", default)]
    auto_offset_reset: OffsetReset,

    /// Emit an end-of-partition message whenever a partition is drained.
    #[serde(
        rename = "enable.partition.eof",
        default,
        deserialize_with = "bool_from_str"
    )]
    enable_partition_eof: bool,
}

impl MemoryOptions {
    fn from_config(config: &Configuration) -> Result<Self> {
        let value = serde_json::to_value(config)?;
        serde_json::from_value(value).map_err(|e| KafkaError::ConfigurationError(e.to_string()))
    }
}

fn default_client_id() -> String {
    "kafka_group".to_string()
}

fn bool_from_str<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

#[derive(Clone, Debug)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Option<Bytes>,
}

#[derive(Debug, Default)]
struct PartitionLog {
    low: i64,
    records: VecDeque<StoredRecord>,
}

impl PartitionLog {
    fn high(&self) -> i64 {
        self.low + self.records.len() as i64
    }

    fn get(&self, offset: i64) -> Option<&StoredRecord> {
        let index = usize::try_from(offset - self.low).ok()?;
        self.records.get(index)
    }

    fn watermarks(&self) -> OffsetTuple {
        OffsetTuple::new(self.low, self.high())
    }
}

#[derive(Debug)]
enum Subscription {
    Topic(String),
    Pattern(Regex),
}

impl Subscription {
    /// Names starting with `^` are regular expressions.
    fn parse(name: &str) -> Result<Self> {
        if name.starts_with('^') {
            Ok(Subscription::Pattern(Regex::new(name)?))
        } else {
            Ok(Subscription::Topic(name.to_string()))
        }
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            Subscription::Topic(name) => name == topic,
            Subscription::Pattern(regex) => regex.is_match(topic),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Subscription::Topic(name) => name,
            Subscription::Pattern(regex) => regex.as_str(),
        }
    }
}

#[derive(Debug)]
struct Assigned {
    topic: String,
    partition: i32,
    /// Next offset to fetch. `None` once the reset policy refused to pick one.
    position: Option<i64>,
    eof_reported: bool,
    error_reported: bool,
}

#[derive(Debug)]
struct Member {
    id: String,
    options: MemoryOptions,
    subscription: Vec<Subscription>,
    assignment: Vec<Assigned>,
    events: VecDeque<HandleEvent>,
    cursor: usize,
}

impl Member {
    fn is_subscribed_to(&self, topic: &str) -> bool {
        self.subscription.iter().any(|s| s.matches(topic))
    }

    fn assignment_list(&self) -> TopicPartitionList {
        self.assignment
            .iter()
            .map(|a| TopicPartition::new(a.topic.clone(), a.partition))
            .collect()
    }

    /// Partitions the member holds once its queued rebalance events have
    /// been applied.
    fn effective_assignment(&self) -> TopicPartitionList {
        self.events
            .iter()
            .rev()
            .find_map(|event| match event {
                HandleEvent::Rebalance { code, partitions }
                    if *code == ErrorCode::ASSIGN_PARTITIONS =>
                {
                    Some(partitions.clone())
                }
                HandleEvent::Rebalance { code, .. } if *code == ErrorCode::REVOKE_PARTITIONS => {
                    Some(TopicPartitionList::new())
                }
                _ => None,
            })
            .unwrap_or_else(|| self.assignment_list())
    }

    /// Next message from the assigned partitions, rotating between them.
    fn fetch(&mut self, topics: &BTreeMap<String, Vec<PartitionLog>>) -> Option<Message> {
        let count = self.assignment.len();
        let reset = self.options.auto_offset_reset;
        let eof_enabled = self.options.enable_partition_eof;
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let slot = &mut self.assignment[index];
            let Some(log) = partition_log(topics, &slot.topic, slot.partition) else {
                continue;
            };
            if let Some(position) = slot.position {
                if position < log.low || position > log.high() {
                    slot.position = reset.position(log);
                    slot.eof_reported = false;
                }
            }
            let message = match slot.position {
                None => {
                    if slot.error_reported {
                        continue;
                    }
                    slot.error_reported = true;
                    Message::error(
                        ErrorCode::OFFSET_OUT_OF_RANGE,
                        slot.topic.clone(),
                        slot.partition,
                        Offset::RAW_INVALID,
                    )
                }
                Some(position) => match log.get(position) {
                    Some(record) => {
                        slot.position = Some(position + 1);
                        slot.eof_reported = false;
                        Message::new(
                            slot.topic.clone(),
                            slot.partition,
                            position,
                            record.key.clone(),
                            record.payload.clone(),
                        )
                    }
                    None => {
                        if !eof_enabled || slot.eof_reported {
                            continue;
                        }
                        slot.eof_reported = true;
                        Message::eof(slot.topic.clone(), slot.partition, position)
                    }
                },
            };
            self.cursor = (index + 1) % count;
            return Some(message);
        }
        None
    }
}

fn partition_log<'a>(
    topics: &'a BTreeMap<String, Vec<PartitionLog>>,
    topic: &str,
    partition: i32,
) -> Option<&'a PartitionLog> {
    let index = usize::try_from(partition).ok()?;
    topics.get(topic)?.get(index)
}

fn start_position(
    requested: Offset,
    committed: Option<i64>,
    log: &PartitionLog,
    reset: OffsetReset,
) -> Option<i64> {
    let wanted = match requested {
        Offset::Offset(offset) => Some(offset),
        Offset::Beginning => Some(log.low),
        Offset::End => Some(log.high()),
        Offset::Stored | Offset::Invalid => committed,
    };
    match wanted {
        Some(offset) if offset >= log.low && offset <= log.high() => Some(offset),
        _ => reset.position(log),
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, Vec<PartitionLog>>,
    /// (group, topic, partition) -> next offset to read.
    committed: HashMap<(String, String, i32), i64>,
    /// Members in join order.
    members: Vec<Member>,
    next_member: u64,
}

impl BrokerState {
    fn log(&self, topic: &str, partition: i32) -> Option<&PartitionLog> {
        partition_log(&self.topics, topic, partition)
    }

    fn log_mut(&mut self, topic: &str, partition: i32) -> Option<&mut PartitionLog> {
        let index = usize::try_from(partition).ok()?;
        self.topics.get_mut(topic)?.get_mut(index)
    }

    fn committed(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.committed
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn member(&self, member_id: &str) -> Result<&Member> {
        self.members
            .iter()
            .find(|m| m.id == member_id)
            .ok_or_else(|| KafkaError::broker(ErrorCode::DESTROY))
    }

    fn member_mut(&mut self, member_id: &str) -> Result<&mut Member> {
        self.members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or_else(|| KafkaError::broker(ErrorCode::DESTROY))
    }

    fn next_event(&mut self, member_id: &str) -> Result<Option<HandleEvent>> {
        let BrokerState {
            topics, members, ..
        } = self;
        let member = members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or_else(|| KafkaError::broker(ErrorCode::DESTROY))?;
        if let Some(event) = member.events.pop_front() {
            return Ok(Some(event));
        }
        Ok(member.fetch(topics).map(HandleEvent::Message))
    }

    /// Recomputes the group's assignment and queues a revoke of every
    /// member's current partitions followed by an assign of its new share.
    fn rebalance(&mut self, group_id: &str) {
        let active: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.options.group_id == group_id && !m.subscription.is_empty())
            .map(|(index, _)| index)
            .collect();

        let mut shares = vec![TopicPartitionList::new(); active.len()];
        let mut next = 0;
        for (topic, logs) in &self.topics {
            for partition in 0..logs.len() as i32 {
                for step in 0..active.len() {
                    let slot = (next + step) % active.len();
                    if self.members[active[slot]].is_subscribed_to(topic) {
                        shares[slot].add_partition(topic.clone(), partition);
                        next = slot + 1;
                        break;
                    }
                }
            }
        }

        for member in self
            .members
            .iter_mut()
            .filter(|m| m.options.group_id == group_id)
        {
            let current = member.effective_assignment();
            if !current.is_empty() {
                member.events.push_back(HandleEvent::Rebalance {
                    code: ErrorCode::REVOKE_PARTITIONS,
                    partitions: current,
                });
            }
        }
        for (index, share) in active.into_iter().zip(shares) {
            let member = &mut self.members[index];
            debug!(
                group_id,
                member_id = %member.id,
                partitions = share.len(),
                "Queued group assignment"
            );
            member.events.push_back(HandleEvent::Rebalance {
                code: ErrorCode::ASSIGN_PARTITIONS,
                partitions: share,
            });
        }
    }

    fn commit(&mut self, member_id: &str, offsets: &TopicPartitionList) -> Result<()> {
        let group_id = self.member(member_id)?.options.group_id.clone();
        if offsets.is_empty() {
            return Err(KafkaError::broker(ErrorCode::NO_OFFSET));
        }
        for tp in offsets {
            if self.log(tp.topic(), tp.partition()).is_none() {
                return Err(KafkaError::broker(ErrorCode::UNKNOWN_TOPIC_OR_PART));
            }
            if tp.offset().value().is_none() {
                return Err(KafkaError::broker(ErrorCode::INVALID_ARG));
            }
        }
        for tp in offsets {
            if let Some(offset) = tp.offset().value() {
                self.committed.insert(
                    (group_id.clone(), tp.topic().to_string(), tp.partition()),
                    offset,
                );
            }
        }
        Ok(())
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-memory cluster shared by any number of [`MemoryHandle`]s.
///
/// Cloning is cheap and every clone refers to the same cluster.
///
/// # Examples
///
/// ```
/// use kafka_group::{Configuration, Consumer, MemoryBroker};
///
/// # fn main() -> kafka_group::Result<()> {
/// let broker = MemoryBroker::new();
/// broker.create_topic("orders", 2)?;
/// broker.produce("orders", 0, None, "first")?;
///
/// let config = Configuration::new().with("group.id", "billing");
/// let consumer = Consumer::new(config, |config| broker.connect(config))?;
/// assert!(consumer.get_assignment()?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("MemoryBroker")
            .field("topics", &state.topics.keys().collect::<Vec<_>>())
            .field("members", &state.members.len())
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Creates a topic. Groups with a matching subscription rebalance.
    pub fn create_topic(&self, name: &str, partitions: i32) -> Result<()> {
        if name.is_empty() || partitions < 1 {
            return Err(KafkaError::broker(ErrorCode::INVALID_ARG));
        }
        let mut state = self.shared.lock();
        if state.topics.contains_key(name) {
            return Err(KafkaError::broker(ErrorCode::TOPIC_ALREADY_EXISTS));
        }
        state.topics.insert(
            name.to_string(),
            (0..partitions).map(|_| PartitionLog::default()).collect(),
        );
        info!(topic = name, partitions, "Created topic");

        let mut groups: Vec<String> = state
            .members
            .iter()
            .filter(|m| m.is_subscribed_to(name))
            .map(|m| m.options.group_id.clone())
            .collect();
        groups.sort();
        groups.dedup();
        for group in &groups {
            state.rebalance(group);
        }
        drop(state);
        if !groups.is_empty() {
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }

    /// Appends a record and returns its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Result<i64> {
        let mut state = self.shared.lock();
        let log = state
            .log_mut(topic, partition)
            .ok_or_else(|| KafkaError::broker(ErrorCode::UNKNOWN_TOPIC_OR_PART))?;
        let offset = log.high();
        log.records.push_back(StoredRecord {
            key,
            payload: Some(payload.into()),
        });
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(offset)
    }

    /// Drops records below `before`, raising the low watermark. Returns the
    /// new low watermark.
    pub fn delete_records(&self, topic: &str, partition: i32, before: i64) -> Result<i64> {
        let mut state = self.shared.lock();
        let log = state
            .log_mut(topic, partition)
            .ok_or_else(|| KafkaError::broker(ErrorCode::UNKNOWN_TOPIC_OR_PART))?;
        let before = before.min(log.high());
        while log.low < before {
            log.records.pop_front();
            log.low += 1;
        }
        Ok(log.low)
    }

    pub fn watermarks(&self, topic: &str, partition: i32) -> Result<OffsetTuple> {
        self.shared
            .lock()
            .log(topic, partition)
            .map(PartitionLog::watermarks)
            .ok_or_else(|| KafkaError::broker(ErrorCode::UNKNOWN_TOPIC_OR_PART))
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared.lock().committed(group_id, topic, partition)
    }

    /// Registers a new member. It joins its group on the first subscribe.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` if `group.id` is missing or an option has an
    /// unusable value.
    pub fn connect(&self, config: &Configuration) -> Result<MemoryHandle> {
        let options = MemoryOptions::from_config(config)?;
        let mut state = self.shared.lock();
        state.next_member += 1;
        let member_id = format!("{}-{}", options.client_id, state.next_member);
        let group_id = options.group_id.clone();
        info!(member_id = %member_id, group_id = %group_id, "Member connected");
        state.members.push(Member {
            id: member_id.clone(),
            options,
            subscription: Vec::new(),
            assignment: Vec::new(),
            events: VecDeque::new(),
            cursor: 0,
        });
        Ok(MemoryHandle {
            shared: self.shared.clone(),
            member_id,
            group_id,
        })
    }

    /// Forces a rebalance of `group_id`.
    pub fn rebalance(&self, group_id: &str) {
        self.shared.lock().rebalance(group_id);
        self.shared.notify.notify_waiters();
    }

    /// Queues a raw rebalance notification for one member, as if the group
    /// coordinator had sent it.
    pub fn inject_rebalance(
        &self,
        member_id: &str,
        code: ErrorCode,
        partitions: TopicPartitionList,
    ) -> Result<()> {
        self.shared
            .lock()
            .member_mut(member_id)?
            .events
            .push_back(HandleEvent::Rebalance { code, partitions });
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Ids of the connected members of `group_id`, in join order.
    pub fn members(&self, group_id: &str) -> Vec<String> {
        self.shared
            .lock()
            .members
            .iter()
            .filter(|m| m.options.group_id == group_id)
            .map(|m| m.id.clone())
            .collect()
    }
}

/// One member's connection to a [`MemoryBroker`].
pub struct MemoryHandle {
    shared: Arc<Shared>,
    member_id: String,
    group_id: String,
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("member_id", &self.member_id)
            .field("group_id", &self.group_id)
            .finish()
    }
}

impl MemoryHandle {
    fn rebalance_group(&self, state: &mut BrokerState) {
        state.rebalance(&self.group_id);
    }
}

#[async_trait]
impl Handle for MemoryHandle {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<HandleEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let event = {
                let mut state = self.shared.lock();
                state.next_event(&self.member_id)?
            };
            if event.is_some() {
                return Ok(event);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        if topics.is_empty() {
            return Err(KafkaError::broker(ErrorCode::INVALID_ARG));
        }
        let subscription = topics
            .iter()
            .map(|topic| Subscription::parse(topic))
            .collect::<Result<Vec<_>>>()?;
        {
            let mut state = self.shared.lock();
            state.member_mut(&self.member_id)?.subscription = subscription;
            self.rebalance_group(&mut state);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.member_mut(&self.member_id)?.subscription.clear();
            self.rebalance_group(&mut state);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn assign(&mut self, partitions: &TopicPartitionList) -> Result<()> {
        if partitions.has_duplicates() {
            return Err(KafkaError::broker(ErrorCode::INVALID_ARG));
        }
        let mut state = self.shared.lock();
        let reset = state.member(&self.member_id)?.options.auto_offset_reset;
        let mut assignment = Vec::with_capacity(partitions.len());
        for tp in partitions {
            let log = state
                .log(tp.topic(), tp.partition())
                .ok_or_else(|| KafkaError::broker(ErrorCode::UNKNOWN_PARTITION))?;
            let committed = state.committed(&self.group_id, tp.topic(), tp.partition());
            assignment.push(Assigned {
                topic: tp.topic().to_string(),
                partition: tp.partition(),
                position: start_position(tp.offset(), committed, log, reset),
                eof_reported: false,
                error_reported: false,
            });
        }
        let member = state.member_mut(&self.member_id)?;
        member.assignment = assignment;
        member.cursor = 0;
        debug!(member_id = %self.member_id, partitions = partitions.len(), "Assignment applied");
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn unassign(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        let member = state.member_mut(&self.member_id)?;
        member.assignment.clear();
        member.cursor = 0;
        debug!(member_id = %self.member_id, "Assignment cleared");
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn commit(&mut self, offsets: &TopicPartitionList, asynchronous: bool) -> Result<()> {
        let result = self.shared.lock().commit(&self.member_id, offsets);
        match result {
            Err(e) if asynchronous => {
                warn!(member_id = %self.member_id, "Asynchronous commit failed: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    async fn get_watermark_offsets(&self, partition: &TopicPartition) -> Result<OffsetTuple> {
        let state = self.shared.lock();
        state.member(&self.member_id)?;
        state
            .log(partition.topic(), partition.partition())
            .map(PartitionLog::watermarks)
            .ok_or_else(|| KafkaError::broker(ErrorCode::UNKNOWN_TOPIC_OR_PART))
    }

    async fn get_committed_offsets(
        &self,
        partitions: &TopicPartitionList,
    ) -> Result<TopicPartitionList> {
        let state = self.shared.lock();
        state.member(&self.member_id)?;
        partitions
            .iter()
            .map(|tp| {
                if state.log(tp.topic(), tp.partition()).is_none() {
                    return Err(KafkaError::broker(ErrorCode::UNKNOWN_TOPIC_OR_PART));
                }
                let offset = state
                    .committed(&self.group_id, tp.topic(), tp.partition())
                    .map_or(Offset::Invalid, Offset::Offset);
                Ok(TopicPartition::with_offset(tp.topic(), tp.partition(), offset))
            })
            .collect()
    }

    fn get_position(&self, partitions: &TopicPartitionList) -> Result<TopicPartitionList> {
        let state = self.shared.lock();
        let member = state.member(&self.member_id)?;
        Ok(partitions
            .iter()
            .map(|tp| {
                let offset = member
                    .assignment
                    .iter()
                    .find(|a| a.topic == tp.topic() && a.partition == tp.partition())
                    .and_then(|a| a.position)
                    .map_or(Offset::Invalid, Offset::Offset);
                TopicPartition::with_offset(tp.topic(), tp.partition(), offset)
            })
            .collect())
    }

    fn get_assignment(&self) -> Result<TopicPartitionList> {
        Ok(self.shared.lock().member(&self.member_id)?.assignment_list())
    }

    fn get_subscription(&self) -> Result<Vec<String>> {
        Ok(self
            .shared
            .lock()
            .member(&self.member_id)?
            .subscription
            .iter()
            .map(|s| s.as_str().to_string())
            .collect())
    }

    fn get_member_id(&self) -> String {
        self.member_id.clone()
    }

    fn close(&mut self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            let before = state.members.len();
            state.members.retain(|m| m.id != self.member_id);
            if state.members.len() == before {
                return Ok(());
            }
            info!(member_id = %self.member_id, group_id = %self.group_id, "Member left group");
            self.rebalance_group(&mut state);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(member_id = %self.member_id, "Failed to leave group on drop: {}", e);
        }
    }
}
