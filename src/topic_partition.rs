use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A position inside a partition, or one of the logical sentinels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Start of the partition (oldest retained message).
    Beginning,
    /// End of the partition (next message to be produced).
    End,
    /// The offset committed for the consumer group.
    Stored,
    /// No offset set.
    #[default]
    Invalid,
    /// A concrete offset.
    Offset(i64),
}

impl Offset {
    pub const RAW_BEGINNING: i64 = -2;
    pub const RAW_END: i64 = -1;
    pub const RAW_STORED: i64 = -1000;
    pub const RAW_INVALID: i64 = -1001;

    /// Converts a raw wire offset, mapping the reserved negative values to
    /// their sentinel. Any other negative value is `Invalid`.
    pub fn from_raw(raw: i64) -> Offset {
        match raw {
            Self::RAW_BEGINNING => Offset::Beginning,
            Self::RAW_END => Offset::End,
            Self::RAW_STORED => Offset::Stored,
            n if n >= 0 => Offset::Offset(n),
            _ => Offset::Invalid,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Offset::Beginning => Self::RAW_BEGINNING,
            Offset::End => Self::RAW_END,
            Offset::Stored => Self::RAW_STORED,
            Offset::Invalid => Self::RAW_INVALID,
            Offset::Offset(n) => n,
        }
    }

    /// The concrete offset, if this is not a sentinel.
    pub fn value(self) -> Option<i64> {
        match self {
            Offset::Offset(n) => Some(n),
            _ => None,
        }
    }
}

impl From<i64> for Offset {
    fn from(raw: i64) -> Self {
        Offset::from_raw(raw)
    }
}

impl From<i32> for Offset {
    fn from(raw: i32) -> Self {
        Offset::from_raw(i64::from(raw))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Beginning => f.write_str("BEGINNING"),
            Offset::End => f.write_str("END"),
            Offset::Stored => f.write_str("STORED"),
            Offset::Invalid => f.write_str("INVALID"),
            Offset::Offset(n) => write!(f, "{n}"),
        }
    }
}

/// A topic/partition pair with an associated offset.
///
/// Two values are equal when they name the same topic and partition; the
/// offset does not take part in comparisons or hashing.
#[derive(Clone, Debug)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
    offset: Offset,
}

impl TopicPartition {
    /// Partition value used when no specific partition is selected.
    pub const UNASSIGNED: i32 = -1;

    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition,
            offset: Offset::Invalid,
        }
    }

    pub fn with_offset(topic: impl Into<String>, partition: i32, offset: impl Into<Offset>) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition,
            offset: offset.into(),
        }
    }

    /// A topic-level entry with no partition selected.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        TopicPartition::new(topic, Self::UNASSIGNED)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn set_offset(&mut self, offset: impl Into<Offset>) {
        self.offset = offset.into();
    }

    fn key(&self) -> (&str, i32) {
        (&self.topic, self.partition)
    }
}

impl PartialEq for TopicPartition {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TopicPartition {}

impl Hash for TopicPartition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for TopicPartition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopicPartition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}]", self.topic, self.partition, self.offset)
    }
}

/// An ordered list of topic/partitions, kept in the order the broker gave.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicPartitionList {
    elements: Vec<TopicPartition>,
}

impl TopicPartitionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: TopicPartition) {
        self.elements.push(element);
    }

    pub fn add_partition(&mut self, topic: impl Into<String>, partition: i32) {
        self.push(TopicPartition::new(topic, partition));
    }

    pub fn add_partition_offset(
        &mut self,
        topic: impl Into<String>,
        partition: i32,
        offset: impl Into<Offset>,
    ) {
        self.push(TopicPartition::with_offset(topic, partition, offset));
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TopicPartition> {
        self.elements.iter()
    }

    /// Mutable access to the entries. Only offsets can be changed through it.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, TopicPartition> {
        self.elements.iter_mut()
    }

    pub fn find(&self, topic: &str, partition: i32) -> Option<&TopicPartition> {
        self.elements
            .iter()
            .find(|tp| tp.topic == topic && tp.partition == partition)
    }

    pub fn find_mut(&mut self, topic: &str, partition: i32) -> Option<&mut TopicPartition> {
        self.elements
            .iter_mut()
            .find(|tp| tp.topic == topic && tp.partition == partition)
    }

    pub fn contains(&self, topic: &str, partition: i32) -> bool {
        self.find(topic, partition).is_some()
    }

    /// Rewrites the offset of an existing entry. Returns `false` when the
    /// partition is not in the list.
    pub fn set_offset(&mut self, topic: &str, partition: i32, offset: impl Into<Offset>) -> bool {
        match self.find_mut(topic, partition) {
            Some(tp) => {
                tp.set_offset(offset);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, topic: &str, partition: i32) -> Option<TopicPartition> {
        let index = self
            .elements
            .iter()
            .position(|tp| tp.topic == topic && tp.partition == partition)?;
        Some(self.elements.remove(index))
    }

    /// `true` when some (topic, partition) pair appears more than once.
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.elements.len());
        !self.elements.iter().all(|tp| seen.insert(tp.key()))
    }

    /// `true` when both lists name the same (topic, partition) pairs in the
    /// same order, whatever their offsets.
    pub fn same_partitions(&self, other: &TopicPartitionList) -> bool {
        self.elements.len() == other.elements.len()
            && self
                .elements
                .iter()
                .zip(other.elements.iter())
                .all(|(a, b)| a.key() == b.key())
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = Vec::new();
        for tp in &self.elements {
            if !topics.contains(&tp.topic.as_str()) {
                topics.push(&tp.topic);
            }
        }
        topics
    }
}

impl fmt::Display for TopicPartitionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, tp) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tp}")?;
        }
        f.write_str("]")
    }
}

impl FromIterator<TopicPartition> for TopicPartitionList {
    fn from_iter<I: IntoIterator<Item = TopicPartition>>(iter: I) -> Self {
        TopicPartitionList {
            elements: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<TopicPartition>> for TopicPartitionList {
    fn from(elements: Vec<TopicPartition>) -> Self {
        TopicPartitionList { elements }
    }
}

impl IntoIterator for TopicPartitionList {
    type Item = TopicPartition;
    type IntoIter = std::vec::IntoIter<TopicPartition>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a TopicPartitionList {
    type Item = &'a TopicPartition;
    type IntoIter = std::slice::Iter<'a, TopicPartition>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl std::ops::Index<usize> for TopicPartitionList {
    type Output = TopicPartition;

    fn index(&self, index: usize) -> &TopicPartition {
        &self.elements[index]
    }
}

/// Low and high watermark offsets of one partition at query time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetTuple {
    pub low: i64,
    pub high: i64,
}

impl OffsetTuple {
    pub fn new(low: i64, high: i64) -> Self {
        OffsetTuple { low, high }
    }

    /// Number of messages currently retained in the partition.
    pub fn len(&self) -> i64 {
        (self.high - self.low).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, offset: i64) -> bool {
        offset >= self.low && offset < self.high
    }
}
