use std::fmt::{Display, Formatter};

use crate::{Offset, PartitionId};

/// Partition value used when subscribing, the broker picks the partitions.
pub const PARTITION_UNASSIGNED: PartitionId = -1;

pub const OFFSET_BEGINNING: Offset = -2;
pub const OFFSET_END: Offset = -1;
pub const OFFSET_STORED: Offset = -1000;
/// Offset reported for partitions that took no part in a commit.
pub const OFFSET_INVALID: Offset = -1001;

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: PartitionId,
}

impl TopicPartition {
    pub fn new<S: Into<String>>(topic: S, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} - {}]", self.topic, self.partition)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
}

impl TopicPartitionOffset {
    pub fn new<S: Into<String>>(topic: S, partition: PartitionId, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    pub fn is_invalid_offset(&self) -> bool {
        self.offset == OFFSET_INVALID
    }
}

/// Ordered list of topic partitions, used for subscriptions, rebalance events and
/// commit confirmations alike.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TopicPartitionList {
    elements: Vec<TopicPartitionOffset>,
}

impl TopicPartitionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
        }
    }

    /// Builds a subscription list, one unassigned entry per topic.
    pub fn from_topics<S: AsRef<str>>(topics: &[S]) -> Self {
        let mut list = Self::with_capacity(topics.len());
        for topic in topics {
            list.add_partition(topic.as_ref(), PARTITION_UNASSIGNED);
        }
        list
    }

    pub fn add_partition<S: Into<String>>(&mut self, topic: S, partition: PartitionId) {
        self.add_partition_offset(topic, partition, OFFSET_INVALID);
    }

    pub fn add_partition_offset<S: Into<String>>(
        &mut self,
        topic: S,
        partition: PartitionId,
        offset: Offset,
    ) {
        self.elements
            .push(TopicPartitionOffset::new(topic, partition, offset));
    }

    pub fn elements(&self) -> &[TopicPartitionOffset] {
        &self.elements
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicPartitionOffset> {
        self.elements.iter()
    }

    pub fn count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn topic_partitions(&self) -> Vec<TopicPartition> {
        self.elements
            .iter()
            .map(TopicPartitionOffset::topic_partition)
            .collect()
    }

    pub fn contains(&self, topic: &str, partition: PartitionId) -> bool {
        self.elements
            .iter()
            .any(|tp| tp.topic == topic && tp.partition == partition)
    }
}

impl FromIterator<TopicPartitionOffset> for TopicPartitionList {
    fn from_iter<T: IntoIterator<Item = TopicPartitionOffset>>(iter: T) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TopicPartitionList {
    type Item = &'a TopicPartitionOffset;
    type IntoIter = std::slice::Iter<'a, TopicPartitionOffset>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl Display for TopicPartitionList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, tp) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}/{}", tp.topic, tp.partition)?;
        }
        write!(f, "]")
    }
}
