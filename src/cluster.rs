//! The contract between the offset engine and a cluster client.
//!
//! [`OffsetClient`](crate::client::OffsetClient) only talks to the cluster through [`Cluster`] and [`Broker`]. The
//! crate ships [`KafkaCluster`](crate::connection::KafkaCluster) as the wire implementation; tests plug in fakes.
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;

use crate::ProtocolError;

/// Boxed error used at the contract boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Partition id to offset.
pub type OffsetMap = HashMap<i32, i64>;

/// Committed offset reported for a partition the group never committed to.
pub const NO_COMMITTED_OFFSET: i64 = -1;

/// Which end of the log an available-offset query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetAt {
    /// The oldest offset still available.
    Earliest,

    /// The offset the next message will get, i.e. the log-end offset.
    Latest,
}

impl OffsetAt {
    /// Sentinel timestamp used on the wire.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Earliest => -2,
            Self::Latest => -1,
        }
    }
}

/// Where a consumer group keeps its committed offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OffsetVersion {
    /// Offsets kept by the coordinating service (ZooKeeper in old Kafka deployments).
    StoredInCoordinatingService,

    /// Offsets kept in the broker-side offsets log.
    #[default]
    StoredInLog,
}

impl OffsetVersion {
    pub fn code(&self) -> i16 {
        match self {
            Self::StoredInCoordinatingService => 0,
            Self::StoredInLog => 1,
        }
    }
}

impl TryFrom<i16> for OffsetVersion {
    type Error = i16;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::StoredInCoordinatingService),
            1 => Ok(Self::StoredInLog),
            other => Err(other),
        }
    }
}

impl fmt::Display for OffsetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Identity of one partition of one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Partition ids of one topic, sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSet(BTreeSet<i32>);

impl PartitionSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, partition: i32) -> bool {
        self.0.contains(&partition)
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<i32> {
        self.iter().collect()
    }
}

impl FromIterator<i32> for PartitionSet {
    fn from_iter<T: IntoIterator<Item = i32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of an available-offset query for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetsBlock {
    pub offsets: Vec<i64>,
    pub error: Option<ProtocolError>,
}

/// Result of a committed-offset query for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedOffsetBlock {
    pub offset: i64,
    pub error: Option<ProtocolError>,
}

/// A broker the engine sends offset queries to.
#[async_trait]
pub trait Broker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Broker id as reported by cluster metadata.
    fn id(&self) -> i32;

    /// Connects to the broker. Calling this on a connected broker succeeds without I/O.
    async fn open(&self) -> Result<(), Self::Error>;

    /// Asks for up to `max_results` available offsets at the given end of the log.
    async fn fetch_offsets(
        &self,
        topic: &str,
        partition: i32,
        at: OffsetAt,
        max_results: i32,
    ) -> Result<OffsetsBlock, Self::Error>;

    /// Asks for the offset `group` committed for the partition.
    async fn fetch_committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        version: OffsetVersion,
    ) -> Result<CommittedOffsetBlock, Self::Error>;
}

/// Cluster-wide metadata queries and broker lookup.
#[async_trait]
pub trait Cluster: Send + Sync {
    type Broker: Broker;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn list_topics(&self) -> Result<Vec<String>, Self::Error>;

    /// Re-reads metadata for the given topics from the cluster.
    async fn refresh_metadata(&self, topics: &[String]) -> Result<(), Self::Error>;

    async fn list_partitions(&self, topic: &str) -> Result<Vec<i32>, Self::Error>;

    /// Broker currently leading the partition. The handle may not be connected yet.
    async fn leader(&self, topic: &str, partition: i32)
    -> Result<Arc<Self::Broker>, Self::Error>;

    /// Broker coordinating the consumer group. The handle may not be connected yet.
    async fn coordinator(&self, group: &str) -> Result<Arc<Self::Broker>, Self::Error>;
}
