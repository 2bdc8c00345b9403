use std::{fmt, time::Duration};

use thiserror::Error;

use crate::{
    ProtocolError,
    cluster::{BoxError, OffsetVersion},
};

/// Where in the cluster an operation was aimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub topic: Option<String>,
    pub partition: Option<i32>,
    pub group: Option<String>,
    pub version: Option<OffsetVersion>,
}

impl RequestContext {
    pub fn topic(topic: &str) -> Self {
        Self {
            topic: Some(topic.to_owned()),
            ..Default::default()
        }
    }

    pub fn partition(topic: &str, partition: i32) -> Self {
        Self {
            partition: Some(partition),
            ..Self::topic(topic)
        }
    }

    pub fn group(group: &str, topic: &str, partition: i32, version: OffsetVersion) -> Self {
        Self {
            group: Some(group.to_owned()),
            version: Some(version),
            ..Self::partition(topic, partition)
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![];
        if let Some(group) = &self.group {
            parts.push(format!("group={group}"));
        }
        if let Some(topic) = &self.topic {
            parts.push(format!("topic={topic}"));
        }
        if let Some(partition) = self.partition {
            parts.push(format!("partition={partition}"));
        }
        if let Some(version) = self.version {
            parts.push(format!("version={version}"));
        }

        if parts.is_empty() {
            write!(f, "cluster")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Cluster query failed ({context}): {source}")]
    ClusterQuery {
        context: RequestContext,
        source: BoxError,
    },

    #[error("Cannot resolve leader of {topic}/{partition}: {source}")]
    LeaderResolution {
        topic: String,
        partition: i32,
        source: BoxError,
    },

    #[error("Cannot resolve coordinator of group \"{group}\": {source}")]
    CoordinatorResolution { group: String, source: BoxError },

    #[error(
        "Requested {requested} partitions of topic \"{topic}\" but it only has {available}"
    )]
    PartitionCountMismatch {
        topic: String,
        requested: usize,
        available: usize,
    },

    #[error("Unknown topic \"{topic}\"")]
    UnknownTopic { topic: String },

    #[error("Unknown partition {partition} of topic \"{topic}\"")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("Request failed ({context}): {source}")]
    Request {
        context: RequestContext,
        source: BoxError,
    },

    #[error("Server error {error} ({context})")]
    Protocol {
        context: RequestContext,
        error: ProtocolError,
    },

    #[error("Invalid response ({context}): {message}")]
    InvalidResponse {
        context: RequestContext,
        message: String,
    },

    #[error(
        "Cannot compute drift of group \"{group}\" on topic \"{topic}\": partitions only in newest offsets {only_newest:?}, only in committed offsets {only_committed:?}, uncommitted without oldest offset {missing_oldest:?}"
    )]
    DriftComputation {
        group: String,
        topic: String,
        only_newest: Vec<i32>,
        only_committed: Vec<i32>,
        missing_oldest: Vec<i32>,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
