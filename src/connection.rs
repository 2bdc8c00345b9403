//! Kafka implementation of the [`Cluster`] contract.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    ProtocolError,
    build_info::DEFAULT_CLIENT_ID,
    cluster::Cluster,
    messenger::{RequestError, SyncVersionsError},
    protocol::{
        messages::{
            COORDINATOR_KEY_TYPE_GROUP, FindCoordinatorRequest, MetadataRequest,
            MetadataRequestTopic, MetadataResponse, MetadataResponseTopic,
        },
        primitives::{Boolean, String_},
    },
};

use self::topology::{BrokerAddress, BrokerTopology};

pub use self::broker::{BrokerConnection, KafkaBroker};

mod broker;
mod topology;
mod transport;

use self::broker::ConnectionSettings;

/// Default maximum frame size accepted from a broker.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Default timeout for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("error connecting to broker \"{broker}\": {error}")]
    Transport {
        broker: String,
        error: transport::Error,
    },

    #[error("cannot sync versions: {0}")]
    SyncVersions(#[from] SyncVersionsError),

    #[error("request error: {0}")]
    Request(#[from] RequestError),

    #[error("cannot connect to any of the brokers {tried:?}")]
    NoBrokerAvailable { tried: Vec<String> },

    #[error("topic \"{topic}\" not found")]
    UnknownTopic { topic: String },

    #[error("partition {partition} of topic \"{topic}\" not found")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("no leader available for {topic}/{partition}")]
    LeaderNotAvailable { topic: String, partition: i32 },

    #[error("broker {broker} is not part of the known topology")]
    UnknownBroker { broker: i32 },

    #[error("server error {error} for {context}")]
    Server {
        context: String,
        error: ProtocolError,
    },

    #[error("response has no block for {context}")]
    MissingBlock { context: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Builder for [`KafkaCluster`].
pub struct KafkaClusterBuilder {
    bootstrap_brokers: Vec<String>,
    client_id: Option<Arc<str>>,
    max_message_size: usize,
    connect_timeout: Option<Duration>,
}

impl KafkaClusterBuilder {
    /// Create a new [`KafkaClusterBuilder`] with the list of bootstrap brokers.
    pub fn new(bootstrap_brokers: Vec<String>) -> Self {
        Self {
            bootstrap_brokers,
            client_id: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    /// Sets client ID.
    pub fn client_id(mut self, client_id: impl Into<Arc<str>>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set maximum size (in bytes) of message frames that can be received from a broker.
    pub fn max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Set the TCP connect timeout. `None` waits for the operating system.
    pub fn connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Build [`KafkaCluster`]. No connection is made until the first query.
    pub fn build(self) -> KafkaCluster {
        KafkaCluster {
            bootstrap_brokers: self.bootstrap_brokers,
            settings: ConnectionSettings {
                client_id: self
                    .client_id
                    .unwrap_or_else(|| Arc::from(DEFAULT_CLIENT_ID)),
                max_message_size: self.max_message_size,
                connect_timeout: self.connect_timeout,
            },
            topology: Default::default(),
            cached_arbitrary_broker: Mutex::new(None),
            partitions: Default::default(),
            brokers: Default::default(),
        }
    }
}

impl std::fmt::Debug for KafkaClusterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaClusterBuilder")
            .field("bootstrap_brokers", &self.bootstrap_brokers)
            .field("client_id", &self.client_id)
            .field("max_message_size", &self.max_message_size)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Leader of one partition as reported by metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartitionLeader {
    /// Broker id, `-1` while an election is running.
    leader: i32,
    error: Option<ProtocolError>,
}

impl PartitionLeader {
    /// A missing replica does not keep the leader from answering, every other partition error does.
    fn is_usable(&self) -> bool {
        self.leader >= 0 && matches!(self.error, None | Some(ProtocolError::ReplicaNotAvailable))
    }
}

/// Partition id to leader.
type PartitionLeaders = BTreeMap<i32, PartitionLeader>;

fn partition_leaders(topic: &MetadataResponseTopic) -> PartitionLeaders {
    topic
        .partitions
        .iter()
        .map(|p| {
            if let Some(error) = p.error {
                debug!(
                    topic = topic.name.0.as_str(),
                    partition = p.partition_index.0,
                    leader = p.leader_id.0,
                    %error,
                    "Partition metadata has error"
                );
            }
            let leader = PartitionLeader {
                leader: p.leader_id.0,
                error: p.error,
            };
            (p.partition_index.0, leader)
        })
        .collect()
}

/// Broker id to send partition requests to, or why there is none.
fn usable_leader(topic: &str, partition: i32, leader: Option<PartitionLeader>) -> Result<i32> {
    match leader {
        None => Err(Error::UnknownPartition {
            topic: topic.to_owned(),
            partition,
        }),
        Some(l) if l.is_usable() => Ok(l.leader),
        Some(PartitionLeader {
            error: Some(error), ..
        }) => Err(Error::Server {
            context: format!("leader of {topic}/{partition}"),
            error,
        }),
        Some(_) => Err(Error::LeaderNotAvailable {
            topic: topic.to_owned(),
            partition,
        }),
    }
}

/// A Kafka cluster reached over plain TCP.
///
/// Metadata queries go to one cached, arbitrarily picked broker. Offset queries go through [`KafkaBroker`] handles,
/// which are shared per broker id so that all partitions led by the same node use one connection.
pub struct KafkaCluster {
    /// Broker URLs used to bootstrap the topology.
    bootstrap_brokers: Vec<String>,

    settings: ConnectionSettings,

    /// Discovered brokers in the cluster.
    topology: BrokerTopology,

    /// The cached arbitrary broker, used for metadata and coordinator queries.
    cached_arbitrary_broker: Mutex<Option<BrokerConnection>>,

    /// Partition leaders per topic, as of the last metadata response that named the topic.
    partitions: RwLock<HashMap<String, PartitionLeaders>>,

    /// Broker handles by broker id.
    brokers: parking_lot::Mutex<HashMap<i32, Arc<KafkaBroker>>>,
}

impl KafkaCluster {
    /// Requests metadata for `topics` (all topics if `None`) and updates topology and partition leaders.
    async fn request_metadata(&self, topics: Option<&[String]>) -> Result<MetadataResponse> {
        let request = MetadataRequest {
            topics: topics.map(|t| {
                t.iter()
                    .map(|name| MetadataRequestTopic {
                        name: String_(name.clone()),
                    })
                    .collect()
            }),
            allow_auto_topic_creation: Some(Boolean(false)),
        };

        let broker = self.arbitrary_broker().await?;
        let response = match broker.request(&request).await {
            Ok(response) => response,
            Err(e @ (RequestError::Poisoned(_) | RequestError::IO(_))) => {
                self.invalidate_arbitrary_broker().await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.topology.update(&response.brokers);

        let mut partitions = self.partitions.write();
        for topic in &response.topics {
            match topic.error {
                None => {
                    partitions.insert(topic.name.0.clone(), partition_leaders(topic));
                }
                Some(ProtocolError::UnknownTopicOrPartition) => {
                    partitions.remove(&topic.name.0);
                }
                Some(error) => {
                    warn!(topic = topic.name.0.as_str(), %error, "Topic metadata has error");
                }
            }
        }
        debug!(topics = response.topics.len(), "Refreshed metadata");

        Ok(response)
    }

    /// Returns the cached arbitrary broker, connecting to one if needed.
    async fn arbitrary_broker(&self) -> Result<BrokerConnection> {
        let mut current = self.cached_arbitrary_broker.lock().await;
        match &*current {
            Some(broker) if !broker.is_poisoned() => return Ok(Arc::clone(broker)),
            Some(_) => debug!("Cached arbitrary broker is poisoned, reconnecting"),
            None => {}
        }

        let mut urls = if self.topology.is_empty() {
            self.bootstrap_brokers.clone()
        } else {
            self.topology.get_broker_urls()
        };
        // Randomise search order to encourage different clients to choose different brokers
        urls.shuffle(&mut rand::rng());

        for url in &urls {
            match broker::connect(None, url, &self.settings).await {
                Ok(connection) => {
                    *current = Some(Arc::clone(&connection));
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(%e, url = url.as_str(), "Failed to connect to broker");
                }
            }
        }

        Err(Error::NoBrokerAvailable { tried: urls })
    }

    async fn invalidate_arbitrary_broker(&self) {
        debug!("Invalidating cached arbitrary broker");
        self.cached_arbitrary_broker.lock().await.take();
    }

    fn cached_partitions(&self, topic: &str) -> Option<PartitionLeaders> {
        self.partitions.read().get(topic).cloned()
    }

    /// Handle for `broker_id`, shared with every other lookup of the same broker.
    fn broker_handle(&self, broker_id: i32) -> Result<Arc<KafkaBroker>> {
        let address = self
            .topology
            .get_broker(broker_id)
            .ok_or(Error::UnknownBroker { broker: broker_id })?;
        let url = address.to_string();

        let mut brokers = self.brokers.lock();
        if let Some(handle) = brokers.get(&broker_id) {
            if handle.url() == url {
                return Ok(Arc::clone(handle));
            }
            info!(broker = broker_id, url = url.as_str(), "Broker moved, replacing handle");
        }

        let handle = Arc::new(KafkaBroker::new(broker_id, url, self.settings.clone()));
        brokers.insert(broker_id, Arc::clone(&handle));
        Ok(handle)
    }
}

impl std::fmt::Debug for KafkaCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaCluster")
            .field("bootstrap_brokers", &self.bootstrap_brokers)
            .field("settings", &self.settings)
            .field("topology", &self.topology)
            .field("cached_arbitrary_broker", &self.cached_arbitrary_broker)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cluster for KafkaCluster {
    type Broker = KafkaBroker;
    type Error = Error;

    async fn list_topics(&self) -> Result<Vec<String>> {
        let response = self.request_metadata(None).await?;

        Ok(response
            .topics
            .into_iter()
            .filter(|t| t.error.is_none())
            .filter(|t| t.is_internal.map(|b| !b.0).unwrap_or(true))
            .map(|t| t.name.0)
            .collect())
    }

    async fn refresh_metadata(&self, topics: &[String]) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }
        self.request_metadata(Some(topics)).await.map(|_| ())
    }

    async fn list_partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let leaders = match self.cached_partitions(topic) {
            Some(leaders) => leaders,
            None => {
                self.refresh_metadata(&[topic.to_owned()]).await?;
                self.cached_partitions(topic)
                    .ok_or_else(|| Error::UnknownTopic {
                        topic: topic.to_owned(),
                    })?
            }
        };

        Ok(leaders.into_keys().collect())
    }

    async fn leader(&self, topic: &str, partition: i32) -> Result<Arc<KafkaBroker>> {
        let mut leader = self
            .cached_partitions(topic)
            .and_then(|leaders| leaders.get(&partition).copied());

        if !leader.is_some_and(|l| l.is_usable()) {
            self.refresh_metadata(&[topic.to_owned()]).await?;
            let leaders = self
                .cached_partitions(topic)
                .ok_or_else(|| Error::UnknownTopic {
                    topic: topic.to_owned(),
                })?;
            leader = leaders.get(&partition).copied();
        }

        let id = usable_leader(topic, partition, leader)?;
        debug!(topic, partition, leader = id, "Resolved partition leader");
        self.broker_handle(id)
    }

    async fn coordinator(&self, group: &str) -> Result<Arc<KafkaBroker>> {
        let request = FindCoordinatorRequest {
            key: String_(group.to_owned()),
            key_type: COORDINATOR_KEY_TYPE_GROUP,
        };

        let broker = self.arbitrary_broker().await?;
        let response = match broker.request(request).await {
            Ok(response) => response,
            Err(e @ (RequestError::Poisoned(_) | RequestError::IO(_))) => {
                self.invalidate_arbitrary_broker().await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(error) = response.error_code {
            return Err(Error::Server {
                context: format!("find coordinator for group \"{group}\""),
                error,
            });
        }

        let broker_id = response.node_id.0;
        self.topology.insert(
            broker_id,
            BrokerAddress {
                host: response.host.0,
                port: response.port.0,
            },
        );
        debug!(group, coordinator = broker_id, "Resolved group coordinator");

        self.broker_handle(broker_id)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        cluster::Broker,
        protocol::{
            messages::{MetadataResponseBroker, MetadataResponsePartition},
            primitives::{Array, Int32, String_},
        },
    };

    fn leader(id: i32) -> PartitionLeader {
        PartitionLeader {
            leader: id,
            error: None,
        }
    }

    fn cluster() -> KafkaCluster {
        KafkaClusterBuilder::new(vec!["localhost:9092".to_owned()])
            .client_id("test")
            .build()
    }

    fn add_broker(cluster: &KafkaCluster, id: i32, host: &str) {
        cluster.topology.update(&[MetadataResponseBroker {
            node_id: Int32(id),
            host: String_(host.to_owned()),
            port: Int32(9092),
            rack: None,
        }]);
    }

    #[test]
    fn test_builder_defaults() {
        let cluster = KafkaClusterBuilder::new(vec![]).build();
        assert_eq!(&*cluster.settings.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(cluster.settings.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(
            cluster.settings.connect_timeout,
            Some(DEFAULT_CONNECT_TIMEOUT)
        );
    }

    #[test]
    fn test_broker_handles_are_shared() {
        let cluster = cluster();
        add_broker(&cluster, 1, "kafka-1");
        add_broker(&cluster, 2, "kafka-2");

        let a = cluster.broker_handle(1).unwrap();
        let b = cluster.broker_handle(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), 1);

        let c = cluster.broker_handle(2).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        assert_matches!(
            cluster.broker_handle(3),
            Err(Error::UnknownBroker { broker: 3 })
        );
    }

    #[test]
    fn test_moved_broker_gets_new_handle() {
        let cluster = cluster();
        add_broker(&cluster, 1, "kafka-1");
        let before = cluster.broker_handle(1).unwrap();

        add_broker(&cluster, 1, "kafka-1-new");
        let after = cluster.broker_handle(1).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.url(), "kafka-1-new:9092");
    }

    #[test]
    fn test_partition_errors_are_kept() {
        let partition = |index: i32, leader: i32, error: Option<ProtocolError>| {
            MetadataResponsePartition {
                error,
                partition_index: Int32(index),
                leader_id: Int32(leader),
                replica_nodes: Array(Some(vec![])),
                isr_nodes: Array(Some(vec![])),
            }
        };
        let topic = MetadataResponseTopic {
            error: None,
            name: String_("foo".to_owned()),
            is_internal: None,
            partitions: vec![
                partition(0, 1, None),
                partition(1, 2, Some(ProtocolError::ReplicaNotAvailable)),
                partition(2, 3, Some(ProtocolError::NotLeaderOrFollower)),
                partition(3, -1, Some(ProtocolError::LeaderNotAvailable)),
                partition(4, -1, None),
            ],
        };

        let leaders = partition_leaders(&topic);
        let resolve = |p: i32| usable_leader("foo", p, leaders.get(&p).copied());

        assert_eq!(resolve(0).unwrap(), 1);
        assert_eq!(resolve(1).unwrap(), 2);
        assert_matches!(
            resolve(2),
            Err(Error::Server {
                error: ProtocolError::NotLeaderOrFollower,
                ..
            })
        );
        assert_matches!(
            resolve(3),
            Err(Error::Server {
                error: ProtocolError::LeaderNotAvailable,
                ..
            })
        );
        assert_matches!(
            resolve(4),
            Err(Error::LeaderNotAvailable { partition: 4, .. })
        );
        assert_matches!(resolve(5), Err(Error::UnknownPartition { partition: 5, .. }));
    }

    #[tokio::test]
    async fn test_cached_partitions_skip_metadata_request() {
        let cluster = cluster();
        add_broker(&cluster, 1, "kafka-1");
        cluster
            .partitions
            .write()
            .insert("foo".to_owned(), BTreeMap::from([(1, leader(1)), (0, leader(1))]));

        // no broker is reachable, so these must be served from the cache
        assert_eq!(cluster.list_partitions("foo").await.unwrap(), vec![0, 1]);
        assert_eq!(cluster.leader("foo", 0).await.unwrap().id(), 1);
        cluster.refresh_metadata(&[]).await.unwrap();
    }
}
