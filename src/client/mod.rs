//! The offset engine.
//!
//! [`OffsetClient`] answers offset questions for a topic: the oldest and newest available offset per partition, the
//! offsets a consumer group committed, and the drift between the two. It keeps one connection per partition leader
//! and one per group coordinator, opened on first use and shared afterwards.
//!
//! ```no_run
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! use kdrift::{client::OffsetClientBuilder, cluster::OffsetVersion, connection::KafkaClusterBuilder};
//!
//! let cluster = KafkaClusterBuilder::new(vec!["localhost:9092".to_owned()]).build();
//! let client = OffsetClientBuilder::new(&cluster).build();
//! client.initialize().await?;
//!
//! let drift = client
//!     .get_drift("my-group", "my-topic", OffsetVersion::StoredInLog, &[])
//!     .await?;
//! # Ok(())
//! # }
//! ```
use std::{fmt, future::Future, sync::Arc, time::Duration};

use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::cluster::{BoxError, Broker, Cluster, OffsetMap, PartitionSet, TopicPartition};

pub mod connection_state;
mod drift;
pub mod error;
#[cfg(test)]
mod fake;
mod group;
mod metadata_cache;
mod offsets;
mod registry;

pub use self::drift::{
    DriftReport, PartitionDrift, compute_drift, compute_drift_report, offset_in_range,
};
use self::{
    connection_state::ManagedConnection,
    error::{Error, RequestContext, Result},
    metadata_cache::MetadataCache,
    registry::Registry,
};

/// Default bound on every cluster and broker call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How coordinator connections are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorPolicy {
    /// Look the coordinator up on every call. The cached connection is kept while it points at the same broker.
    #[default]
    RefreshEachCall,

    /// Look the coordinator up once per group and keep the connection.
    CacheOnce,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on every cluster and broker call. `None` waits forever.
    pub request_timeout: Option<Duration>,

    pub coordinator_policy: CoordinatorPolicy,

    /// Refresh a topic's metadata before looking up an uncached partition leader.
    pub refresh_before_leader_lookup: bool,

    /// Connect to every partition leader during [`OffsetClient::initialize`].
    pub eager_leader_connections: bool,

    /// Per-partition queries in flight at once. `1` queries partitions one after another.
    pub max_in_flight_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            coordinator_policy: CoordinatorPolicy::default(),
            refresh_before_leader_lookup: true,
            eager_leader_connections: false,
            max_in_flight_requests: 1,
        }
    }
}

/// Builder for [`OffsetClient`].
pub struct OffsetClientBuilder<'a, C> {
    cluster: &'a C,
    config: ClientConfig,
}

impl<'a, C> OffsetClientBuilder<'a, C>
where
    C: Cluster,
{
    pub fn new(cluster: &'a C) -> Self {
        Self {
            cluster,
            config: ClientConfig::default(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn coordinator_policy(mut self, policy: CoordinatorPolicy) -> Self {
        self.config.coordinator_policy = policy;
        self
    }

    pub fn refresh_before_leader_lookup(mut self, refresh: bool) -> Self {
        self.config.refresh_before_leader_lookup = refresh;
        self
    }

    pub fn eager_leader_connections(mut self, eager: bool) -> Self {
        self.config.eager_leader_connections = eager;
        self
    }

    pub fn max_in_flight_requests(mut self, max: usize) -> Self {
        self.config.max_in_flight_requests = max.max(1);
        self
    }

    /// Build [`OffsetClient`]. Nothing is queried until [`OffsetClient::initialize`].
    pub fn build(self) -> OffsetClient<'a, C> {
        OffsetClient {
            cluster: self.cluster,
            config: self.config,
            metadata: MetadataCache::default(),
            leaders: Registry::new(),
            coordinators: Registry::new(),
        }
    }
}

impl<C> fmt::Debug for OffsetClientBuilder<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolves offsets through a borrowed [`Cluster`].
pub struct OffsetClient<'a, C>
where
    C: Cluster,
{
    cluster: &'a C,
    config: ClientConfig,
    metadata: MetadataCache,
    leaders: Registry<TopicPartition, C::Broker>,
    coordinators: Registry<String, C::Broker>,
}

impl<C> fmt::Debug for OffsetClient<'_, C>
where
    C: Cluster,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetClient")
            .field("config", &self.config)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl<'a, C> OffsetClient<'a, C>
where
    C: Cluster,
{
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Loads the partitions of every topic into the metadata cache.
    ///
    /// The cache is only replaced if every topic could be read. With
    /// [`eager_leader_connections`](ClientConfig::eager_leader_connections) every partition leader is connected
    /// first, and a failed connection leaves the cache untouched as well.
    pub async fn initialize(&self) -> Result<()> {
        let cluster_err = |context: RequestContext| {
            move |e: C::Error| Error::ClusterQuery {
                context,
                source: e.into(),
            }
        };

        let topics = self
            .bounded(|| "list topics".to_owned(), async {
                self.cluster
                    .list_topics()
                    .await
                    .map_err(cluster_err(RequestContext::default()))
            })
            .await?;

        self.bounded(|| "metadata refresh".to_owned(), async {
            self.cluster
                .refresh_metadata(&topics)
                .await
                .map_err(cluster_err(RequestContext::default()))
        })
        .await?;

        let mut partitions = std::collections::HashMap::with_capacity(topics.len());
        for topic in &topics {
            let set: PartitionSet = self
                .bounded(
                    || format!("list partitions of {topic}"),
                    async {
                        self.cluster
                            .list_partitions(topic)
                            .await
                            .map_err(cluster_err(RequestContext::topic(topic)))
                    },
                )
                .await?
                .into_iter()
                .collect();
            partitions.insert(topic.clone(), set);
        }

        if self.config.eager_leader_connections {
            let mut staged: Vec<_> = partitions.iter().collect();
            staged.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (topic, set) in staged {
                for partition in set.iter() {
                    self.resolve_leader(topic, partition).await?;
                }
            }
            info!("Connected to all partition leaders");
        }

        info!(topics = partitions.len(), "Loaded topic metadata");
        self.metadata.replace(partitions);

        Ok(())
    }

    /// Sorted names of the topics known since the last [`initialize`](Self::initialize).
    pub fn topics(&self) -> Vec<String> {
        self.metadata.topics()
    }

    /// Sorted partition ids of `topic` as of the last [`initialize`](Self::initialize).
    pub fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        self.metadata
            .partitions(topic)
            .map(|set| set.to_vec())
            .ok_or_else(|| Error::UnknownTopic {
                topic: topic.to_owned(),
            })
    }

    /// Returns the open connection to the leader of the partition, connecting on first use.
    pub async fn resolve_leader(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Arc<ManagedConnection<C::Broker>>> {
        let key = TopicPartition::new(topic, partition);
        let leader_err = |source: BoxError| Error::LeaderResolution {
            topic: topic.to_owned(),
            partition,
            source,
        };

        self.leaders
            .get_or_try_insert(key, || async {
                if self.config.refresh_before_leader_lookup {
                    self.bounded(|| format!("metadata refresh for {topic}"), async {
                        self.cluster
                            .refresh_metadata(&[topic.to_owned()])
                            .await
                            .map_err(|e| leader_err(e.into()))
                    })
                    .await?;
                }

                let broker = self
                    .bounded(|| format!("leader lookup for {topic}/{partition}"), async {
                        self.cluster
                            .leader(topic, partition)
                            .await
                            .map_err(|e| leader_err(e.into()))
                    })
                    .await?;

                let conn = Arc::new(ManagedConnection::new(broker));
                self.bounded(|| format!("connect to leader of {topic}/{partition}"), async {
                    conn.ensure_open().await.map_err(|e| leader_err(e.into()))
                })
                .await?;

                debug!(
                    topic,
                    partition,
                    broker = conn.broker_id(),
                    "Cached leader connection"
                );
                Ok(conn)
            })
            .await
    }

    /// Returns the open connection to the coordinator of `group`, following
    /// [`CoordinatorPolicy`].
    pub async fn resolve_coordinator(
        &self,
        group: &str,
    ) -> Result<Arc<ManagedConnection<C::Broker>>> {
        match self.config.coordinator_policy {
            CoordinatorPolicy::CacheOnce => {
                self.coordinators
                    .get_or_try_insert(group.to_owned(), || async {
                        let broker = self.lookup_coordinator(group).await?;
                        self.open_coordinator(group, broker).await
                    })
                    .await
            }
            CoordinatorPolicy::RefreshEachCall => {
                let broker = self.lookup_coordinator(group).await?;
                let broker_id = broker.id();

                self.coordinators
                    .get_matching_or_try_insert(
                        group.to_owned(),
                        |cached| cached.broker_id() == broker_id,
                        || self.open_coordinator(group, broker),
                    )
                    .await
            }
        }
    }

    async fn lookup_coordinator(&self, group: &str) -> Result<Arc<C::Broker>> {
        self.bounded(|| format!("coordinator lookup for group {group}"), async {
            self.cluster
                .coordinator(group)
                .await
                .map_err(|e| Error::CoordinatorResolution {
                    group: group.to_owned(),
                    source: e.into(),
                })
        })
        .await
    }

    async fn open_coordinator(
        &self,
        group: &str,
        broker: Arc<C::Broker>,
    ) -> Result<Arc<ManagedConnection<C::Broker>>> {
        let conn = Arc::new(ManagedConnection::new(broker));
        self.bounded(|| format!("connect to coordinator of group {group}"), async {
            conn.ensure_open()
                .await
                .map_err(|e| Error::CoordinatorResolution {
                    group: group.to_owned(),
                    source: e.into(),
                })
        })
        .await?;

        info!(group, broker = conn.broker_id(), "Using coordinator");
        Ok(conn)
    }

    /// Partitions an operation on `topic` covers: all of them for an empty request, the requested ones otherwise.
    fn requested_partitions(&self, topic: &str, requested: &[i32]) -> Result<Vec<i32>> {
        let available = self
            .metadata
            .partitions(topic)
            .ok_or_else(|| Error::UnknownTopic {
                topic: topic.to_owned(),
            })?;

        if requested.is_empty() {
            return Ok(available.to_vec());
        }

        if requested.len() > available.len() {
            return Err(Error::PartitionCountMismatch {
                topic: topic.to_owned(),
                requested: requested.len(),
                available: available.len(),
            });
        }

        if let Some(&partition) = requested.iter().find(|p| !available.contains(**p)) {
            return Err(Error::UnknownPartition {
                topic: topic.to_owned(),
                partition,
            });
        }

        let requested: PartitionSet = requested.iter().copied().collect();
        Ok(requested.to_vec())
    }

    /// Runs `query` for every partition and collects the results.
    async fn collect_offsets<F, Fut>(&self, partitions: Vec<i32>, query: F) -> Result<OffsetMap>
    where
        F: Fn(i32) -> Fut,
        Fut: Future<Output = Result<(i32, i64)>>,
    {
        if self.config.max_in_flight_requests <= 1 {
            let mut offsets = OffsetMap::with_capacity(partitions.len());
            for partition in partitions {
                let (partition, offset) = query(partition).await?;
                offsets.insert(partition, offset);
            }
            return Ok(offsets);
        }

        futures::stream::iter(partitions.into_iter().map(query))
            .buffer_unordered(self.config.max_in_flight_requests)
            .try_collect()
            .await
    }

    /// Awaits `fut`, bounded by [`ClientConfig::request_timeout`].
    async fn bounded<T, O, F>(&self, operation: O, fut: F) -> Result<T>
    where
        O: FnOnce() -> String,
        F: Future<Output = Result<T>>,
    {
        match self.config.request_timeout {
            None => fut.await,
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| Error::Timeout {
                    operation: operation(),
                    timeout,
                })?,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use assert_matches::assert_matches;

    use super::*;
    use crate::client::{connection_state::ConnectionState, fake::two_partition_cluster};

    #[tokio::test]
    async fn test_initialize_loads_all_topics() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();

        assert_matches!(client.partitions("foo"), Err(Error::UnknownTopic { .. }));

        client.initialize().await.unwrap();
        assert_eq!(client.topics(), vec!["bar", "foo"]);
        assert_eq!(client.partitions("foo").unwrap(), vec![0, 1]);
        assert_eq!(client.partitions("bar").unwrap(), vec![0]);
        assert_eq!(cluster.list_topics_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.refresh_calls.load(Ordering::SeqCst), 1);

        // lazy by default
        assert_eq!(cluster.opens(), 0);
    }

    #[tokio::test]
    async fn test_initialize_failure_keeps_previous_cache() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        cluster.fail_topic("foo");
        let err = client.initialize().await.unwrap_err();
        assert_matches!(
            err,
            Error::ClusterQuery { context, .. } if context == RequestContext::topic("foo")
        );
        assert_eq!(client.topics(), vec!["bar", "foo"]);
    }

    #[tokio::test]
    async fn test_initialize_topic_listing_failure_keeps_previous_cache() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        cluster.add_topic("baz", &[0], 1);
        cluster.set_fail_list_topics(true);
        let err = client.initialize().await.unwrap_err();
        assert_matches!(
            err,
            Error::ClusterQuery { context, .. } if context == RequestContext::default()
        );
        assert_eq!(client.topics(), vec!["bar", "foo"]);
        assert_eq!(cluster.refresh_calls.load(Ordering::SeqCst), 1);

        cluster.set_fail_list_topics(false);
        client.initialize().await.unwrap();
        assert_eq!(client.topics(), vec!["bar", "baz", "foo"]);
    }

    #[tokio::test]
    async fn test_initialize_refresh_failure_keeps_previous_cache() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        cluster.add_topic("baz", &[0], 1);
        cluster.set_fail_refresh(true);
        let err = client.initialize().await.unwrap_err();
        assert_matches!(
            err,
            Error::ClusterQuery { context, source } if context == RequestContext::default()
                && source.to_string() == "fake failure: cannot refresh metadata"
        );
        assert_eq!(client.topics(), vec!["bar", "foo"]);
    }

    #[tokio::test]
    async fn test_initialize_eager_failure_keeps_previous_cache() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster)
            .eager_leader_connections(true)
            .build();
        client.initialize().await.unwrap();

        cluster.add_topic("baz", &[0], 3);
        cluster.broker(3).set_fail_open(true);
        let err = client.initialize().await.unwrap_err();
        assert_matches!(
            err,
            Error::LeaderResolution { topic, partition: 0, .. } if topic == "baz"
        );
        assert_eq!(client.topics(), vec!["bar", "foo"]);
        assert_matches!(client.partitions("baz"), Err(Error::UnknownTopic { .. }));
    }

    #[tokio::test]
    async fn test_initialize_eager_connects_leaders() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster)
            .eager_leader_connections(true)
            .build();
        client.initialize().await.unwrap();

        assert_eq!(cluster.leader_calls.load(Ordering::SeqCst), 3);
        assert_eq!(cluster.broker(1).opens(), 2);
        assert_eq!(cluster.broker(2).opens(), 1);
    }

    #[tokio::test]
    async fn test_resolve_leader_is_cached() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();

        let a = client.resolve_leader("foo", 0).await.unwrap();
        let b = client.resolve_leader("foo", 0).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state(), ConnectionState::Open);
        assert_eq!(a.broker().id(), 1);
        assert_eq!(cluster.leader_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.opens(), 1);
    }

    #[tokio::test]
    async fn test_resolve_leader_concurrent_first_use() {
        let cluster = two_partition_cluster();
        cluster.broker(1).set_open_delay(Duration::from_millis(20));
        let client = OffsetClientBuilder::new(&cluster).build();

        let (a, b, c) = tokio::join!(
            client.resolve_leader("foo", 1),
            client.resolve_leader("foo", 1),
            client.resolve_leader("foo", 1),
        );
        let a = a.unwrap();
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert!(Arc::ptr_eq(&a, &c.unwrap()));
        assert_eq!(cluster.broker(1).opens(), 1);
        assert_eq!(cluster.leader_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_leader_without_refresh() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster)
            .refresh_before_leader_lookup(false)
            .build();

        client.resolve_leader("foo", 0).await.unwrap();
        assert_eq!(cluster.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_leader_failures() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();

        let err = client.resolve_leader("foo", 7).await.unwrap_err();
        assert_matches!(
            err,
            Error::LeaderResolution { topic, partition: 7, .. } if topic == "foo"
        );

        cluster.broker(1).set_fail_open(true);
        let err = client.resolve_leader("foo", 0).await.unwrap_err();
        assert_matches!(err, Error::LeaderResolution { partition: 0, .. });

        // nothing was cached, so the next call tries again
        cluster.broker(1).set_fail_open(false);
        client.resolve_leader("foo", 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_coordinator_refresh_each_call() {
        let cluster = two_partition_cluster();
        cluster.set_coordinator("g", 1);
        let client = OffsetClientBuilder::new(&cluster).build();

        let a = client.resolve_coordinator("g").await.unwrap();
        let b = client.resolve_coordinator("g").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cluster.coordinator_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cluster.broker(1).opens(), 1);

        cluster.set_coordinator("g", 2);
        let c = client.resolve_coordinator("g").await.unwrap();
        assert_eq!(c.broker_id(), 2);
        assert_eq!(cluster.broker(2).opens(), 1);
    }

    #[tokio::test]
    async fn test_coordinator_cache_once() {
        let cluster = two_partition_cluster();
        cluster.set_coordinator("g", 1);
        let client = OffsetClientBuilder::new(&cluster)
            .coordinator_policy(CoordinatorPolicy::CacheOnce)
            .build();

        client.resolve_coordinator("g").await.unwrap();
        cluster.set_coordinator("g", 2);
        let conn = client.resolve_coordinator("g").await.unwrap();
        assert_eq!(conn.broker_id(), 1);
        assert_eq!(cluster.coordinator_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coordinator_unknown_group() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();

        let err = client.resolve_coordinator("nobody").await.unwrap_err();
        assert_matches!(err, Error::CoordinatorResolution { group, .. } if group == "nobody");
    }

    #[tokio::test]
    async fn test_requested_partitions() {
        let cluster = two_partition_cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        assert_eq!(client.requested_partitions("foo", &[]).unwrap(), vec![0, 1]);
        assert_eq!(client.requested_partitions("foo", &[1]).unwrap(), vec![1]);
        assert_eq!(
            client.requested_partitions("foo", &[1, 0]).unwrap(),
            vec![0, 1]
        );
        assert_matches!(
            client.requested_partitions("foo", &[0, 1, 2]),
            Err(Error::PartitionCountMismatch {
                requested: 3,
                available: 2,
                ..
            })
        );
        assert_matches!(
            client.requested_partitions("foo", &[5]),
            Err(Error::UnknownPartition { partition: 5, .. })
        );
        assert_matches!(
            client.requested_partitions("nope", &[]),
            Err(Error::UnknownTopic { .. })
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let cluster = two_partition_cluster();
        cluster.set_cluster_delay(Duration::from_secs(10));
        let client = OffsetClientBuilder::new(&cluster)
            .request_timeout(Some(Duration::from_millis(20)))
            .build();

        let err = client.initialize().await.unwrap_err();
        assert_matches!(
            err,
            Error::Timeout { operation, timeout } if operation == "list topics" && timeout == Duration::from_millis(20)
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.coordinator_policy, CoordinatorPolicy::RefreshEachCall);
        assert!(config.refresh_before_leader_lookup);
        assert!(!config.eager_leader_connections);
        assert_eq!(config.max_in_flight_requests, 1);
    }
}
