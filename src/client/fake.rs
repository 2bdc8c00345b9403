//! In-memory [`Cluster`] for engine tests.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    ProtocolError,
    cluster::{Broker, Cluster, CommittedOffsetBlock, OffsetAt, OffsetVersion, OffsetsBlock},
};

#[derive(Debug, Error)]
#[error("fake failure: {0}")]
pub(crate) struct FakeError(pub String);

/// Offsets served by every fake broker.
#[derive(Debug, Default)]
pub(crate) struct FakeLog {
    pub oldest: HashMap<(String, i32), i64>,
    pub newest: HashMap<(String, i32), i64>,
    pub committed: HashMap<(String, String, i32, OffsetVersion), i64>,
    pub offset_errors: HashMap<(String, i32), ProtocolError>,
    pub committed_errors: HashMap<(String, i32), ProtocolError>,
    pub empty_blocks: bool,
}

#[derive(Debug)]
pub(crate) struct FakeBroker {
    id: i32,
    log: Arc<Mutex<FakeLog>>,
    opens: AtomicUsize,
    fail_open: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    request_delay: Arc<Mutex<Option<Duration>>>,
}

impl FakeBroker {
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = Some(delay);
    }

    async fn maybe_delay(&self) {
        let delay = *self.request_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Broker for FakeBroker {
    type Error = FakeError;

    fn id(&self) -> i32 {
        self.id
    }

    async fn open(&self) -> Result<(), FakeError> {
        let delay = *self.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(FakeError(format!("cannot open broker {}", self.id)));
        }
        Ok(())
    }

    async fn fetch_offsets(
        &self,
        topic: &str,
        partition: i32,
        at: OffsetAt,
        max_results: i32,
    ) -> Result<OffsetsBlock, FakeError> {
        assert_eq!(max_results, 1);
        self.maybe_delay().await;

        let log = self.log.lock();
        let key = (topic.to_owned(), partition);
        if let Some(error) = log.offset_errors.get(&key) {
            return Ok(OffsetsBlock {
                offsets: vec![],
                error: Some(*error),
            });
        }
        if log.empty_blocks {
            return Ok(OffsetsBlock::default());
        }

        let offsets = match at {
            OffsetAt::Earliest => &log.oldest,
            OffsetAt::Latest => &log.newest,
        };
        let offset = offsets
            .get(&key)
            .copied()
            .ok_or_else(|| FakeError(format!("no offset for {topic}/{partition}")))?;

        Ok(OffsetsBlock {
            offsets: vec![offset],
            error: None,
        })
    }

    async fn fetch_committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        version: OffsetVersion,
    ) -> Result<CommittedOffsetBlock, FakeError> {
        self.maybe_delay().await;

        let log = self.log.lock();
        if let Some(error) = log.committed_errors.get(&(topic.to_owned(), partition)) {
            return Ok(CommittedOffsetBlock {
                offset: -1,
                error: Some(*error),
            });
        }

        let offset = log
            .committed
            .get(&(group.to_owned(), topic.to_owned(), partition, version))
            .copied()
            .unwrap_or(crate::cluster::NO_COMMITTED_OFFSET);

        Ok(CommittedOffsetBlock {
            offset,
            error: None,
        })
    }
}

/// Topic `foo` with partitions 0 and 1 on broker 1, topic `bar` with partition 0 on broker 2.
pub(crate) fn two_partition_cluster() -> FakeCluster {
    FakeCluster::new()
        .with_topic("foo", &[0, 1], 1)
        .with_topic("bar", &[0], 2)
}

/// Cluster whose topology and offsets are set up by the test.
#[derive(Debug, Default)]
pub(crate) struct FakeCluster {
    pub log: Arc<Mutex<FakeLog>>,
    topics: Mutex<BTreeMap<String, Vec<i32>>>,
    leaders: Mutex<HashMap<(String, i32), i32>>,
    coordinators: Mutex<HashMap<String, i32>>,
    brokers: Mutex<HashMap<i32, Arc<FakeBroker>>>,
    request_delay: Arc<Mutex<Option<Duration>>>,
    cluster_delay: Mutex<Option<Duration>>,
    failing_topic: Mutex<Option<String>>,
    fail_list_topics: AtomicBool,
    fail_refresh: AtomicBool,
    pub list_topics_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub leader_calls: AtomicUsize,
    pub coordinator_calls: AtomicUsize,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a topic whose partitions are all led by `leader`.
    pub(crate) fn with_topic(self, topic: &str, partitions: &[i32], leader: i32) -> Self {
        self.add_topic(topic, partitions, leader);
        self
    }

    pub(crate) fn add_topic(&self, topic: &str, partitions: &[i32], leader: i32) {
        self.topics
            .lock()
            .insert(topic.to_owned(), partitions.to_vec());
        for &p in partitions {
            self.set_leader(topic, p, leader);
        }
    }

    pub(crate) fn set_leader(&self, topic: &str, partition: i32, broker: i32) {
        self.leaders
            .lock()
            .insert((topic.to_owned(), partition), broker);
    }

    pub(crate) fn set_coordinator(&self, group: &str, broker: i32) {
        self.coordinators.lock().insert(group.to_owned(), broker);
    }

    pub(crate) fn set_offsets(&self, topic: &str, at: OffsetAt, offsets: &[(i32, i64)]) {
        let mut log = self.log.lock();
        let target = match at {
            OffsetAt::Earliest => &mut log.oldest,
            OffsetAt::Latest => &mut log.newest,
        };
        for &(p, o) in offsets {
            target.insert((topic.to_owned(), p), o);
        }
    }

    pub(crate) fn set_committed(
        &self,
        group: &str,
        topic: &str,
        version: OffsetVersion,
        offsets: &[(i32, i64)],
    ) {
        let mut log = self.log.lock();
        for &(p, o) in offsets {
            log.committed
                .insert((group.to_owned(), topic.to_owned(), p, version), o);
        }
    }

    /// Delays every broker request.
    pub(crate) fn set_request_delay(&self, delay: Duration) {
        *self.request_delay.lock() = Some(delay);
    }

    /// Delays every cluster query.
    pub(crate) fn set_cluster_delay(&self, delay: Duration) {
        *self.cluster_delay.lock() = Some(delay);
    }

    /// Makes partition listing fail for `topic`.
    pub(crate) fn fail_topic(&self, topic: &str) {
        *self.failing_topic.lock() = Some(topic.to_owned());
    }

    pub(crate) fn set_fail_list_topics(&self, fail: bool) {
        self.fail_list_topics.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn broker(&self, id: i32) -> Arc<FakeBroker> {
        let mut brokers = self.brokers.lock();
        let broker = brokers.entry(id).or_insert_with(|| {
            Arc::new(FakeBroker {
                id,
                log: Arc::clone(&self.log),
                opens: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
                open_delay: Mutex::new(None),
                request_delay: Arc::clone(&self.request_delay),
            })
        });
        Arc::clone(broker)
    }

    /// Total opens over all brokers.
    pub(crate) fn opens(&self) -> usize {
        self.brokers.lock().values().map(|b| b.opens()).sum()
    }

    async fn maybe_delay(&self) {
        let delay = *self.cluster_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    type Broker = FakeBroker;
    type Error = FakeError;

    async fn list_topics(&self) -> Result<Vec<String>, FakeError> {
        self.maybe_delay().await;
        self.list_topics_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list_topics.load(Ordering::SeqCst) {
            return Err(FakeError("cannot list topics".to_owned()));
        }
        Ok(self.topics.lock().keys().cloned().collect())
    }

    async fn refresh_metadata(&self, _topics: &[String]) -> Result<(), FakeError> {
        self.maybe_delay().await;
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(FakeError("cannot refresh metadata".to_owned()));
        }
        Ok(())
    }

    async fn list_partitions(&self, topic: &str) -> Result<Vec<i32>, FakeError> {
        self.maybe_delay().await;
        if self.failing_topic.lock().as_deref() == Some(topic) {
            return Err(FakeError(format!("cannot list partitions of {topic}")));
        }
        self.topics
            .lock()
            .get(topic)
            .cloned()
            .ok_or_else(|| FakeError(format!("unknown topic {topic}")))
    }

    async fn leader(&self, topic: &str, partition: i32) -> Result<Arc<FakeBroker>, FakeError> {
        self.maybe_delay().await;
        self.leader_calls.fetch_add(1, Ordering::SeqCst);
        let id = self
            .leaders
            .lock()
            .get(&(topic.to_owned(), partition))
            .copied()
            .ok_or_else(|| FakeError(format!("no leader for {topic}/{partition}")))?;
        Ok(self.broker(id))
    }

    async fn coordinator(&self, group: &str) -> Result<Arc<FakeBroker>, FakeError> {
        self.maybe_delay().await;
        self.coordinator_calls.fetch_add(1, Ordering::SeqCst);
        let id = self
            .coordinators
            .lock()
            .get(group)
            .copied()
            .ok_or_else(|| FakeError(format!("no coordinator for {group}")))?;
        Ok(self.broker(id))
    }
}
