use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{io::BufStream, sync::Mutex};
use tracing::{debug, info};

use crate::{
    cluster::{Broker, CommittedOffsetBlock, OffsetAt, OffsetVersion, OffsetsBlock},
    messenger::{Messenger, RequestError},
    protocol::{
        api_version::{ApiVersion, ApiVersionRange},
        messages::{
            ListOffsetsRequest, ListOffsetsRequestPartition, ListOffsetsRequestTopic,
            OffsetFetchRequest, OffsetFetchRequestTopic,
        },
        primitives::{Array, Int32, Int64, String_},
    },
};

use super::{Error, Result, transport};

pub type MessengerTransport = Messenger<BufStream<transport::Transport>>;

/// A connection to a broker.
pub type BrokerConnection = Arc<MessengerTransport>;

/// Committed offsets kept by the coordinating service are only served by `OffsetFetch` v0.
const COORDINATING_SERVICE_VERSIONS: ApiVersionRange =
    ApiVersionRange::new(ApiVersion::new(0), ApiVersion::new(0));

/// Committed offsets kept in the offsets log are served by `OffsetFetch` v1 and later.
const LOG_VERSIONS: ApiVersionRange = ApiVersionRange::new(ApiVersion::new(1), ApiVersion::new(5));

/// Everything needed to open a broker connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub client_id: Arc<str>,
    pub max_message_size: usize,
    pub connect_timeout: Option<Duration>,
}

/// Opens a connection to `url` and negotiates API versions.
pub(crate) async fn connect(
    broker: Option<i32>,
    url: &str,
    settings: &ConnectionSettings,
) -> Result<BrokerConnection> {
    info!(broker, url, "Establishing new connection");

    let transport = transport::connect(url, settings.connect_timeout)
        .await
        .map_err(|error| Error::Transport {
            broker: url.to_owned(),
            error,
        })?;

    let messenger = Messenger::new(
        BufStream::new(transport),
        settings.max_message_size,
        Arc::clone(&settings.client_id),
    );
    messenger.sync_versions().await?;
    Ok(Arc::new(messenger))
}

/// Handle to one broker of a [`KafkaCluster`](super::KafkaCluster).
///
/// The handle connects lazily and keeps at most one connection. A connection that fails is dropped, so the next call
/// connects again.
pub struct KafkaBroker {
    id: i32,
    url: String,
    settings: ConnectionSettings,
    connection: Mutex<Option<BrokerConnection>>,
}

impl KafkaBroker {
    pub(crate) fn new(id: i32, url: String, settings: ConnectionSettings) -> Self {
        Self {
            id,
            url,
            settings,
            connection: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connection(&self) -> Result<BrokerConnection> {
        let mut current = self.connection.lock().await;
        match &*current {
            Some(connection) if !connection.is_poisoned() => return Ok(Arc::clone(connection)),
            Some(_) => debug!(broker = self.id, "Cached connection is poisoned, reconnecting"),
            None => {}
        }

        let connection = connect(Some(self.id), &self.url, &self.settings).await?;
        *current = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Drops the cached connection if `err` means the stream is unusable.
    async fn check_request_error(&self, err: RequestError) -> Error {
        if matches!(err, RequestError::Poisoned(_) | RequestError::IO(_)) {
            debug!(broker = self.id, e = %err, "Dropping broken connection");
            self.connection.lock().await.take();
        }
        err.into()
    }
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("id", &self.id)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    type Error = Error;

    fn id(&self) -> i32 {
        self.id
    }

    async fn open(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn fetch_offsets(
        &self,
        topic: &str,
        partition: i32,
        at: OffsetAt,
        max_results: i32,
    ) -> Result<OffsetsBlock> {
        let request = ListOffsetsRequest {
            replica_id: Int32(-1),
            isolation_level: None,
            topics: vec![ListOffsetsRequestTopic {
                name: String_(topic.to_owned()),
                partitions: vec![ListOffsetsRequestPartition {
                    partition_index: Int32(partition),
                    timestamp: Int64(at.timestamp()),
                    max_num_offsets: Some(Int32(max_results)),
                }],
            }],
        };

        let connection = self.connection().await?;
        let response = match connection.request(request).await {
            Ok(response) => response,
            Err(e) => return Err(self.check_request_error(e).await),
        };

        let block = response
            .block(topic, partition)
            .ok_or_else(|| Error::MissingBlock {
                context: format!("list offsets {topic}/{partition}"),
            })?;

        Ok(OffsetsBlock {
            offsets: block.offsets(),
            error: block.error_code,
        })
    }

    async fn fetch_committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        version: OffsetVersion,
    ) -> Result<CommittedOffsetBlock> {
        let request = OffsetFetchRequest {
            group_id: String_(group.to_owned()),
            topics: Some(vec![OffsetFetchRequestTopic {
                name: String_(topic.to_owned()),
                partition_indexes: Array(Some(vec![Int32(partition)])),
            }]),
        };
        let range = match version {
            OffsetVersion::StoredInCoordinatingService => COORDINATING_SERVICE_VERSIONS,
            OffsetVersion::StoredInLog => LOG_VERSIONS,
        };

        let connection = self.connection().await?;
        let response = match connection.request_in_range(request, range).await {
            Ok(response) => response,
            Err(e) => return Err(self.check_request_error(e).await),
        };

        match (response.block(topic, partition), response.error_code) {
            (Some(block), top_level) => Ok(CommittedOffsetBlock {
                offset: block.committed_offset.0,
                error: top_level.or(block.error_code),
            }),
            (None, Some(error)) => Ok(CommittedOffsetBlock {
                offset: crate::cluster::NO_COMMITTED_OFFSET,
                error: Some(error),
            }),
            (None, None) => Err(Error::MissingBlock {
                context: format!("offset fetch {group} {topic}/{partition} v{version}"),
            }),
        }
    }
}
