use std::sync::Arc;

use tracing::debug;

use crate::cluster::{Broker, Cluster, OffsetMap, OffsetVersion};

use super::{
    OffsetClient,
    connection_state::ManagedConnection,
    error::{Error, RequestContext, Result},
};

impl<C> OffsetClient<'_, C>
where
    C: Cluster,
{
    /// Offsets `group` committed per partition of `topic`.
    ///
    /// Values are returned as stored, i.e. the offset of the next message the group will read. Partitions the group
    /// never committed to report [`NO_COMMITTED_OFFSET`](crate::cluster::NO_COMMITTED_OFFSET). An empty `partitions`
    /// slice means every partition of the topic.
    pub async fn get_consumer_group_offsets(
        &self,
        group: &str,
        topic: &str,
        version: OffsetVersion,
        partitions: &[i32],
    ) -> Result<OffsetMap> {
        let partitions = self.requested_partitions(topic, partitions)?;
        let coordinator = self.resolve_coordinator(group).await?;
        debug!(
            group,
            topic,
            %version,
            coordinator = coordinator.broker_id(),
            "Fetching committed offsets"
        );

        self.collect_offsets(partitions, |partition| {
            self.fetch_committed_offset(&coordinator, group, topic, partition, version)
        })
        .await
    }

    async fn fetch_committed_offset(
        &self,
        coordinator: &Arc<ManagedConnection<C::Broker>>,
        group: &str,
        topic: &str,
        partition: i32,
        version: OffsetVersion,
    ) -> Result<(i32, i64)> {
        let context = || RequestContext::group(group, topic, partition, version);

        let block = self
            .bounded(
                || format!("offset fetch ({})", context()),
                async {
                    coordinator
                        .broker()
                        .fetch_committed_offset(group, topic, partition, version)
                        .await
                        .map_err(|e| Error::Request {
                            context: context(),
                            source: e.into(),
                        })
                },
            )
            .await?;

        match block.error {
            Some(error) => Err(Error::Protocol {
                context: context(),
                error,
            }),
            None => Ok((partition, block.offset)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        ProtocolError,
        client::{
            OffsetClientBuilder,
            fake::{FakeCluster, two_partition_cluster},
        },
        cluster::NO_COMMITTED_OFFSET,
    };

    fn cluster() -> FakeCluster {
        let cluster = two_partition_cluster();
        cluster.set_coordinator("g", 2);
        cluster.set_committed(
            "g",
            "foo",
            OffsetVersion::StoredInLog,
            &[(0, 800), (1, 8000)],
        );
        cluster.set_committed(
            "g",
            "foo",
            OffsetVersion::StoredInCoordinatingService,
            &[(0, 80)],
        );
        cluster
    }

    #[tokio::test]
    async fn test_committed_offsets_are_raw() {
        let cluster = cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        let committed = client
            .get_consumer_group_offsets("g", "foo", OffsetVersion::StoredInLog, &[])
            .await
            .unwrap();
        assert_eq!(committed, OffsetMap::from([(0, 800), (1, 8000)]));
    }

    #[tokio::test]
    async fn test_version_selects_store() {
        let cluster = cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        let committed = client
            .get_consumer_group_offsets(
                "g",
                "foo",
                OffsetVersion::StoredInCoordinatingService,
                &[],
            )
            .await
            .unwrap();
        assert_eq!(
            committed,
            OffsetMap::from([(0, 80), (1, NO_COMMITTED_OFFSET)])
        );
    }

    #[tokio::test]
    async fn test_coordinator_reused_across_calls() {
        let cluster = cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        for _ in 0..3 {
            client
                .get_consumer_group_offsets("g", "foo", OffsetVersion::StoredInLog, &[0])
                .await
                .unwrap();
        }
        assert_eq!(cluster.coordinator_calls.load(Ordering::SeqCst), 3);
        assert_eq!(cluster.broker(2).opens(), 1);
    }

    #[tokio::test]
    async fn test_protocol_error() {
        let cluster = cluster();
        cluster
            .log
            .lock()
            .committed_errors
            .insert(("foo".to_owned(), 0), ProtocolError::GroupAuthorizationFailed);
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        let err = client
            .get_consumer_group_offsets("g", "foo", OffsetVersion::StoredInLog, &[])
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Protocol {
                context,
                error: ProtocolError::GroupAuthorizationFailed,
            } if context.group.as_deref() == Some("g") && context.partition == Some(0)
        );
    }

    #[tokio::test]
    async fn test_too_many_partitions() {
        let cluster = cluster();
        let client = OffsetClientBuilder::new(&cluster).build();
        client.initialize().await.unwrap();

        let err = client
            .get_consumer_group_offsets("g", "bar", OffsetVersion::StoredInLog, &[0, 1])
            .await
            .unwrap_err();
        assert_matches!(err, Error::PartitionCountMismatch { .. });

        // the partition check runs before any coordinator lookup
        assert_eq!(cluster.coordinator_calls.load(Ordering::SeqCst), 0);
    }
}
