use tracing::debug;

use crate::cluster::{Broker, Cluster, OffsetAt, OffsetMap};

use super::{
    OffsetClient,
    error::{Error, RequestContext, Result},
};

impl<C> OffsetClient<'_, C>
where
    C: Cluster,
{
    /// Oldest available offset per partition.
    ///
    /// An empty `partitions` slice means every partition of the topic.
    pub async fn get_oldest_offsets(&self, topic: &str, partitions: &[i32]) -> Result<OffsetMap> {
        self.get_available_offsets(topic, partitions, OffsetAt::Earliest)
            .await
    }

    /// Log-end offset per partition, i.e. the offset the next message will get.
    ///
    /// An empty `partitions` slice means every partition of the topic.
    pub async fn get_newest_offsets(&self, topic: &str, partitions: &[i32]) -> Result<OffsetMap> {
        self.get_available_offsets(topic, partitions, OffsetAt::Latest)
            .await
    }

    async fn get_available_offsets(
        &self,
        topic: &str,
        partitions: &[i32],
        at: OffsetAt,
    ) -> Result<OffsetMap> {
        let partitions = self.requested_partitions(topic, partitions)?;
        debug!(topic, ?at, partitions = partitions.len(), "Fetching offsets");

        self.collect_offsets(partitions, |partition| {
            self.fetch_available_offset(topic, partition, at)
        })
        .await
    }

    async fn fetch_available_offset(
        &self,
        topic: &str,
        partition: i32,
        at: OffsetAt,
    ) -> Result<(i32, i64)> {
        let leader = self.resolve_leader(topic, partition).await?;
        let context = || RequestContext::partition(topic, partition);

        let block = self
            .bounded(
                || format!("list offsets ({})", context()),
                async {
                    leader
                        .broker()
                        .fetch_offsets(topic, partition, at, 1)
                        .await
                        .map_err(|e| Error::Request {
                            context: context(),
                            source: e.into(),
                        })
                },
            )
            .await?;

        if let Some(error) = block.error {
            return Err(Error::Protocol {
                context: context(),
                error,
            });
        }

        let offset = block
            .offsets
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidResponse {
                context: context(),
                message: "response block carries no offsets".to_owned(),
            })?;

        Ok((partition, offset))
    }
}
