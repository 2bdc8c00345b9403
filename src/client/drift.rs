use std::collections::BTreeMap;

use crate::cluster::{Cluster, NO_COMMITTED_OFFSET, OffsetMap, OffsetVersion};

use super::{
    OffsetClient,
    error::{Error, Result},
};

/// Drift of one partition together with the offsets it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDrift {
    pub newest: i64,

    /// Raw committed offset, [`NO_COMMITTED_OFFSET`] if the group never committed.
    pub committed: i64,

    pub drift: i64,
}

impl PartitionDrift {
    pub fn is_committed(&self) -> bool {
        self.committed != NO_COMMITTED_OFFSET
    }

    pub fn is_lagging(&self) -> bool {
        self.drift != 0
    }
}

/// Per-partition drift, sorted by partition id.
pub type DriftReport = BTreeMap<i32, PartitionDrift>;

/// Per-partition drift of a consumer group.
///
/// A committed partition drifts by `newest - committed`. A partition the group never committed to (committed offset
/// [`NO_COMMITTED_OFFSET`]) drifts by `newest - oldest`, the whole log still available to it; `oldest` must hold an
/// entry for every such partition and is not consulted otherwise.
///
/// `newest` and `committed` must cover the same partitions.
pub fn compute_drift_report(
    group: &str,
    topic: &str,
    oldest: &OffsetMap,
    newest: &OffsetMap,
    committed: &OffsetMap,
) -> Result<DriftReport> {
    let mut only_newest: Vec<i32> = newest
        .keys()
        .filter(|p| !committed.contains_key(p))
        .copied()
        .collect();
    let mut only_committed: Vec<i32> = committed
        .keys()
        .filter(|p| !newest.contains_key(p))
        .copied()
        .collect();
    let mut missing_oldest: Vec<i32> = committed
        .iter()
        .filter(|(p, c)| **c == NO_COMMITTED_OFFSET && !oldest.contains_key(p))
        .map(|(p, _)| *p)
        .collect();

    if !only_newest.is_empty() || !only_committed.is_empty() || !missing_oldest.is_empty() {
        only_newest.sort_unstable();
        only_committed.sort_unstable();
        missing_oldest.sort_unstable();
        return Err(Error::DriftComputation {
            group: group.to_owned(),
            topic: topic.to_owned(),
            only_newest,
            only_committed,
            missing_oldest,
        });
    }

    Ok(newest
        .iter()
        .map(|(p, n)| {
            let committed = committed[p];
            let base = if committed == NO_COMMITTED_OFFSET {
                oldest[p]
            } else {
                committed
            };
            let drift = PartitionDrift {
                newest: *n,
                committed,
                drift: n - base,
            };
            (*p, drift)
        })
        .collect())
}

/// Per-partition drift as a plain map, see [`compute_drift_report`].
pub fn compute_drift(
    group: &str,
    topic: &str,
    oldest: &OffsetMap,
    newest: &OffsetMap,
    committed: &OffsetMap,
) -> Result<OffsetMap> {
    Ok(compute_drift_report(group, topic, oldest, newest, committed)?
        .into_iter()
        .map(|(p, d)| (p, d.drift))
        .collect())
}

/// Whether `oldest[p] <= offset < newest[p]` holds for every partition.
///
/// Returns `false` when there are no partitions or a partition is missing from `newest`.
pub fn offset_in_range(oldest: &OffsetMap, newest: &OffsetMap, offset: i64) -> bool {
    !oldest.is_empty()
        && oldest.iter().all(|(p, lo)| {
            newest
                .get(p)
                .is_some_and(|hi| *lo <= offset && offset < *hi)
        })
}

impl<C> OffsetClient<'_, C>
where
    C: Cluster,
{
    /// How far `group` lags behind the log end, per partition.
    ///
    /// Partitions the group never committed to count the whole available log as drift (`newest - oldest`), the
    /// oldest offsets are only queried for those. See [`compute_drift_report`].
    pub async fn get_drift(
        &self,
        group: &str,
        topic: &str,
        version: OffsetVersion,
        partitions: &[i32],
    ) -> Result<OffsetMap> {
        Ok(self
            .get_drift_report(group, topic, version, partitions)
            .await?
            .into_iter()
            .map(|(p, d)| (p, d.drift))
            .collect())
    }

    /// Like [`get_drift`](Self::get_drift), keeping the newest and committed offsets next to each drift.
    pub async fn get_drift_report(
        &self,
        group: &str,
        topic: &str,
        version: OffsetVersion,
        partitions: &[i32],
    ) -> Result<DriftReport> {
        let newest = self.get_newest_offsets(topic, partitions).await?;
        let committed = self
            .get_consumer_group_offsets(group, topic, version, partitions)
            .await?;

        let mut uncommitted: Vec<i32> = committed
            .iter()
            .filter(|(_, c)| **c == NO_COMMITTED_OFFSET)
            .map(|(p, _)| *p)
            .collect();
        let oldest = if uncommitted.is_empty() {
            OffsetMap::new()
        } else {
            uncommitted.sort_unstable();
            self.get_oldest_offsets(topic, &uncommitted).await?
        };

        compute_drift_report(group, topic, &oldest, &newest, &committed)
    }

    /// Whether `offset` can still be read from every requested partition of `topic`.
    pub async fn offset_in_available_range(
        &self,
        topic: &str,
        offset: i64,
        partitions: &[i32],
    ) -> Result<bool> {
        let oldest = self.get_oldest_offsets(topic, partitions).await?;
        let newest = self.get_newest_offsets(topic, partitions).await?;

        Ok(offset_in_range(&oldest, &newest, offset))
    }
}
