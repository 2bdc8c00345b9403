//! `OffsetFetch` request and response.
//!
//! Version 0 reads offsets that consumers stored in ZooKeeper, version 1 and later read offsets stored in the
//! `__consumer_offsets` log.
//!
//! # References
//! - <https://kafka.apache.org/protocol#The_Messages_OffsetFetch>
use std::io::{Read, Write};

use crate::protocol::{
    api_key::ApiKey,
    api_version::{ApiVersion, ApiVersionRange},
    error::Error as ApiError,
    primitives::{Array, Int16, Int32, Int64, NullableString, String_},
    traits::{ReadType, WriteType},
};

use super::{
    ReadVersionedError, ReadVersionedType, RequestBody, WriteVersionedError, WriteVersionedType,
    check_version_read, check_version_write, read_versioned_array, write_versioned_array,
};

#[derive(Debug)]
pub struct OffsetFetchRequestTopic {
    /// The topic name.
    pub name: String_,

    /// The partition indexes we would like to fetch offsets for.
    pub partition_indexes: Array<Int32>,
}

impl<W> WriteVersionedType<W> for OffsetFetchRequestTopic
where
    W: Write,
{
    fn write_versioned(
        &self,
        writer: &mut W,
        _version: ApiVersion,
    ) -> Result<(), WriteVersionedError> {
        self.name.write(writer)?;
        self.partition_indexes.write(writer)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct OffsetFetchRequest {
    /// The group to fetch offsets for.
    pub group_id: String_,

    /// Each topic we would like to fetch offsets for.
    ///
    /// `None` fetches all topics, which is only allowed from version 2 on.
    pub topics: Option<Vec<OffsetFetchRequestTopic>>,
}

impl<W> WriteVersionedType<W> for OffsetFetchRequest
where
    W: Write,
{
    fn write_versioned(
        &self,
        writer: &mut W,
        version: ApiVersion,
    ) -> Result<(), WriteVersionedError> {
        check_version_write(Self::API_VERSION_RANGE, version)?;

        if version.0.0 < 2 && self.topics.is_none() {
            return Err(WriteVersionedError::FieldNotAvailable {
                version,
                field: "null topics".to_string(),
            });
        }

        self.group_id.write(writer)?;
        write_versioned_array(writer, version, self.topics.as_deref())?;

        Ok(())
    }
}

impl RequestBody for OffsetFetchRequest {
    type ResponseBody = OffsetFetchResponse;

    const API_KEY: ApiKey = ApiKey::OffsetFetch;

    /// Version 6 is the first flexible version.
    const API_VERSION_RANGE: ApiVersionRange =
        ApiVersionRange::new(ApiVersion::new(0), ApiVersion::new(5));
}

#[derive(Debug)]
pub struct OffsetFetchResponsePartition {
    /// The partition index.
    pub partition_index: Int32,

    /// The committed message offset, `-1` if the group has none.
    pub committed_offset: Int64,

    /// The leader epoch.
    ///
    /// Added in version 5.
    pub committed_leader_epoch: Option<Int32>,

    /// The partition metadata.
    pub metadata: NullableString,

    /// The partition-level error if any.
    pub error_code: Option<ApiError>,
}

impl<R> ReadVersionedType<R> for OffsetFetchResponsePartition
where
    R: Read,
{
    fn read_versioned(reader: &mut R, version: ApiVersion) -> Result<Self, ReadVersionedError> {
        Ok(Self {
            partition_index: Int32::read(reader)?,
            committed_offset: Int64::read(reader)?,
            committed_leader_epoch: (version.0.0 >= 5)
                .then(|| Int32::read(reader))
                .transpose()?,
            metadata: NullableString::read(reader)?,
            error_code: ApiError::new(Int16::read(reader)?),
        })
    }
}

#[derive(Debug)]
pub struct OffsetFetchResponseTopic {
    /// The topic name.
    pub name: String_,

    /// The responses per partition.
    pub partitions: Vec<OffsetFetchResponsePartition>,
}

impl<R> ReadVersionedType<R> for OffsetFetchResponseTopic
where
    R: Read,
{
    fn read_versioned(reader: &mut R, version: ApiVersion) -> Result<Self, ReadVersionedError> {
        Ok(Self {
            name: String_::read(reader)?,
            partitions: read_versioned_array(reader, version)?.unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct OffsetFetchResponse {
    /// Added in version 3.
    pub throttle_time_ms: Option<Int32>,

    /// The responses per topic.
    pub topics: Vec<OffsetFetchResponseTopic>,

    /// The top-level error code.
    ///
    /// Added in version 2.
    pub error_code: Option<ApiError>,
}

impl OffsetFetchResponse {
    pub fn block(&self, topic: &str, partition: i32) -> Option<&OffsetFetchResponsePartition> {
        self.topics
            .iter()
            .filter(|t| t.name.0 == topic)
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition_index.0 == partition)
    }
}

impl<R> ReadVersionedType<R> for OffsetFetchResponse
where
    R: Read,
{
    fn read_versioned(reader: &mut R, version: ApiVersion) -> Result<Self, ReadVersionedError> {
        check_version_read(OffsetFetchRequest::API_VERSION_RANGE, version)?;
        let v = version.0.0;

        let throttle_time_ms = (v >= 3).then(|| Int32::read(reader)).transpose()?;
        let topics = read_versioned_array(reader, version)?.unwrap_or_default();
        let error_code = if v >= 2 {
            ApiError::new(Int16::read(reader)?)
        } else {
            None
        };

        Ok(Self {
            throttle_time_ms,
            topics,
            error_code,
        })
    }
}
