//! `FindCoordinator` request and response.
//!
//! # References
//! - <https://kafka.apache.org/protocol#The_Messages_FindCoordinator>
use std::io::{Read, Write};

use crate::protocol::{
    api_key::ApiKey,
    api_version::{ApiVersion, ApiVersionRange},
    error::Error as ApiError,
    primitives::{Int8, Int16, Int32, NullableString, String_},
    traits::{ReadType, WriteType},
};

use super::{
    ReadVersionedError, ReadVersionedType, RequestBody, WriteVersionedError, WriteVersionedType,
    check_version_read, check_version_write,
};

/// Coordinator key type for consumer groups.
pub const COORDINATOR_KEY_TYPE_GROUP: Int8 = Int8(0);

#[derive(Debug)]
pub struct FindCoordinatorRequest {
    /// The coordinator key, i.e. the group id for consumer groups.
    pub key: String_,

    /// The coordinator key type.
    ///
    /// Added in version 1.
    pub key_type: Int8,
}

impl<W> WriteVersionedType<W> for FindCoordinatorRequest
where
    W: Write,
{
    fn write_versioned(
        &self,
        writer: &mut W,
        version: ApiVersion,
    ) -> Result<(), WriteVersionedError> {
        check_version_write(Self::API_VERSION_RANGE, version)?;

        if version.0.0 < 1 && self.key_type != COORDINATOR_KEY_TYPE_GROUP {
            return Err(WriteVersionedError::FieldNotAvailable {
                version,
                field: "key_type".to_string(),
            });
        }

        self.key.write(writer)?;
        if version.0.0 >= 1 {
            self.key_type.write(writer)?;
        }

        Ok(())
    }
}

impl RequestBody for FindCoordinatorRequest {
    type ResponseBody = FindCoordinatorResponse;

    const API_KEY: ApiKey = ApiKey::FindCoordinator;

    /// Version 3 is the first flexible version.
    const API_VERSION_RANGE: ApiVersionRange =
        ApiVersionRange::new(ApiVersion::new(0), ApiVersion::new(2));
}

#[derive(Debug)]
pub struct FindCoordinatorResponse {
    /// Added in version 1.
    pub throttle_time_ms: Option<Int32>,

    /// The error code, or 0 if there was no error.
    pub error_code: Option<ApiError>,

    /// The error message.
    ///
    /// Added in version 1.
    pub error_message: Option<NullableString>,

    /// The node id.
    pub node_id: Int32,

    /// The host name.
    pub host: String_,

    /// The port.
    pub port: Int32,
}

impl<R> ReadVersionedType<R> for FindCoordinatorResponse
where
    R: Read,
{
    fn read_versioned(reader: &mut R, version: ApiVersion) -> Result<Self, ReadVersionedError> {
        check_version_read(FindCoordinatorRequest::API_VERSION_RANGE, version)?;
        let v = version.0.0;

        Ok(Self {
            throttle_time_ms: (v >= 1).then(|| Int32::read(reader)).transpose()?,
            error_code: ApiError::new(Int16::read(reader)?),
            error_message: (v >= 1).then(|| NullableString::read(reader)).transpose()?,
            node_id: Int32::read(reader)?,
            host: String_::read(reader)?,
            port: Int32::read(reader)?,
        })
    }
}
