use std::io::{Read, Write};

use crate::protocol::{
    api_key::ApiKey,
    api_version::{ApiVersion, ApiVersionRange},
    primitives::{Int16, Int32, NullableString},
    traits::{ReadType, WriteType},
};

use super::{
    ReadVersionedError, ReadVersionedType, WriteVersionedError, WriteVersionedType,
    check_version_read, check_version_write,
};

/// Header versions that predate tagged fields.
const REQUEST_HEADER_VERSIONS: ApiVersionRange =
    ApiVersionRange::new(ApiVersion::new(0), ApiVersion::new(1));
const RESPONSE_HEADER_VERSIONS: ApiVersionRange =
    ApiVersionRange::new(ApiVersion::new(0), ApiVersion::new(0));

#[derive(Debug)]
pub struct RequestHeader {
    /// The API key of this request.
    pub request_api_key: ApiKey,

    /// The API version of this request.
    pub request_api_version: ApiVersion,

    /// The correlation ID of this request.
    pub correlation_id: Int32,

    /// The client ID string.
    ///
    /// Added in version 1.
    pub client_id: NullableString,
}

impl<W> WriteVersionedType<W> for RequestHeader
where
    W: Write,
{
    fn write_versioned(
        &self,
        writer: &mut W,
        version: ApiVersion,
    ) -> Result<(), WriteVersionedError> {
        check_version_write(REQUEST_HEADER_VERSIONS, version)?;

        Int16::from(self.request_api_key).write(writer)?;
        self.request_api_version.0.write(writer)?;
        self.correlation_id.write(writer)?;

        if version.0.0 >= 1 {
            self.client_id.write(writer)?;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ResponseHeader {
    /// The correlation ID of this response.
    pub correlation_id: Int32,
}

impl<R> ReadVersionedType<R> for ResponseHeader
where
    R: Read,
{
    fn read_versioned(reader: &mut R, version: ApiVersion) -> Result<Self, ReadVersionedError> {
        check_version_read(RESPONSE_HEADER_VERSIONS, version)?;

        Ok(Self {
            correlation_id: Int32::read(reader)?,
        })
    }
}
