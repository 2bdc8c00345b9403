//! Individual API messages.
//!
//! Every request caps its version range below the first "flexible" version of the API, so all messages here use
//! request header v1 and response header v0.
//!
//! # References
//! - <https://kafka.apache.org/protocol#protocol_messages>

use std::io::{Read, Write};

use super::{
    api_key::ApiKey,
    api_version::{ApiVersion, ApiVersionRange},
    primitives::Int32,
    traits::{ReadError, ReadType, WriteError, WriteType},
};

pub use super::traits::{
    ReadVersionedError, ReadVersionedType, WriteVersionedError, WriteVersionedType,
};

mod api_versions;
pub use api_versions::*;
mod find_coordinator;
pub use find_coordinator::*;
mod header;
pub use header::*;
mod list_offsets;
pub use list_offsets::*;
mod metadata;
pub use metadata::*;
mod offset_fetch;
pub use offset_fetch::*;
#[cfg(test)]
mod test_utils;

/// Specifies a request body.
pub trait RequestBody {
    /// The response type that will follow when issuing this request.
    type ResponseBody;

    /// Kafka API key.
    ///
    /// This will be added to the request header.
    const API_KEY: ApiKey;

    /// Supported version range.
    ///
    /// From this range and the range that the broker reports, we will pick the highest version that both support.
    const API_VERSION_RANGE: ApiVersionRange;
}

impl<T: RequestBody> RequestBody for &T {
    type ResponseBody = T::ResponseBody;
    const API_KEY: ApiKey = T::API_KEY;
    const API_VERSION_RANGE: ApiVersionRange = T::API_VERSION_RANGE;
}

/// Rejects versions outside of the range a message type implements.
fn check_version_read(
    range: ApiVersionRange,
    version: ApiVersion,
) -> Result<(), ReadVersionedError> {
    if range.contains(version) {
        Ok(())
    } else {
        Err(ReadVersionedError::InvalidVersion { version })
    }
}

fn check_version_write(
    range: ApiVersionRange,
    version: ApiVersion,
) -> Result<(), WriteVersionedError> {
    if range.contains(version) {
        Ok(())
    } else {
        Err(WriteVersionedError::InvalidVersion { version })
    }
}

fn read_versioned_array<R: Read, T: ReadVersionedType<R>>(
    reader: &mut R,
    version: ApiVersion,
) -> Result<Option<Vec<T>>, ReadVersionedError> {
    match Int32::read(reader)?.0 {
        -1 => Ok(None),
        l if l < -1 => Err(ReadVersionedError::ReadError(ReadError::Malformed(
            format!("Invalid negative length for array: {l}").into(),
        ))),
        l => {
            let mut res = Vec::with_capacity((l as usize).min(1024));
            for _ in 0..l {
                res.push(T::read_versioned(reader, version)?);
            }
            Ok(Some(res))
        }
    }
}

fn write_versioned_array<W: Write, T: WriteVersionedType<W>>(
    writer: &mut W,
    version: ApiVersion,
    data: Option<&[T]>,
) -> Result<(), WriteVersionedError> {
    match data {
        None => Ok(Int32(-1).write(writer)?),
        Some(inner) => {
            let len = i32::try_from(inner.len()).map_err(WriteError::from)?;
            Int32(len).write(writer)?;

            for element in inner {
                element.write_versioned(writer, version)?
            }

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Copy, Clone, PartialEq)]
    struct VersionTest {
        version: ApiVersion,
    }

    impl<W: Write> WriteVersionedType<W> for VersionTest {
        fn write_versioned(
            &self,
            _writer: &mut W,
            version: ApiVersion,
        ) -> Result<(), WriteVersionedError> {
            assert_eq!(version, self.version);
            Ok(())
        }
    }

    impl<R: Read> ReadVersionedType<R> for VersionTest {
        fn read_versioned(
            _reader: &mut R,
            version: ApiVersion,
        ) -> Result<Self, ReadVersionedError> {
            Ok(Self { version })
        }
    }

    #[test]
    fn test_versioned_array_passes_version_through() {
        for len in [0, 6] {
            for i in 0..3 {
                let version = ApiVersion::new(i);
                let input = vec![VersionTest { version }; len];

                let mut buffer = vec![];
                write_versioned_array(&mut buffer, version, Some(&input)).unwrap();

                let mut cursor = std::io::Cursor::new(buffer);
                let output = read_versioned_array(&mut cursor, version).unwrap().unwrap();

                assert_eq!(input, output);
            }
        }
    }

    #[test]
    fn test_versioned_array_null() {
        let version = ApiVersion::new(0);
        let mut buffer = vec![];
        write_versioned_array::<_, VersionTest>(&mut buffer, version, None).unwrap();
        assert_eq!(buffer, vec![0xff; 4]);

        let mut cursor = std::io::Cursor::new(buffer);
        assert!(
            read_versioned_array::<_, VersionTest>(&mut cursor, version)
                .unwrap()
                .is_none()
        );
    }
}
