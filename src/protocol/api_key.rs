//! ApiKey to tag request types.
//!
//! Only the APIs needed for offset lookups are named; everything else the broker advertises ends up as
//! [`ApiKey::Unknown`].
//!
//! # References
//! - <https://kafka.apache.org/protocol#protocol_api_keys>

use super::primitives::Int16;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum ApiKey {
    ListOffsets,
    Metadata,
    OffsetFetch,
    FindCoordinator,
    ApiVersions,
    Unknown(Int16),
}

impl From<Int16> for ApiKey {
    fn from(key: Int16) -> Self {
        match key.0 {
            2 => Self::ListOffsets,
            3 => Self::Metadata,
            9 => Self::OffsetFetch,
            10 => Self::FindCoordinator,
            18 => Self::ApiVersions,
            _ => Self::Unknown(key),
        }
    }
}

impl From<ApiKey> for Int16 {
    fn from(key: ApiKey) -> Self {
        match key {
            ApiKey::ListOffsets => Int16(2),
            ApiKey::Metadata => Int16(3),
            ApiKey::OffsetFetch => Int16(9),
            ApiKey::FindCoordinator => Int16(10),
            ApiKey::ApiVersions => Int16(18),
            ApiKey::Unknown(code) => code,
        }
    }
}
