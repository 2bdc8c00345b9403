//! Error codes carried in response blocks.
//!
//! # References
//! - <https://kafka.apache.org/protocol#protocol_error_codes>

use std::fmt;

use super::primitives::Int16;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[non_exhaustive]
pub enum Error {
    UnknownServerError,
    OffsetOutOfRange,
    CorruptMessage,
    UnknownTopicOrPartition,
    LeaderNotAvailable,
    NotLeaderOrFollower,
    RequestTimedOut,
    BrokerNotAvailable,
    ReplicaNotAvailable,
    NetworkException,
    CoordinatorLoadInProgress,
    CoordinatorNotAvailable,
    NotCoordinator,
    InvalidTopicException,
    TopicAuthorizationFailed,
    GroupAuthorizationFailed,
    ClusterAuthorizationFailed,
    UnsupportedVersion,
    InvalidRequest,
    GroupIdNotFound,
    UnstableOffsetCommit,
    Unknown(i16),
}

impl Error {
    /// Maps a wire error code, `0` meaning "no error".
    pub fn new(code: Int16) -> Option<Self> {
        let err = match code.0 {
            0 => return None,
            -1 => Self::UnknownServerError,
            1 => Self::OffsetOutOfRange,
            2 => Self::CorruptMessage,
            3 => Self::UnknownTopicOrPartition,
            5 => Self::LeaderNotAvailable,
            6 => Self::NotLeaderOrFollower,
            7 => Self::RequestTimedOut,
            8 => Self::BrokerNotAvailable,
            9 => Self::ReplicaNotAvailable,
            13 => Self::NetworkException,
            14 => Self::CoordinatorLoadInProgress,
            15 => Self::CoordinatorNotAvailable,
            16 => Self::NotCoordinator,
            17 => Self::InvalidTopicException,
            29 => Self::TopicAuthorizationFailed,
            30 => Self::GroupAuthorizationFailed,
            31 => Self::ClusterAuthorizationFailed,
            35 => Self::UnsupportedVersion,
            42 => Self::InvalidRequest,
            69 => Self::GroupIdNotFound,
            88 => Self::UnstableOffsetCommit,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    pub fn code(&self) -> i16 {
        match self {
            Self::UnknownServerError => -1,
            Self::OffsetOutOfRange => 1,
            Self::CorruptMessage => 2,
            Self::UnknownTopicOrPartition => 3,
            Self::LeaderNotAvailable => 5,
            Self::NotLeaderOrFollower => 6,
            Self::RequestTimedOut => 7,
            Self::BrokerNotAvailable => 8,
            Self::ReplicaNotAvailable => 9,
            Self::NetworkException => 13,
            Self::CoordinatorLoadInProgress => 14,
            Self::CoordinatorNotAvailable => 15,
            Self::NotCoordinator => 16,
            Self::InvalidTopicException => 17,
            Self::TopicAuthorizationFailed => 29,
            Self::GroupAuthorizationFailed => 30,
            Self::ClusterAuthorizationFailed => 31,
            Self::UnsupportedVersion => 35,
            Self::InvalidRequest => 42,
            Self::GroupIdNotFound => 69,
            Self::UnstableOffsetCommit => 88,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (code {})", self, self.code())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_error() {
        assert_eq!(Error::new(Int16(0)), None);
    }

    #[test]
    fn test_code_roundtrip() {
        for code in [-1, 1, 3, 6, 15, 16, 35, 88, 1234] {
            let err = Error::new(Int16(code)).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(Error::new(Int16(1234)), Some(Error::Unknown(1234)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::NotCoordinator.to_string(),
            "NotCoordinator (code 16)"
        );
    }
}
