//! The Apache Kafka protocol, restricted to the APIs needed to look up offsets.
//!
//! # References
//! - <https://kafka.apache.org/protocol>
//! - <https://kafka.apache.org/documentation>
pub mod api_key;
pub mod api_version;
pub mod error;
pub mod frame;
pub mod messages;
pub mod primitives;
pub mod traits;
