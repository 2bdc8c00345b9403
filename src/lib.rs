//! Offset lookups for Kafka topics and consumer groups.
//!
//! - [`cluster`]: the contract the engine talks to, plus the shared data model.
//! - [`client`]: the offset engine ([`OffsetClient`](client::OffsetClient)).
//! - [`connection`]: [`Cluster`](cluster::Cluster) implementation over the Kafka wire protocol.
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod build_info;
pub mod client;
pub mod cluster;
pub mod connection;
mod messenger;
mod protocol;

pub use build_info::DEFAULT_CLIENT_ID;

pub type ProtocolError = protocol::error::Error;
