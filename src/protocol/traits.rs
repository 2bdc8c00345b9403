//! Read/write traits shared by primitives and messages.
use std::io::{Read, Write};

use thiserror::Error;

use super::api_version::ApiVersion;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Cannot read data")]
    IO(#[from] std::io::Error),

    #[error("Overflow converting integer")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error(transparent)]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A type with a single, version independent wire representation.
pub trait ReadType<R>: Sized
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError>;
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Cannot write data")]
    IO(#[from] std::io::Error),

    #[error("Overflow converting integer")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error(transparent)]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub trait WriteType<W>: Sized
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError>;
}

#[derive(Error, Debug)]
pub enum ReadVersionedError {
    #[error("Invalid version: {version:?}")]
    InvalidVersion { version: ApiVersion },

    #[error(transparent)]
    ReadError(#[from] ReadError),
}

/// A message part whose layout depends on the negotiated API version.
pub trait ReadVersionedType<R>: Sized
where
    R: Read,
{
    fn read_versioned(reader: &mut R, version: ApiVersion) -> Result<Self, ReadVersionedError>;
}

#[derive(Error, Debug)]
pub enum WriteVersionedError {
    #[error("Invalid version: {version:?}")]
    InvalidVersion { version: ApiVersion },

    #[error("Field {field} not available in version: {version:?}")]
    FieldNotAvailable { field: String, version: ApiVersion },

    #[error(transparent)]
    WriteError(#[from] WriteError),
}

pub trait WriteVersionedType<W>: Sized
where
    W: Write,
{
    fn write_versioned(
        &self,
        writer: &mut W,
        version: ApiVersion,
    ) -> Result<(), WriteVersionedError>;
}

impl<W: Write, T: WriteVersionedType<W>> WriteVersionedType<W> for &T {
    fn write_versioned(
        &self,
        writer: &mut W,
        version: ApiVersion,
    ) -> Result<(), WriteVersionedError> {
        T::write_versioned(self, writer, version)
    }
}
