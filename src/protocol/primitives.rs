//! Primitive types.
//!
//! Only the fixed-width ("non-flexible") encodings are implemented. Every message version we speak predates
//! tagged fields, so compact strings and varints are never on the wire.
//!
//! # References
//! - <https://kafka.apache.org/protocol#protocol_types>

use std::io::{Read, Write};

use super::traits::{ReadError, ReadType, WriteError, WriteType};

/// Represents a boolean
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Boolean(pub bool);

impl<R> ReadType<R> for Boolean
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok(Self(buf[0] != 0))
    }
}

impl<W> WriteType<W> for Boolean
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&[u8::from(self.0)])?;
        Ok(())
    }
}

macro_rules! fixed_width_int {
    ($name:ident, $t:ty, $bytes:expr, $doc:expr) => {
        #[doc = $doc]
        ///
        /// The values are encoded in network byte order (big-endian).
        #[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
        pub struct $name(pub $t);

        impl<R> ReadType<R> for $name
        where
            R: Read,
        {
            fn read(reader: &mut R) -> Result<Self, ReadError> {
                let mut buf = [0u8; $bytes];
                reader.read_exact(&mut buf)?;
                Ok(Self(<$t>::from_be_bytes(buf)))
            }
        }

        impl<W> WriteType<W> for $name
        where
            W: Write,
        {
            fn write(&self, writer: &mut W) -> Result<(), WriteError> {
                writer.write_all(&self.0.to_be_bytes())?;
                Ok(())
            }
        }
    };
}

fixed_width_int!(Int8, i8, 1, "Represents an integer between `-2^7` and `2^7-1` inclusive.");
fixed_width_int!(Int16, i16, 2, "Represents an integer between `-2^15` and `2^15-1` inclusive.");
fixed_width_int!(Int32, i32, 4, "Represents an integer between `-2^31` and `2^31-1` inclusive.");
fixed_width_int!(Int64, i64, 8, "Represents an integer between `-2^63` and `2^63-1` inclusive.");

fn read_utf8<R: Read>(reader: &mut R, len: usize) -> Result<String, ReadError> {
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| ReadError::Malformed(Box::new(e)))
}

/// Represents a sequence of characters or null.
///
/// For non-null strings, first the length N is given as an INT16. Then N bytes follow which are the UTF-8 encoding of
/// the character sequence. A null value is encoded with length of -1 and there are no following bytes.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct NullableString(pub Option<String>);

impl<R> ReadType<R> for NullableString
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        match Int16::read(reader)?.0 {
            -1 => Ok(Self(None)),
            l if l < -1 => Err(ReadError::Malformed(
                format!("Invalid negative length for nullable string: {l}").into(),
            )),
            l => Ok(Self(Some(read_utf8(reader, l as usize)?))),
        }
    }
}

impl<W> WriteType<W> for NullableString
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match &self.0 {
            Some(s) => String_::write_str(s, writer),
            None => Int16(-1).write(writer),
        }
    }
}

/// Represents a sequence of characters.
///
/// First the length N is given as an INT16. Then N bytes follow which are the UTF-8 encoding of the character
/// sequence. Length must not be negative.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct String_(pub String);

impl String_ {
    fn write_str<W: Write>(s: &str, writer: &mut W) -> Result<(), WriteError> {
        let len = i16::try_from(s.len())?;
        Int16(len).write(writer)?;
        writer.write_all(s.as_bytes())?;
        Ok(())
    }
}

impl<R> ReadType<R> for String_
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let len = Int16::read(reader)?;
        let len = usize::try_from(len.0).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        Ok(Self(read_utf8(reader, len)?))
    }
}

impl<W> WriteType<W> for String_
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        Self::write_str(&self.0, writer)
    }
}

/// Represents a sequence of objects of a given type T.
///
/// Type T can be either a primitive type (e.g. STRING) or a structure. First, the length N is given as an INT32. Then
/// N instances of type T follow. A null array is represented with a length of -1.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Array<T>(pub Option<Vec<T>>);

impl<T> Default for Array<T> {
    fn default() -> Self {
        Self(Some(vec![]))
    }
}

impl<R, T> ReadType<R> for Array<T>
where
    R: Read,
    T: ReadType<R>,
{
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        match Int32::read(reader)?.0 {
            -1 => Ok(Self(None)),
            l if l < -1 => Err(ReadError::Malformed(
                format!("Invalid negative length for array: {l}").into(),
            )),
            l => {
                let mut res = Vec::with_capacity((l as usize).min(1024));
                for _ in 0..l {
                    res.push(T::read(reader)?);
                }
                Ok(Self(Some(res)))
            }
        }
    }
}

impl<W, T> WriteType<W> for Array<T>
where
    W: Write,
    T: WriteType<W>,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match &self.0 {
            None => Int32(-1).write(writer),
            Some(inner) => {
                Int32(i32::try_from(inner.len())?).write(writer)?;
                for element in inner {
                    element.write(writer)?;
                }
                Ok(())
            }
        }
    }
}
