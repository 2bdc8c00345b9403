use std::io::Cursor;

use crate::protocol::api_version::ApiVersion;

use super::{ReadVersionedType, WriteVersionedType};

/// Builds expected wire bytes field by field.
#[derive(Debug, Default)]
pub(crate) struct Wire(Vec<u8>);

impl Wire {
    pub(crate) fn i8(mut self, v: i8) -> Self {
        self.0.extend(v.to_be_bytes());
        self
    }

    pub(crate) fn i16(mut self, v: i16) -> Self {
        self.0.extend(v.to_be_bytes());
        self
    }

    pub(crate) fn i32(mut self, v: i32) -> Self {
        self.0.extend(v.to_be_bytes());
        self
    }

    pub(crate) fn i64(mut self, v: i64) -> Self {
        self.0.extend(v.to_be_bytes());
        self
    }

    pub(crate) fn bool(mut self, v: bool) -> Self {
        self.0.push(u8::from(v));
        self
    }

    pub(crate) fn string(self, s: &str) -> Self {
        let mut this = self.i16(s.len() as i16);
        this.0.extend(s.as_bytes());
        this
    }

    pub(crate) fn null_string(self) -> Self {
        self.i16(-1)
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.0
    }
}

pub(crate) fn encode<T: WriteVersionedType<Vec<u8>>>(msg: &T, version: i16) -> Vec<u8> {
    let mut buf = vec![];
    msg.write_versioned(&mut buf, ApiVersion::new(version))
        .unwrap();
    buf
}

/// Decodes `bytes` and asserts that nothing is left over.
pub(crate) fn decode<T: ReadVersionedType<Cursor<Vec<u8>>>>(bytes: Vec<u8>, version: i16) -> T {
    let len = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes);
    let res = T::read_versioned(&mut cursor, ApiVersion::new(version)).unwrap();
    assert_eq!(cursor.position(), len, "trailing bytes after decoding");
    res
}
