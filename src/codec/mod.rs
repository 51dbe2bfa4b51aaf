//! Compact binary records for everything that crosses the process boundary.
//!
//! Integers are little-endian, strings and byte runs carry a `u32` length
//! prefix, and sequences are a `u32` element count followed by the elements.
//! Decoding is total: malformed input yields [`DecodeError`].

mod reader;
mod writer;

pub use reader::WireReader;
pub use writer::WireWriter;

/// Malformed bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown {kind} tag {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },

    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// A value with a wire representation.
pub trait Encode {
    fn encode(&self, writer: &mut WireWriter);
}

/// A value that can be read back from its wire representation.
pub trait Decode: Sized {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError>;
}

/// Encodes a single value into a fresh buffer.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut writer = WireWriter::new();
    value.encode(&mut writer);
    writer.into_bytes()
}

/// Decodes exactly one value; leftover bytes are an error.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let value = T::decode(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

macro_rules! primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut WireWriter) {
                writer.$write(*self);
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
                reader.$read()
            }
        }
    };
}

primitive!(u8, write_u8, read_u8);
primitive!(u16, write_u16, read_u16);
primitive!(u32, write_u32, read_u32);
primitive!(u64, write_u64, read_u64);
primitive!(i32, write_i32, read_i32);
primitive!(f32, write_f32, read_f32);
primitive!(bool, write_bool, read_bool);

impl Encode for () {
    fn encode(&self, _writer: &mut WireWriter) {}
}

impl Decode for () {
    fn decode(_reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl Encode for str {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_str(self);
    }
}

impl Encode for String {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_str(self);
    }
}

impl Decode for String {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        reader.read_string()
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_len(self.len());
        for item in self {
            item.encode(writer);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut WireWriter) {
        self.as_slice().encode(writer);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        // Never trust the count for the allocation size.
        let mut items = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut WireWriter) {
        match self {
            Some(value) => {
                writer.write_u8(1);
                value.encode(writer);
            }
            None => writer.write_u8(0),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(reader)?)),
            tag => Err(DecodeError::UnknownTag {
                kind: "option",
                tag,
            }),
        }
    }
}
