use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer out of range: needed {needed} bytes, {remaining} remaining")]
    OutOfRange { needed: usize, remaining: usize },
    #[error("string of {len} bytes exceeds maximum of {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("unknown packet kind {0}")]
    UnknownPacketKind(u8),
    #[error("bad protocol magic {0:#010x}")]
    BadMagic(u32),
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
}

/// Width of the length prefix used for a string with the given maximum byte length.
pub const fn length_prefix_width(max_len: usize) -> usize {
    if max_len <= u8::MAX as usize {
        1
    } else if max_len <= u16::MAX as usize {
        2
    } else {
        4
    }
}

macro_rules! write_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) -> Result<(), CodecError> {
            let bytes = match self.order {
                ByteOrder::Little => value.to_le_bytes(),
                ByteOrder::Big => value.to_be_bytes(),
            };
            self.write_bytes(&bytes)
        }
    };
}

macro_rules! read_primitive {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, CodecError> {
            const N: usize = std::mem::size_of::<$ty>();
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(self.take(N)?);
            Ok(match self.order {
                ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                ByteOrder::Big => <$ty>::from_be_bytes(bytes),
            })
        }
    };
}

/// Append-only writer over a region of fixed capacity.
///
/// The written bytes are always exactly `as_bytes()`; nothing past the cursor is
/// observable, which is what lets [`BufferWriter::try_write`] roll back by truncation.
#[derive(Debug, Clone)]
pub struct BufferWriter {
    data: Vec<u8>,
    capacity: usize,
    order: ByteOrder,
}

impl BufferWriter {
    pub fn with_capacity(capacity: usize, order: ByteOrder) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            order,
        }
    }

    /// A writer without a capacity limit, for measuring encoded sizes.
    pub fn unbounded(order: ByteOrder) -> Self {
        Self {
            data: Vec::new(),
            capacity: usize::MAX,
            order,
        }
    }

    /// Reuses an existing allocation. Any previous contents are discarded.
    pub fn from_vec(mut data: Vec<u8>, capacity: usize, order: ByteOrder) -> Self {
        data.clear();
        data.reserve(capacity);
        Self {
            data,
            capacity,
            order,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Runs `serialize` against this writer. If it fails, the cursor and the contents
    /// are restored to what they were before the call.
    pub fn try_write<F>(&mut self, serialize: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut Self) -> Result<(), CodecError>,
    {
        let start = self.data.len();
        let result = serialize(self);
        if result.is_err() {
            self.data.truncate(start);
        }
        result
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.remaining() {
            return Err(CodecError::OutOfRange {
                needed: bytes.len(),
                remaining: self.remaining(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Overwrites a byte that was already written, e.g. a count placeholder.
    pub fn set_u8(&mut self, position: usize, value: u8) -> Result<(), CodecError> {
        match self.data.get_mut(position) {
            Some(byte) => {
                *byte = value;
                Ok(())
            }
            None => Err(CodecError::OutOfRange {
                needed: position + 1,
                remaining: self.data.len(),
            }),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_u8(value as u8)
    }

    write_primitive!(write_i16, i16);
    write_primitive!(write_u16, u16);
    write_primitive!(write_i32, i32);
    write_primitive!(write_u32, u32);
    write_primitive!(write_i64, i64);
    write_primitive!(write_u64, u64);
    write_primitive!(write_f32, f32);

    /// Writes a UTF-8 string prefixed with its byte length. The prefix is 1, 2 or 4
    /// bytes wide depending on `max_len`.
    pub fn write_string(&mut self, value: &str, max_len: usize) -> Result<(), CodecError> {
        let len = value.len();
        if len > max_len {
            return Err(CodecError::StringTooLong { len, max: max_len });
        }
        if length_prefix_width(max_len) + len > self.remaining() {
            return Err(CodecError::OutOfRange {
                needed: length_prefix_width(max_len) + len,
                remaining: self.remaining(),
            });
        }
        self.write_length(len, max_len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Length-prefixed raw bytes (u16 prefix).
    pub fn write_byte_array(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| CodecError::InvalidValue("byte array length"))?;
        if 2 + bytes.len() > self.remaining() {
            return Err(CodecError::OutOfRange {
                needed: 2 + bytes.len(),
                remaining: self.remaining(),
            });
        }
        self.write_u16(len)?;
        self.write_bytes(bytes)
    }

    fn write_length(&mut self, len: usize, max_len: usize) -> Result<(), CodecError> {
        match length_prefix_width(max_len) {
            1 => self.write_u8(len as u8),
            2 => self.write_u16(len as u16),
            _ => self.write_u32(len as u32),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferReader<'a> {
    data: &'a [u8],
    position: usize,
    order: ByteOrder,
}

impl<'a> BufferReader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            position: 0,
            order,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Everything not read yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::OutOfRange {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::InvalidValue("bool")),
        }
    }

    read_primitive!(read_i16, i16);
    read_primitive!(read_u16, u16);
    read_primitive!(read_i32, i32);
    read_primitive!(read_u32, u32);
    read_primitive!(read_i64, i64);
    read_primitive!(read_u64, u64);
    read_primitive!(read_f32, f32);

    pub fn read_string(&mut self, max_len: usize) -> Result<String, CodecError> {
        let len = match length_prefix_width(max_len) {
            1 => self.read_u8()? as usize,
            2 => self.read_u16()? as usize,
            _ => self.read_u32()? as usize,
        };
        if len > max_len {
            return Err(CodecError::StringTooLong { len, max: max_len });
        }
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_byte_array(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }
}
