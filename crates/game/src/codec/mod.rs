mod buffer;
mod compound;

pub use buffer::{BufferReader, BufferWriter, ByteOrder, CodecError, length_prefix_width};
