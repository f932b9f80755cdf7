//! The capability set the buffer requires of its item type. Items are opaque
//! to the buffer; everything it does with them flows through this trait plus
//! move semantics. A serialization is expected to be self-terminating or
//! length-delimited, so that a blob file's length equals the item's
//! serialization length.

use std::io::{Read, Write};

/// Serialization capabilities of a buffered item.
pub trait Codec: Sized {
    /// Writes the item's byte representation to `writer`. The reverse of
    /// [`parse`](Codec::parse).
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;

    /// Reconstructs an item from the bytes produced by
    /// [`serialize`](Codec::serialize).
    fn parse<R: Read>(reader: &mut R) -> std::io::Result<Self>;

    /// The exact byte count of the serialization.
    fn byte_size(&self) -> u64;

    /// Whether the item holds a valid payload. The buffer checks this on
    /// items parsed back from disk; a blob that parses into an uninitialized
    /// item is treated the same as an unreadable one.
    fn is_initialized(&self) -> bool;
}
