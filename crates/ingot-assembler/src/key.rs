//! Compact structural keys for deduplicating derived entries.
//!
//! Signatures (and other derived records) are identical when their
//! component ids are identical, so each one is reduced to a byte string of
//! variable-width integers and used as a hash-map key. The low two bits of
//! the first byte of each component select its width, leaving 6, 14, 30 or
//! 62 bits of payload.

/// A finished key. Cheap to hash and compare, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructKey(Box<[u8]>);

impl StructKey {
    /// Build a key from a record discriminant followed by its components.
    ///
    /// `scratch` is caller-owned storage reused across calls; it is
    /// cleared on entry.
    pub fn build(
        scratch: &mut Vec<u8>,
        discriminant: u64,
        components: impl IntoIterator<Item = u64>,
    ) -> Self {
        scratch.clear();
        push_varint(scratch, discriminant);
        for component in components {
            push_varint(scratch, component);
        }
        Self(scratch.as_slice().into())
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Append one value using the self-describing variable-width encoding.
///
/// Values up to 6 bits take one byte, up to 14 bits a native-endian `u16`,
/// up to 30 bits a `u32`; anything larger takes a tag byte plus a full
/// `u64`.
fn push_varint(out: &mut Vec<u8>, value: u64) {
    if value <= 0x3F {
        out.push((value << 2) as u8);
    } else if value <= 0x3FFF {
        out.extend_from_slice(&(((value as u16) << 2) | 1).to_ne_bytes());
    } else if value <= 0x3FFF_FFFF {
        out.extend_from_slice(&(((value as u32) << 2) | 2).to_ne_bytes());
    } else {
        out.push(3);
        out.extend_from_slice(&value.to_ne_bytes());
    }
}
