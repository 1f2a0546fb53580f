//! Relocatable binary writer with deferred child sections.
//!
//! A [`RelocWriter`] builds one contiguous byte sequence containing
//! fixed-width data interleaved with variable-length child sections whose
//! final position is unknown until everything before them is written.
//! [`write_deferred`](RelocWriter::write_deferred) reserves an 8-byte
//! placeholder (u32 relative offset + u32 element count) and hands back an
//! independent child writer; once the child's content is complete it is
//! handed back via [`adopt`](RelocWriter::adopt).
//! [`finalize`](RelocWriter::finalize) appends every child post-order and
//! back-patches each placeholder with the distance from the placeholder to
//! the child's first byte. The output contains only relative offsets, so
//! it is independent of where it is eventually loaded.
//!
//! All integers are written in the build host's native byte order; the
//! module format records the host's endianness rather than normalizing it.

/// Placeholder width: u32 relative offset plus u32 element count.
const PLACEHOLDER_LEN: usize = 8;

/// A growable byte buffer with deferred, back-patched child sections.
#[derive(Debug, Default)]
pub struct RelocWriter {
    buf: Vec<u8>,
    /// Placeholder position inside the parent's buffer (children only).
    parent_offset: usize,
    /// Logical element count back-patched next to the relative offset.
    elements: u32,
    /// Deferred children, in creation order.
    children: Vec<RelocWriter>,
}

impl RelocWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            ..Self::default()
        }
    }

    fn child(parent_offset: usize) -> Self {
        Self {
            parent_offset,
            ..Self::new()
        }
    }

    /// Bytes written so far (children not included).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far, without finalizing children.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Reset the writer for reuse as scratch space.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.elements = 0;
        self.children.clear();
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a `u8`.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a `u16` in native byte order.
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Append a `u32` in native byte order.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Append a `u64` in native byte order.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Append a pointer-width unsigned value in native byte order.
    pub fn write_usize(&mut self, value: usize) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Append a pointer-width signed value in native byte order.
    pub fn write_isize(&mut self, value: isize) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Overwrite a previously written pointer-width value in place.
    ///
    /// # Panics
    ///
    /// Panics if the range `offset..offset + size_of::<usize>()` is not
    /// fully inside the written bytes.
    pub fn patch_usize(&mut self, offset: usize, value: usize) {
        let end = offset + std::mem::size_of::<usize>();
        self.buf[offset..end].copy_from_slice(&value.to_ne_bytes());
    }

    /// Bump the logical element count by one.
    pub fn bump(&mut self) {
        self.elements += 1;
    }

    /// Bump the logical element count by `n`.
    pub fn bump_by(&mut self, n: u32) {
        self.elements += n;
    }

    /// Reserve a placeholder and return an independent child writer.
    ///
    /// The child must be handed back with [`adopt`](Self::adopt) once its
    /// content is complete; children must be adopted in creation order.
    #[must_use]
    pub fn write_deferred(&mut self) -> RelocWriter {
        let offset = self.buf.len();
        self.write_u32(0);
        self.write_u32(0);
        RelocWriter::child(offset)
    }

    /// Attach a completed child created by [`write_deferred`](Self::write_deferred).
    pub fn adopt(&mut self, child: RelocWriter) {
        debug_assert!(child.parent_offset + PLACEHOLDER_LEN <= self.buf.len());
        debug_assert!(
            self.children
                .last()
                .is_none_or(|prev| prev.parent_offset < child.parent_offset),
            "children must be adopted in creation order",
        );
        self.children.push(child);
    }

    /// Write a byte slice as a deferred child section with one element per
    /// byte.
    pub fn write_u8_array(&mut self, bytes: &[u8]) {
        let mut child = self.write_deferred();
        child.write_bytes(bytes);
        child.bump_by(bytes.len() as u32);
        self.adopt(child);
    }

    /// Write a sequence of `u32` values as a deferred child section.
    pub fn write_u32_array(&mut self, values: impl IntoIterator<Item = u32>) {
        let mut child = self.write_deferred();
        for value in values {
            child.write_u32(value);
            child.bump();
        }
        self.adopt(child);
    }

    /// Write a sequence of pointer-width values as a deferred child section.
    pub fn write_usize_array(&mut self, values: impl IntoIterator<Item = usize>) {
        let mut child = self.write_deferred();
        for value in values {
            child.write_usize(value);
            child.bump();
        }
        self.adopt(child);
    }

    /// Finalize into one contiguous byte vector plus `padding` zero bytes.
    ///
    /// Children are finalized recursively and appended in creation order;
    /// each child's placeholder is back-patched with the u32 relative
    /// offset from the placeholder to the child's first byte and the
    /// child's u32 element count.
    pub fn finalize(mut self, padding: usize) -> Vec<u8> {
        let children = std::mem::take(&mut self.children);
        for chunk in children {
            let placeholder = chunk.parent_offset;
            let count = chunk.elements;
            let data = chunk.finalize(0);

            let start = self.buf.len();
            self.buf.extend_from_slice(&data);

            let rel = (start - placeholder) as u32;
            self.buf[placeholder..placeholder + 4].copy_from_slice(&rel.to_ne_bytes());
            self.buf[placeholder + 4..placeholder + 8].copy_from_slice(&count.to_ne_bytes());
        }
        self.buf.resize(self.buf.len() + padding, 0);
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_ne_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn new_writer_is_empty() {
        let writer = RelocWriter::new();
        assert!(writer.is_empty());
        assert_eq!(writer.len(), 0);
    }

    #[test]
    fn fixed_width_writes() {
        let mut writer = RelocWriter::new();
        writer.write_u8(0xAB);
        writer.write_u16(0x1234);
        writer.write_u32(0xDEAD_BEEF);
        assert_eq!(writer.len(), 7);

        let bytes = writer.finalize(0);
        assert_eq!(bytes[0], 0xAB);
        assert_eq!(u16::from_ne_bytes(bytes[1..3].try_into().unwrap()), 0x1234);
        assert_eq!(read_u32(&bytes, 3), 0xDEAD_BEEF);
    }

    #[test]
    fn padding_appends_zeros() {
        let mut writer = RelocWriter::new();
        writer.write_u8(1);
        let bytes = writer.finalize(3);
        assert_eq!(bytes, [1, 0, 0, 0]);
    }

    #[test]
    fn deferred_child_is_patched() {
        let mut writer = RelocWriter::new();
        writer.write_u32(0x1111_1111);
        let mut child = writer.write_deferred();
        child.write_u32(0x2222_2222);
        child.bump();
        writer.adopt(child);
        writer.write_u32(0x3333_3333);

        let bytes = writer.finalize(0);
        // prefix(4) + placeholder(8) + suffix(4) + child data(4)
        assert_eq!(bytes.len(), 20);

        let rel = read_u32(&bytes, 4);
        let count = read_u32(&bytes, 8);
        assert_eq!(count, 1);
        // Relative offset from the placeholder resolves to the child data.
        assert_eq!(read_u32(&bytes, 4 + rel as usize), 0x2222_2222);
        assert_eq!(read_u32(&bytes, 12), 0x3333_3333);
    }

    #[test]
    fn nested_children_resolve_at_every_depth() {
        let mut root = RelocWriter::new();
        root.write_u32(0xAAAA_AAAA);

        let mut mid = root.write_deferred();
        mid.write_u32(0xBBBB_BBBB);
        let mut leaf = mid.write_deferred();
        for i in 0..4u32 {
            leaf.write_u32(i);
            leaf.bump();
        }
        mid.adopt(leaf);
        mid.bump();
        root.adopt(mid);

        let bytes = root.finalize(0);

        // Root placeholder at 4 points at the mid section.
        let mid_start = 4 + read_u32(&bytes, 4) as usize;
        assert_eq!(read_u32(&bytes, 8), 1);
        assert_eq!(read_u32(&bytes, mid_start), 0xBBBB_BBBB);

        // Mid placeholder points at the leaf elements.
        let leaf_placeholder = mid_start + 4;
        let leaf_start = leaf_placeholder + read_u32(&bytes, leaf_placeholder) as usize;
        assert_eq!(read_u32(&bytes, leaf_placeholder + 4), 4);
        for i in 0..4u32 {
            assert_eq!(read_u32(&bytes, leaf_start + 4 * i as usize), i);
        }
    }

    #[test]
    fn sibling_children_appended_in_creation_order() {
        let mut writer = RelocWriter::new();
        let mut first = writer.write_deferred();
        let mut second = writer.write_deferred();
        first.write_u8(0x11);
        first.bump();
        second.write_u8(0x22);
        second.bump();
        writer.adopt(first);
        writer.adopt(second);

        let bytes = writer.finalize(0);
        assert_eq!(bytes.len(), 18);
        assert_eq!(bytes[16], 0x11);
        assert_eq!(bytes[17], 0x22);

        let first_rel = read_u32(&bytes, 0) as usize;
        let second_rel = read_u32(&bytes, 8) as usize;
        assert_eq!(first_rel, 16);
        assert_eq!(8 + second_rel, 17);
    }

    #[test]
    fn u8_array_records_length() {
        let mut writer = RelocWriter::new();
        writer.write_u8_array(b"hello");

        let bytes = writer.finalize(0);
        let rel = read_u32(&bytes, 0) as usize;
        assert_eq!(read_u32(&bytes, 4), 5);
        assert_eq!(&bytes[rel..rel + 5], b"hello");
    }

    #[test]
    fn patch_usize_overwrites_in_place() {
        let mut writer = RelocWriter::new();
        writer.write_usize(0);
        writer.write_u8(0xFF);
        writer.patch_usize(0, 0x42);

        let bytes = writer.finalize(0);
        assert_eq!(
            usize::from_ne_bytes(bytes[..std::mem::size_of::<usize>()].try_into().unwrap()),
            0x42
        );
        assert_eq!(*bytes.last().unwrap(), 0xFF);
    }

    #[test]
    fn clear_resets_scratch_state() {
        let mut writer = RelocWriter::new();
        writer.write_u32(7);
        writer.bump();
        writer.clear();
        assert!(writer.is_empty());
        assert_eq!(writer.finalize(0), Vec::<u8>::new());
    }
}
