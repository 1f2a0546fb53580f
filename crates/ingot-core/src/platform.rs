//! Host platform facts embedded in emitted modules.
//!
//! The binary format does not normalize byte order or pointer width;
//! instead it records the build host's endianness and architecture in the
//! version word so a loader can reject (or translate) incompatible blobs.

/// Byte order of the build host, as recorded in the version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Endianness {
    Unknown = 0,
    Little = 1,
    Big = 2,
    /// PDP-style little-endian words in big-endian order.
    LittleWord = 3,
    /// PDP-style big-endian words in little-endian order.
    BigWord = 4,
}

/// Pointer width of the build host, as recorded in the version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Arch {
    Unknown = 0,
    X32 = 1,
    X64 = 2,
}

/// Format version, bumped when the binary layout changes.
pub const VERSION_MAJOR: u16 = 0;
/// Format minor version.
pub const VERSION_MINOR: u16 = 1;
/// Build changelist; only the low 3 bytes are recorded.
pub const VERSION_CHANGELIST: u32 = 0;

/// Probe the build host's byte order.
pub fn endianness() -> Endianness {
    match u32::from_ne_bytes([0x01, 0x02, 0x03, 0x04]) {
        0x0403_0201 => Endianness::Little,
        0x0102_0304 => Endianness::Big,
        0x0201_0403 => Endianness::LittleWord,
        0x0304_0102 => Endianness::BigWord,
        _ => Endianness::Unknown,
    }
}

/// Probe the build host's pointer width.
pub fn arch() -> Arch {
    match std::mem::size_of::<usize>() {
        4 => Arch::X32,
        8 => Arch::X64,
        _ => Arch::Unknown,
    }
}

/// The 8-byte version word written after the module magic.
///
/// Byte layout: `major(2) | minor(2) | changelist(3) | endian<<4 | arch(1)`,
/// each multi-byte field in ascending byte order, read back as a
/// native-endian `u64`.
pub fn version_word() -> u64 {
    let mut bytes = [0u8; 8];
    bytes[0..2].copy_from_slice(&VERSION_MAJOR.to_le_bytes());
    bytes[2..4].copy_from_slice(&VERSION_MINOR.to_le_bytes());
    bytes[4..7].copy_from_slice(&VERSION_CHANGELIST.to_le_bytes()[0..3]);
    bytes[7] = ((endianness() as u8) << 4) | arch() as u8;
    u64::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_known() {
        assert_ne!(endianness(), Endianness::Unknown);
        assert_ne!(arch(), Arch::Unknown);
    }

    #[test]
    fn version_word_layout() {
        let bytes = version_word().to_ne_bytes();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), VERSION_MAJOR);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), VERSION_MINOR);
        assert_eq!(
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], 0]),
            VERSION_CHANGELIST & 0x00FF_FFFF
        );
        assert_eq!(bytes[7] >> 4, endianness() as u8);
        assert_eq!(bytes[7] & 0x0F, arch() as u8);
    }
}
