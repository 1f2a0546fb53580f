//! Dense integer identifiers for module entities.
//!
//! Every cross-reference inside a module is a plain index into an
//! append-only table: types, methods, signatures, interned names,
//! field-offset paths, labels, globals, and metadata entries. Nothing is
//! ever removed from a table, so an id stays valid for the lifetime of the
//! builder that issued it. The all-ones value is reserved as the invalid
//! sentinel for every id kind.

use std::fmt;

/// The reserved "no such entry" index shared by all id kinds.
pub const INVALID_INDEX: u32 = u32::MAX;

/// Conversion between an id newtype and its raw table index.
///
/// Implemented by every id kind so generic containers (the symbol table in
/// particular) can allocate dense keys without knowing the concrete type.
pub trait RawId: Copy + Eq {
    /// Wrap a raw table index.
    fn from_raw(raw: u32) -> Self;
    /// Get the raw table index.
    fn raw(self) -> u32;
}

impl RawId for u32 {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        raw
    }

    #[inline]
    fn raw(self) -> u32 {
        self
    }
}

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// The invalid sentinel for this id kind.
            pub const INVALID: $name = $name(INVALID_INDEX);

            /// Create an id with the given table index.
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get the underlying table index.
            #[inline]
            pub const fn index(self) -> u32 {
                self.0
            }

            /// Check whether this id is the invalid sentinel.
            #[inline]
            pub const fn is_invalid(self) -> bool {
                self.0 == INVALID_INDEX
            }
        }

        impl RawId for $name {
            #[inline]
            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_invalid() {
                    write!(f, concat!($prefix, "_invalid"))
                } else {
                    write!(f, concat!($prefix, "_{}"), self.0)
                }
            }
        }
    };
}

define_id!(
    /// Identifies a type in the module's type table.
    ///
    /// Indices `0..12` are pre-seeded with the built-in primitives (see
    /// [`crate::lang::BASE_TYPES`]); user and generated types follow.
    TypeId,
    "type"
);

define_id!(
    /// Identifies a method in the module's method table.
    MethodId,
    "method"
);

define_id!(
    /// Identifies a deduplicated signature in the signature table.
    SignatureId,
    "sig"
);

define_id!(
    /// Identifies an interned name in the symbol table.
    NameId,
    "name"
);

define_id!(
    /// Identifies a label declared inside one method body.
    LabelId,
    "label"
);

define_id!(
    /// Identifies a deduplicated field-offset path in the offset table.
    OffsetId,
    "offset"
);

define_id!(
    /// Identifies an entry in the global (or constant) data table.
    GlobalId,
    "global"
);

define_id!(
    /// Identifies a metadata entry (source file) in the metadata table.
    MetaId,
    "meta"
);

impl TypeId {
    /// Signed 8-bit integer (`byte`).
    pub const I8: TypeId = TypeId(0);
    /// Unsigned 8-bit integer (`ubyte`).
    pub const U8: TypeId = TypeId(1);
    /// Signed 16-bit integer (`short`).
    pub const I16: TypeId = TypeId(2);
    /// Unsigned 16-bit integer (`ushort`).
    pub const U16: TypeId = TypeId(3);
    /// Signed 32-bit integer (`int`).
    pub const I32: TypeId = TypeId(4);
    /// Unsigned 32-bit integer (`uint`).
    pub const U32: TypeId = TypeId(5);
    /// Signed 64-bit integer (`long`).
    pub const I64: TypeId = TypeId(6);
    /// Unsigned 64-bit integer (`ulong`).
    pub const U64: TypeId = TypeId(7);
    /// 32-bit float (`float`).
    pub const F32: TypeId = TypeId(8);
    /// 64-bit float (`double`).
    pub const F64: TypeId = TypeId(9);
    /// Untyped pointer (`void*`), pointer-width.
    pub const VPTR: TypeId = TypeId(10);
    /// The empty type (`void`).
    pub const VOID: TypeId = TypeId(11);

    /// Check whether this is one of the built-in primitive types.
    #[inline]
    pub const fn is_primitive(self) -> bool {
        self.0 <= Self::VOID.0
    }

    /// Check whether this is a scalar that can carry a constant payload
    /// (every primitive except `void`).
    #[inline]
    pub const fn is_scalar(self) -> bool {
        self.0 <= Self::VPTR.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        let ty = TypeId::new(42);
        assert_eq!(ty.index(), 42);
        assert_eq!(TypeId::from_raw(ty.raw()), ty);
    }

    #[test]
    fn invalid_sentinel() {
        assert!(MethodId::INVALID.is_invalid());
        assert!(!MethodId::new(0).is_invalid());
        assert_eq!(NameId::INVALID.raw(), INVALID_INDEX);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", SignatureId::new(3)), "sig_3");
        assert_eq!(format!("{}", SignatureId::INVALID), "sig_invalid");
    }

    #[test]
    fn primitive_ranges() {
        assert!(TypeId::I8.is_primitive());
        assert!(TypeId::VOID.is_primitive());
        assert!(!TypeId::new(12).is_primitive());

        assert!(TypeId::VPTR.is_scalar());
        assert!(!TypeId::VOID.is_scalar());
    }
}
