//! Bit-packed operand encoding for bytecode instructions.
//!
//! Every instruction operand is an [`Operand`]: a 4-byte [`Header`] packing
//! storage kind, access mode, path modifier and a 26-bit index, followed by
//! an 8-byte [`Payload`] whose interpretation depends on the header. The
//! encode/decode functions in this module are the single source of truth
//! for the wire layout; the assembler writes operands byte-identically to
//! how they are constructed here.
//!
//! Operands are built through the ergonomic wrappers [`Stack`], [`Param`],
//! [`GlobalVar`] and [`ConstValue`]:
//!
//! ```
//! use ingot_core::operand::{ConstValue, Operand, Stack};
//!
//! let dst: Operand = Stack(0).into();
//! let src: Operand = ConstValue::I32(7).into();
//! let via_field: Operand = Stack(1).deref();
//! ```

use crate::ids::{NameId, OffsetId, TypeId};

/// Where an operand's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperandKind {
    /// A method-local variable, addressed by declaration order.
    Stack = 0,
    /// A method parameter, addressed by signature order.
    Param = 1,
    /// A module global, addressed by interned name id.
    Global = 2,
    /// An inline constant carried in the payload.
    Const = 3,
}

/// How an operand is used at the instruction site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessMode {
    /// Use the value directly.
    Direct = 0,
    /// Dereference the value as a pointer.
    Deref = 1,
    /// Take the address of the value.
    AddressOf = 2,
    /// Take the size of the value's type.
    SizeOf = 3,
}

/// Optional field/offset step applied before the access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PathKind {
    /// No modifier.
    None = 0,
    /// Step into a field of the value (payload holds an offset-path id).
    DirectField = 1,
    /// Dereference, then step into a field (payload holds an offset-path id).
    IndirectField = 2,
    /// Apply a raw signed byte offset (payload holds the offset).
    ByteOffset = 3,
}

#[inline]
const fn kind_from_bits(bits: u32) -> OperandKind {
    match bits & Header::FLAG_MASK {
        0 => OperandKind::Stack,
        1 => OperandKind::Param,
        2 => OperandKind::Global,
        _ => OperandKind::Const,
    }
}

#[inline]
const fn access_from_bits(bits: u32) -> AccessMode {
    match bits & Header::FLAG_MASK {
        0 => AccessMode::Direct,
        1 => AccessMode::Deref,
        2 => AccessMode::AddressOf,
        _ => AccessMode::SizeOf,
    }
}

#[inline]
const fn path_from_bits(bits: u32) -> PathKind {
    match bits & Header::FLAG_MASK {
        0 => PathKind::None,
        1 => PathKind::DirectField,
        2 => PathKind::IndirectField,
        _ => PathKind::ByteOffset,
    }
}

/// The packed 32-bit operand header.
///
/// Layout, most significant bits first:
///
/// ```text
/// [31:30] kind    [29:28] access    [27:26] path    [25:0] index
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header(u32);

impl Header {
    const FLAG_MASK: u32 = 0b11;
    const INDEX_BITS: u32 = 26;
    const KIND_SHIFT: u32 = 30;
    const ACCESS_SHIFT: u32 = 28;
    const PATH_SHIFT: u32 = 26;

    /// Largest encodable index; for stack operands this value is the
    /// return-value slot sentinel.
    pub const INDEX_MAX: u32 = u32::MAX >> (32 - Self::INDEX_BITS);

    /// Pack a header from its fields. The index is masked to 26 bits.
    #[inline]
    pub const fn new(kind: OperandKind, access: AccessMode, path: PathKind, index: u32) -> Self {
        let mut value = index & Self::INDEX_MAX;
        value |= (kind as u32 & Self::FLAG_MASK) << Self::KIND_SHIFT;
        value |= (access as u32 & Self::FLAG_MASK) << Self::ACCESS_SHIFT;
        value |= (path as u32 & Self::FLAG_MASK) << Self::PATH_SHIFT;
        Self(value)
    }

    /// Pack a constant header: kind `Const`, direct access, no path, and
    /// the constant's type id in the index field.
    #[inline]
    pub const fn constant(ty: TypeId) -> Self {
        let mut value = ty.index() & Self::INDEX_MAX;
        value |= (OperandKind::Const as u32) << Self::KIND_SHIFT;
        Self(value)
    }

    /// Rebuild a header from its packed form.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the packed form.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Get the storage kind.
    #[inline]
    pub const fn kind(self) -> OperandKind {
        kind_from_bits(self.0 >> Self::KIND_SHIFT)
    }

    /// Get the access mode.
    #[inline]
    pub const fn access(self) -> AccessMode {
        access_from_bits(self.0 >> Self::ACCESS_SHIFT)
    }

    /// Get the path modifier.
    #[inline]
    pub const fn path(self) -> PathKind {
        path_from_bits(self.0 >> Self::PATH_SHIFT)
    }

    /// Get the 26-bit index field.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & Self::INDEX_MAX
    }

    /// Replace the index field, leaving the flag bits untouched.
    #[inline]
    pub fn set_index(&mut self, index: u32) {
        self.0 = (self.0 & !Self::INDEX_MAX) | (index & Self::INDEX_MAX);
    }
}

/// The 8-byte operand payload.
///
/// A bit-level union: depending on the header it holds one of the scalar
/// representations, a pointer-sized value, an interned-global id, a
/// field-offset-path id, or a raw signed byte offset. Two payloads are
/// equal iff their bits are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Payload(u64);

impl Payload {
    /// The all-zero payload.
    pub const ZERO: Payload = Payload(0);

    /// Build a payload from raw bits.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bits.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Payload carrying a field-offset-path id.
    #[inline]
    pub const fn from_field(field: OffsetId) -> Self {
        Self(field.index() as u64)
    }

    /// Payload carrying a raw signed byte offset.
    #[inline]
    pub const fn from_offset(offset: isize) -> Self {
        Self(offset as u64)
    }

    /// Payload carrying an interned-global name id.
    #[inline]
    pub const fn from_global(name: NameId) -> Self {
        Self(name.index() as u64)
    }

    /// Read the payload as a field-offset-path id.
    #[inline]
    pub const fn as_field(self) -> OffsetId {
        OffsetId::new(self.0 as u32)
    }

    /// Read the payload as a raw signed byte offset.
    #[inline]
    pub const fn as_offset(self) -> isize {
        self.0 as isize
    }

    /// Read the payload as an interned-global name id.
    #[inline]
    pub const fn as_global(self) -> NameId {
        NameId::new(self.0 as u32)
    }
}

/// A fully encoded instruction operand: header plus payload.
///
/// Equality is bit-identity of both parts. Constant operands always carry
/// `Direct` access and no path; the assembler enforces this at every
/// encode site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    header: Header,
    payload: Payload,
}

impl Operand {
    /// The invalid operand: a void-typed constant referencing no global.
    pub const INVALID: Operand = Operand {
        header: Header::constant(TypeId::VOID),
        payload: Payload::from_global(NameId::INVALID),
    };

    /// Assemble an operand from its parts.
    #[inline]
    pub const fn from_parts(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }

    /// Get the header.
    #[inline]
    pub const fn header(self) -> Header {
        self.header
    }

    /// Get the payload.
    #[inline]
    pub const fn payload(self) -> Payload {
        self.payload
    }

    #[inline]
    const fn slot(kind: OperandKind, index: u32) -> Self {
        Self {
            header: Header::new(kind, AccessMode::Direct, PathKind::None, index),
            payload: Payload::ZERO,
        }
    }

    #[inline]
    const fn prefixed(kind: OperandKind, access: AccessMode, index: u32) -> Self {
        Self {
            header: Header::new(kind, access, PathKind::None, index),
            payload: Payload::ZERO,
        }
    }
}

/// An inline constant value, tagged with its primitive type.
///
/// `GlobalRef` is the sentinel "address of named global" form: it is
/// declared `void`-typed and carries the referenced global's interned name
/// id. It is valid as a data initializer but not as an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Pointer-sized value; only the null pointer is expressible inline.
    Ptr(usize),
    /// Address of a named global, resolved by the loader.
    GlobalRef(NameId),
}

impl ConstValue {
    /// The null pointer constant.
    pub const NULL_PTR: ConstValue = ConstValue::Ptr(0);

    /// The declared primitive type of this constant.
    pub const fn type_id(&self) -> TypeId {
        match self {
            ConstValue::I8(_) => TypeId::I8,
            ConstValue::U8(_) => TypeId::U8,
            ConstValue::I16(_) => TypeId::I16,
            ConstValue::U16(_) => TypeId::U16,
            ConstValue::I32(_) => TypeId::I32,
            ConstValue::U32(_) => TypeId::U32,
            ConstValue::I64(_) => TypeId::I64,
            ConstValue::U64(_) => TypeId::U64,
            ConstValue::F32(_) => TypeId::F32,
            ConstValue::F64(_) => TypeId::F64,
            ConstValue::Ptr(_) => TypeId::VPTR,
            ConstValue::GlobalRef(_) => TypeId::VOID,
        }
    }

    /// The payload bits of this constant.
    pub const fn payload(&self) -> Payload {
        match *self {
            ConstValue::I8(v) => Payload::from_bits(v as u8 as u64),
            ConstValue::U8(v) => Payload::from_bits(v as u64),
            ConstValue::I16(v) => Payload::from_bits(v as u16 as u64),
            ConstValue::U16(v) => Payload::from_bits(v as u64),
            ConstValue::I32(v) => Payload::from_bits(v as u32 as u64),
            ConstValue::U32(v) => Payload::from_bits(v as u64),
            ConstValue::I64(v) => Payload::from_bits(v as u64),
            ConstValue::U64(v) => Payload::from_bits(v),
            ConstValue::F32(v) => Payload::from_bits(v.to_bits() as u64),
            ConstValue::F64(v) => Payload::from_bits(v.to_bits()),
            ConstValue::Ptr(v) => Payload::from_bits(v as u64),
            ConstValue::GlobalRef(name) => Payload::from_global(name),
        }
    }
}

impl From<ConstValue> for Operand {
    fn from(value: ConstValue) -> Self {
        Operand {
            header: Header::constant(value.type_id()),
            payload: value.payload(),
        }
    }
}

/// A slot operand with a pending field/offset path, awaiting its access
/// mode. Converts to a direct-access [`Operand`], or finish it with
/// [`deref`](Modified::deref), [`addr_of`](Modified::addr_of) or
/// [`size_of`](Modified::size_of).
#[derive(Debug, Clone, Copy)]
pub struct Modified {
    kind: OperandKind,
    index: u32,
    path: PathKind,
    payload: Payload,
}

impl Modified {
    #[inline]
    const fn with_access(self, access: AccessMode) -> Operand {
        Operand {
            header: Header::new(self.kind, access, self.path, self.index),
            payload: self.payload,
        }
    }

    /// Dereference the addressed value.
    #[inline]
    pub const fn deref(self) -> Operand {
        self.with_access(AccessMode::Deref)
    }

    /// Take the address of the addressed value.
    #[inline]
    pub const fn addr_of(self) -> Operand {
        self.with_access(AccessMode::AddressOf)
    }

    /// Take the size of the addressed value's type.
    #[inline]
    pub const fn size_of(self) -> Operand {
        self.with_access(AccessMode::SizeOf)
    }
}

impl From<Modified> for Operand {
    fn from(value: Modified) -> Self {
        value.with_access(AccessMode::Direct)
    }
}

macro_rules! slot_builders {
    ($name:ident, $kind:expr) => {
        impl $name {
            /// Dereference this slot as a pointer.
            #[inline]
            pub const fn deref(self) -> Operand {
                Operand::prefixed($kind, AccessMode::Deref, self.index())
            }

            /// Take the address of this slot.
            #[inline]
            pub const fn addr_of(self) -> Operand {
                Operand::prefixed($kind, AccessMode::AddressOf, self.index())
            }

            /// Take the size of this slot's type.
            #[inline]
            pub const fn size_of(self) -> Operand {
                Operand::prefixed($kind, AccessMode::SizeOf, self.index())
            }

            /// Step into a field of this slot.
            #[inline]
            pub const fn field(self, field: OffsetId) -> Modified {
                Modified {
                    kind: $kind,
                    index: self.index(),
                    path: PathKind::DirectField,
                    payload: Payload::from_field(field),
                }
            }

            /// Dereference this slot, then step into a field.
            #[inline]
            pub const fn deref_field(self, field: OffsetId) -> Modified {
                Modified {
                    kind: $kind,
                    index: self.index(),
                    path: PathKind::IndirectField,
                    payload: Payload::from_field(field),
                }
            }

            /// Apply a raw signed byte offset to this slot.
            #[inline]
            pub const fn at(self, offset: isize) -> Modified {
                Modified {
                    kind: $kind,
                    index: self.index(),
                    path: PathKind::ByteOffset,
                    payload: Payload::from_offset(offset),
                }
            }
        }

        impl From<$name> for Operand {
            fn from(value: $name) -> Operand {
                Operand::slot($kind, value.index())
            }
        }
    };
}

/// A method-local stack slot, addressed by declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack(pub u32);

impl Stack {
    /// The return-value slot sentinel.
    pub const RETVAL: Stack = Stack(Header::INDEX_MAX);

    #[inline]
    const fn index(self) -> u32 {
        self.0
    }
}

slot_builders!(Stack, OperandKind::Stack);

/// A method parameter, addressed by signature order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param(pub u32);

impl Param {
    #[inline]
    const fn index(self) -> u32 {
        self.0
    }
}

slot_builders!(Param, OperandKind::Param);

/// A module global, addressed by its interned name id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalVar(pub NameId);

impl GlobalVar {
    #[inline]
    const fn index(self) -> u32 {
        self.0.index()
    }
}

slot_builders!(GlobalVar, OperandKind::Global);
