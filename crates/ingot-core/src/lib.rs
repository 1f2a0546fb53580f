//! Core types for the Ingot module assembler.
//!
//! This crate holds the leaf vocabulary shared by the assembler and its
//! callers: dense integer ids, the bit-packed operand encoding, error
//! types, the built-in primitive catalog, and the host-platform facts
//! embedded in emitted modules. It has no assembler logic of its own.

pub mod error;
pub mod ids;
pub mod lang;
pub mod operand;
pub mod platform;

pub use error::AssembleError;
pub use ids::{
    GlobalId, INVALID_INDEX, LabelId, MetaId, MethodId, NameId, OffsetId, RawId, SignatureId,
    TypeId,
};
pub use operand::{
    AccessMode, ConstValue, GlobalVar, Header, Modified, Operand, OperandKind, Param, PathKind,
    Payload, Stack,
};
