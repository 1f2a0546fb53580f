//! Ingot: an in-memory IR builder and binary module assembler.
//!
//! A front-end uses this crate to construct a typed module (types,
//! globals, signatures, and per-method bytecode) and serialize it into a
//! single position-independent blob for a separate virtual machine to
//! load. The heavy lifting lives in [`ingot_assembler`]; the shared
//! vocabulary (ids, operands, errors) in [`ingot_core`].

pub use ingot_assembler;
pub use ingot_core;

pub mod prelude {
    pub use ingot_assembler::method::MethodAssembler;
    pub use ingot_assembler::module::{
        LookupValue, ModuleBuilder, NameRole, TypeFlags, TypeWriter,
    };
    pub use ingot_assembler::opcode::Opcode;
    pub use ingot_core::error::AssembleError;
    pub use ingot_core::ids::*;
    pub use ingot_core::lang::{MAX_INITIALIZER_COUNT, MAX_PARAMETER_COUNT};
    pub use ingot_core::operand::*;
}
