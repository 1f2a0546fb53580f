//! The Ingot module assembler.
//!
//! Builds typed intermediate representation in memory (module-level
//! types, global and constant data, deduplicated method signatures, and
//! per-method bytecode) and serializes the whole module into one compact,
//! position-independent binary blob for a separate virtual machine to
//! load.
//!
//! The pieces, bottom up:
//!
//! - [`writer::RelocWriter`]: nested variable-length binary sections
//!   linked by back-patched relative offsets.
//! - [`key::StructKey`]: canonical byte keys giving signatures and
//!   field-offset paths value identity.
//! - [`symbols::SymbolTable`]: append-only name interning with dense
//!   keys and upsert semantics.
//! - [`method::MethodAssembler`]: instruction encoding, operand
//!   validation, and label-based branch patching for one method body.
//! - [`module::ModuleBuilder`]: the declare/define/export surface tying
//!   it all together.
//!
//! ```
//! use ingot_assembler::ModuleBuilder;
//! use ingot_core::operand::Param;
//! use ingot_core::TypeId;
//!
//! # fn build() -> Result<Vec<u8>, ingot_core::AssembleError> {
//! let mut builder = ModuleBuilder::new(Some("demo.src"));
//! let sig = builder.make_signature(TypeId::I32, &[TypeId::I32, TypeId::I32])?;
//! let mut asm = builder.define_method_named("add", sig)?;
//! let sum = asm.push_local(TypeId::I32);
//! asm.set(sum, Param(0))?;
//! asm.add(sum, Param(1))?;
//! asm.retv(sum)?;
//! builder.finish_method(asm)?;
//! builder.export()
//! # }
//! ```

pub mod key;
pub mod method;
pub mod module;
pub mod opcode;
pub mod symbols;
pub mod writer;

pub use key::StructKey;
pub use method::MethodAssembler;
pub use module::{LookupValue, ModuleBuilder, NameRole, TypeFlags, TypeWriter};
pub use opcode::Opcode;
pub use symbols::{SymbolTable, WireValue};
pub use writer::RelocWriter;
