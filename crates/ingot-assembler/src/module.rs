//! Module construction and binary export.
//!
//! A [`ModuleBuilder`] owns every module-wide table: interned names,
//! types, methods, deduplicated signatures and field-offset paths, and the
//! global/constant data tables. Entities move through a one-way lifecycle:
//! declared as a placeholder, optionally attached to a one-shot writer
//! ([`TypeWriter`] or [`MethodAssembler`]), then defined for good when the
//! writer is handed back. [`export`](ModuleBuilder::export) serializes the
//! whole module into one position-independent blob.
//!
//! Names are the glue. Every identifier is interned once in the symbol
//! table and its entry records what the name currently is (type, method,
//! global, constant, or a plain identifier not yet bound to anything);
//! declaring a name as the wrong kind is an error, declaring it as the
//! same kind is idempotent.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use ingot_core::operand::ConstValue;
use ingot_core::platform::{self, Arch};
use ingot_core::{
    AssembleError, GlobalId, INVALID_INDEX, MetaId, MethodId, NameId, OffsetId, RawId, SignatureId,
    TypeId, lang,
};

use crate::key::StructKey;
use crate::method::MethodAssembler;
use crate::symbols::{SymbolTable, WireValue};
use crate::writer::RelocWriter;

bitflags! {
    /// Per-entity flag word, exported verbatim.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u32 {
        const UNION = 1 << 0;

        const POINTER = 1 << 8;
        const ARRAY = 1 << 9;
        const SIGNATURE = 1 << 10;

        const DEFINED = 1 << 24;
        const RESOLVED = 1 << 26;
    }
}

/// What an interned name currently refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NameRole {
    Type = 0,
    Method = 1,
    Global = 2,
    Constant = 3,
    /// Interned but not yet bound to an entity.
    Identifier = 4,
}

impl NameRole {
    fn describe(self) -> &'static str {
        match self {
            NameRole::Type => "type",
            NameRole::Method => "method",
            NameRole::Global => "global",
            NameRole::Constant => "constant",
            NameRole::Identifier => "identifier",
        }
    }
}

/// Symbol-table value: the name's role plus the entity index it resolves
/// to (a type id, method id, or data-table index depending on the role).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupValue {
    pub role: NameRole,
    pub index: u32,
}

impl WireValue for LookupValue {
    fn encode(&self, w: &mut RelocWriter) {
        w.write_u32(self.role as u32);
        w.write_u32(self.index);
    }
}

/// How a synthetic type was derived, if it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GeneratedType {
    #[default]
    None,
    Pointer {
        pointee: TypeId,
    },
    Array {
        elem: TypeId,
        len: usize,
    },
    Signature {
        signature: SignatureId,
    },
}

impl GeneratedType {
    /// Fixed-width encoding: a u32 id slot and a pointer-width size slot.
    fn encode(&self, w: &mut RelocWriter) {
        match *self {
            GeneratedType::None => {
                w.write_u32(0);
                w.write_usize(0);
            }
            GeneratedType::Pointer { pointee } => {
                w.write_u32(pointee.raw());
                w.write_usize(0);
            }
            GeneratedType::Array { elem, len } => {
                w.write_u32(elem.raw());
                w.write_usize(len);
            }
            GeneratedType::Signature { signature } => {
                w.write_u32(signature.raw());
                w.write_usize(0);
            }
        }
    }
}

/// One named slot: a struct field, or a global/constant data entry.
#[derive(Debug, Clone, Copy)]
struct FieldDef {
    name: NameId,
    ty: TypeId,
    /// Byte offset; zero for struct fields (layout is the loader's job),
    /// the data-blob position for global entries.
    offset: usize,
}

#[derive(Debug)]
struct TypeDef {
    name: NameId,
    index: TypeId,
    flags: TypeFlags,
    generated: GeneratedType,
    fields: Vec<FieldDef>,
    total_size: usize,
    /// Memo: the pointer type derived from this type, once requested.
    pointer_type: TypeId,
    /// Memo: array types derived from this type, by element count.
    array_types: FxHashMap<usize, TypeId>,
    meta: MetaId,
    line: u32,
    writer_live: bool,
}

impl TypeDef {
    fn placeholder(name: NameId, index: TypeId) -> Self {
        Self {
            name,
            index,
            flags: TypeFlags::empty(),
            generated: GeneratedType::None,
            fields: Vec::new(),
            total_size: 0,
            pointer_type: TypeId::INVALID,
            array_types: FxHashMap::default(),
            meta: MetaId::INVALID,
            line: 0,
            writer_live: false,
        }
    }

    fn base(name: NameId, base: &lang::BaseType) -> Self {
        let mut def = Self::placeholder(name, base.index);
        if base.index == TypeId::VOID {
            def.pointer_type = TypeId::VPTR;
        } else if base.index == TypeId::VPTR {
            def.generated = GeneratedType::Pointer {
                pointee: TypeId::VOID,
            };
            def.flags |= TypeFlags::POINTER;
        }
        def.total_size = base.size;
        def.flags |= TypeFlags::DEFINED | TypeFlags::RESOLVED;
        def
    }

    fn is_defined(&self) -> bool {
        self.flags.contains(TypeFlags::DEFINED)
    }
}

#[derive(Debug)]
struct MethodDef {
    name: NameId,
    index: MethodId,
    flags: TypeFlags,
    signature: SignatureId,
    bytecode: Vec<u8>,
    labels: Vec<usize>,
    stackvars: Vec<TypeId>,
    calls: Vec<MethodId>,
    globals: Vec<NameId>,
    offsets: Vec<OffsetId>,
    meta: MetaId,
    line: u32,
    writer_live: bool,
}

impl MethodDef {
    fn placeholder(name: NameId, index: MethodId) -> Self {
        Self {
            name,
            index,
            flags: TypeFlags::empty(),
            signature: SignatureId::INVALID,
            bytecode: Vec::new(),
            labels: Vec::new(),
            stackvars: Vec::new(),
            calls: Vec::new(),
            globals: Vec::new(),
            offsets: Vec::new(),
            meta: MetaId::INVALID,
            line: 0,
            writer_live: false,
        }
    }

    fn is_defined(&self) -> bool {
        self.flags.contains(TypeFlags::DEFINED)
    }
}

#[derive(Debug)]
struct SignatureDef {
    return_type: TypeId,
    params: Vec<TypeId>,
    /// Memo: the code-pointer type derived from this signature.
    signature_type: TypeId,
}

#[derive(Debug)]
struct OffsetDef {
    object_type: TypeId,
    field_names: Vec<NameId>,
}

/// Global or constant storage: per-entry descriptors plus one packed
/// initializer blob.
#[derive(Debug, Default)]
struct DataTable {
    info: Vec<FieldDef>,
    data: RelocWriter,
}

/// One-shot field recorder for a struct or union type, created by
/// [`ModuleBuilder::define_type`] and consumed by
/// [`ModuleBuilder::finish_type`].
#[derive(Debug)]
pub struct TypeWriter {
    ty: TypeId,
    is_union: bool,
    fields: Vec<FieldDef>,
    meta: MetaId,
    line: u32,
}

impl TypeWriter {
    /// The type under construction.
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Record a field. Order is preserved; duplicate names are rejected.
    /// The field name must be interned and the type declared by the owning
    /// builder, checked when the writer is handed back.
    pub fn declare_field(&mut self, ty: TypeId, name: NameId) -> Result<(), AssembleError> {
        if self.fields.iter().any(|field| field.name == name) {
            return Err(AssembleError::DuplicateField { name });
        }
        self.fields.push(FieldDef {
            name,
            ty,
            offset: 0,
        });
        Ok(())
    }
}

/// Builds one module and serializes it.
#[derive(Debug)]
pub struct ModuleBuilder {
    symbols: SymbolTable<NameId, LookupValue>,
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    signatures: Vec<SignatureDef>,
    signature_lookup: FxHashMap<StructKey, SignatureId>,
    offsets: Vec<OffsetDef>,
    offset_lookup: FxHashMap<StructKey, OffsetId>,
    globals: DataTable,
    constants: DataTable,
    key_scratch: Vec<u8>,
    file_name: String,
    meta: MetaId,
    line_number: u32,
}

impl ModuleBuilder {
    /// Create a builder with the primitive types seeded. Passing a source
    /// file name records it as the module's metadata entry.
    pub fn new(file_name: Option<&str>) -> Self {
        let mut builder = Self {
            symbols: SymbolTable::new(),
            types: Vec::new(),
            methods: Vec::new(),
            signatures: Vec::new(),
            signature_lookup: FxHashMap::default(),
            offsets: Vec::new(),
            offset_lookup: FxHashMap::default(),
            globals: DataTable::default(),
            constants: DataTable::default(),
            key_scratch: Vec::new(),
            file_name: String::new(),
            meta: MetaId::INVALID,
            line_number: 0,
        };

        for base in &lang::BASE_TYPES {
            let name = builder.symbols.emplace(
                base.name,
                LookupValue {
                    role: NameRole::Type,
                    index: base.index.raw(),
                },
            );
            builder.types.push(TypeDef::base(name, base));
        }

        // Pointer-width aliases resolve to the host's native-width
        // integers: `offset` signed, `size` unsigned.
        let size_base = if platform::arch() == Arch::X32 {
            TypeId::I32
        } else {
            TypeId::I64
        };
        for (i, alias) in lang::ALIAS_TYPES.iter().enumerate() {
            builder.symbols.emplace(
                alias,
                LookupValue {
                    role: NameRole::Type,
                    index: size_base.raw() + i as u32,
                },
            );
        }

        if let Some(file_name) = file_name {
            builder.file_name = file_name.to_owned();
            builder.meta = MetaId::new(0);
        }

        builder
    }

    /// Set the source line recorded by subsequently created writers.
    pub fn set_line_number(&mut self, line: u32) {
        self.line_number = line;
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn offset_count(&self) -> usize {
        self.offsets.len()
    }

    /// Look up an interned name's current binding.
    pub fn resolve(&self, name: &str) -> Option<(NameId, LookupValue)> {
        self.symbols.by_name(name).map(|(key, value)| (key, *value))
    }

    fn display_name(&self, name: NameId) -> String {
        self.symbols.name(name).unwrap_or("?").to_owned()
    }

    fn lookup(&self, name: NameId) -> Result<LookupValue, AssembleError> {
        self.symbols
            .get(name)
            .copied()
            .ok_or(AssembleError::UnknownName { id: name })
    }

    fn check_type(&self, id: TypeId) -> Result<&TypeDef, AssembleError> {
        self.types
            .get(id.index() as usize)
            .ok_or(AssembleError::UnknownType { id })
    }

    fn check_name(&self, id: NameId) -> Result<(), AssembleError> {
        if !self.symbols.contains_key(id) {
            return Err(AssembleError::UnknownName { id });
        }
        Ok(())
    }

    /// Intern an identifier. Idempotent; the name's existing binding, if
    /// any, is left untouched.
    pub fn intern(&mut self, name: &str) -> Result<NameId, AssembleError> {
        if !lang::is_valid_identifier(name) {
            return Err(AssembleError::InvalidIdentifier {
                name: name.to_owned(),
            });
        }
        if let Some((key, _)) = self.symbols.by_name(name) {
            return Ok(key);
        }
        Ok(self.symbols.emplace(
            name,
            LookupValue {
                role: NameRole::Identifier,
                index: INVALID_INDEX,
            },
        ))
    }

    // ---- types -----------------------------------------------------------

    /// Declare a named type, or fetch it if the name is already a type.
    pub fn declare_type(&mut self, name: NameId) -> Result<TypeId, AssembleError> {
        let entry = self.lookup(name)?;
        match entry.role {
            NameRole::Identifier => {
                let id = TypeId::new(self.types.len() as u32);
                self.types.push(TypeDef::placeholder(name, id));
                self.symbols.update_value(
                    name,
                    LookupValue {
                        role: NameRole::Type,
                        index: id.raw(),
                    },
                );
                Ok(id)
            }
            NameRole::Type => Ok(TypeId::new(entry.index)),
            other => Err(AssembleError::NameKindMismatch {
                name: self.display_name(name),
                expected: "type",
                found: other.describe(),
            }),
        }
    }

    /// Intern and declare in one step.
    pub fn declare_type_named(&mut self, name: &str) -> Result<TypeId, AssembleError> {
        let name = self.intern(name)?;
        self.declare_type(name)
    }

    /// Attach a field writer to a declared type.
    pub fn define_type(&mut self, ty: TypeId, is_union: bool) -> Result<TypeWriter, AssembleError> {
        let def = self.check_type(ty)?;
        let (defined, live, name) = (def.is_defined(), def.writer_live, def.name);
        if defined {
            return Err(AssembleError::AlreadyDefined {
                kind: "type",
                name: self.display_name(name),
            });
        }
        if live {
            return Err(AssembleError::WriterLive {
                kind: "type",
                name: self.display_name(name),
            });
        }

        self.types[ty.index() as usize].writer_live = true;
        Ok(TypeWriter {
            ty,
            is_union,
            fields: Vec::new(),
            meta: self.meta,
            line: self.line_number,
        })
    }

    /// Consume a type writer, validating its fields against the module
    /// tables and sealing the type.
    pub fn finish_type(&mut self, writer: TypeWriter) -> Result<(), AssembleError> {
        let TypeWriter {
            ty,
            is_union,
            fields,
            meta,
            line,
        } = writer;

        for field in &fields {
            self.check_name(field.name)?;
            self.check_type(field.ty)?;
        }

        let def = &mut self.types[ty.index() as usize];
        def.flags |= TypeFlags::DEFINED;
        if is_union {
            def.flags |= TypeFlags::UNION;
        }
        def.fields = fields;
        def.meta = meta;
        def.line = line;
        def.writer_live = false;
        Ok(())
    }

    /// The pointer-to-`base` type, created on first request.
    pub fn declare_pointer_type(&mut self, base: TypeId) -> Result<TypeId, AssembleError> {
        let pointer = self.check_type(base)?.pointer_type;
        if !pointer.is_invalid() {
            return Ok(pointer);
        }

        let id = TypeId::new(self.types.len() as u32);
        let mut def = TypeDef::placeholder(NameId::INVALID, id);
        def.generated = GeneratedType::Pointer { pointee: base };
        def.flags |= TypeFlags::POINTER | TypeFlags::DEFINED;
        self.types.push(def);
        self.types[base.index() as usize].pointer_type = id;
        Ok(id)
    }

    /// The `base[len]` array type, created on first request per element
    /// count.
    pub fn declare_array_type(&mut self, base: TypeId, len: usize) -> Result<TypeId, AssembleError> {
        if let Some(&id) = self.check_type(base)?.array_types.get(&len) {
            return Ok(id);
        }

        let id = TypeId::new(self.types.len() as u32);
        let mut def = TypeDef::placeholder(NameId::INVALID, id);
        def.generated = GeneratedType::Array { elem: base, len };
        def.flags |= TypeFlags::ARRAY | TypeFlags::DEFINED;
        self.types.push(def);
        self.types[base.index() as usize].array_types.insert(len, id);
        Ok(id)
    }

    /// The code-pointer type for a signature, created on first request.
    pub fn declare_signature_type(
        &mut self,
        signature: SignatureId,
    ) -> Result<TypeId, AssembleError> {
        let def = self
            .signatures
            .get(signature.index() as usize)
            .ok_or(AssembleError::UnknownSignature { id: signature })?;
        if !def.signature_type.is_invalid() {
            return Ok(def.signature_type);
        }

        let id = TypeId::new(self.types.len() as u32);
        let mut def = TypeDef::placeholder(NameId::INVALID, id);
        def.generated = GeneratedType::Signature { signature };
        def.flags |= TypeFlags::SIGNATURE | TypeFlags::DEFINED;
        self.types.push(def);
        self.signatures[signature.index() as usize].signature_type = id;
        Ok(id)
    }

    // ---- signatures and offsets ------------------------------------------

    /// Get or create the signature `(return_type, params)`. Structurally
    /// equal signatures share one id.
    pub fn make_signature(
        &mut self,
        return_type: TypeId,
        params: &[TypeId],
    ) -> Result<SignatureId, AssembleError> {
        self.check_type(return_type)?;
        for &param in params {
            self.check_type(param)?;
        }
        if params.len() > lang::MAX_PARAMETER_COUNT {
            return Err(AssembleError::TooManyParameters {
                count: params.len(),
                max: lang::MAX_PARAMETER_COUNT,
            });
        }

        let key = StructKey::build(
            &mut self.key_scratch,
            return_type.raw() as u64,
            params.iter().map(|param| param.raw() as u64),
        );
        if let Some(&id) = self.signature_lookup.get(&key) {
            return Ok(id);
        }

        let id = SignatureId::new(self.signatures.len() as u32);
        self.signatures.push(SignatureDef {
            return_type,
            params: params.to_vec(),
            signature_type: TypeId::INVALID,
        });
        self.signature_lookup.insert(key, id);
        Ok(id)
    }

    fn intern_offset(
        &mut self,
        object_type: TypeId,
        field_names: Vec<NameId>,
    ) -> Result<OffsetId, AssembleError> {
        let key = StructKey::build(
            &mut self.key_scratch,
            object_type.raw() as u64,
            field_names.iter().map(|name| name.raw() as u64),
        );
        if let Some(&id) = self.offset_lookup.get(&key) {
            return Ok(id);
        }

        let id = OffsetId::new(self.offsets.len() as u32);
        self.offsets.push(OffsetDef {
            object_type,
            field_names,
        });
        self.offset_lookup.insert(key, id);
        Ok(id)
    }

    /// Get or create a field-offset path rooted at `object_type`. Field
    /// names must be interned; whether they exist on the concrete layout
    /// is resolved by the loader.
    pub fn make_offset(
        &mut self,
        object_type: TypeId,
        fields: &[NameId],
    ) -> Result<OffsetId, AssembleError> {
        self.check_type(object_type)?;
        for &field in fields {
            self.check_name(field)?;
        }
        self.intern_offset(object_type, fields.to_vec())
    }

    /// Get or create the path `base` extended by more field steps.
    pub fn append_offset(
        &mut self,
        base: OffsetId,
        fields: &[NameId],
    ) -> Result<OffsetId, AssembleError> {
        let def = self
            .offsets
            .get(base.index() as usize)
            .ok_or(AssembleError::UnknownOffset { id: base })?;
        let object_type = def.object_type;
        let mut combined = def.field_names.clone();
        for &field in fields {
            self.check_name(field)?;
            combined.push(field);
        }
        self.intern_offset(object_type, combined)
    }

    // ---- globals ---------------------------------------------------------

    /// Bind an interned name to global (or constant) storage of the given
    /// type, with its initializer values packed into the data blob.
    pub fn define_global(
        &mut self,
        name: NameId,
        constant: bool,
        ty: TypeId,
        values: &[ConstValue],
    ) -> Result<GlobalId, AssembleError> {
        let entry = self.lookup(name)?;
        if entry.role != NameRole::Identifier {
            return Err(AssembleError::NameKindMismatch {
                name: self.display_name(name),
                expected: "identifier",
                found: entry.role.describe(),
            });
        }
        self.check_type(ty)?;
        for value in values {
            if let ConstValue::GlobalRef(global) = value {
                self.check_name(*global)?;
            }
        }
        if values.len() > lang::MAX_INITIALIZER_COUNT {
            return Err(AssembleError::TooManyInitializers {
                count: values.len(),
                max: lang::MAX_INITIALIZER_COUNT,
            });
        }

        let (table, role) = if constant {
            (&mut self.constants, NameRole::Constant)
        } else {
            (&mut self.globals, NameRole::Global)
        };
        let id = GlobalId::new(table.info.len() as u32);
        self.symbols.update_value(
            name,
            LookupValue {
                role,
                index: id.raw(),
            },
        );
        table.info.push(FieldDef {
            name,
            ty,
            offset: table.data.len(),
        });

        table.data.write_u16(values.len() as u16);
        for value in values {
            table.data.write_u8(value.type_id().raw() as u8);
            match *value {
                // A global reference records the target name; the loader
                // substitutes the target's address.
                ConstValue::GlobalRef(global) => table.data.write_u32(global.raw()),
                // Only the null pointer is expressible; the tag suffices.
                ConstValue::Ptr(_) => {}
                _ => {
                    let bits = value.payload().bits();
                    match value.type_id() {
                        TypeId::I8 | TypeId::U8 => table.data.write_u8(bits as u8),
                        TypeId::I16 | TypeId::U16 => table.data.write_u16(bits as u16),
                        TypeId::I32 | TypeId::U32 | TypeId::F32 => table.data.write_u32(bits as u32),
                        _ => table.data.write_u64(bits),
                    }
                }
            }
        }
        Ok(id)
    }

    /// Intern and define in one step.
    pub fn define_global_named(
        &mut self,
        name: &str,
        constant: bool,
        ty: TypeId,
        values: &[ConstValue],
    ) -> Result<NameId, AssembleError> {
        let name = self.intern(name)?;
        self.define_global(name, constant, ty, values)?;
        Ok(name)
    }

    // ---- methods ---------------------------------------------------------

    /// Declare a named method, or fetch it if the name is already a method.
    pub fn declare_method(&mut self, name: NameId) -> Result<MethodId, AssembleError> {
        let entry = self.lookup(name)?;
        match entry.role {
            NameRole::Identifier => {
                let id = MethodId::new(self.methods.len() as u32);
                self.methods.push(MethodDef::placeholder(name, id));
                self.symbols.update_value(
                    name,
                    LookupValue {
                        role: NameRole::Method,
                        index: id.raw(),
                    },
                );
                Ok(id)
            }
            NameRole::Method => Ok(MethodId::new(entry.index)),
            other => Err(AssembleError::NameKindMismatch {
                name: self.display_name(name),
                expected: "method",
                found: other.describe(),
            }),
        }
    }

    /// Intern and declare in one step.
    pub fn declare_method_named(&mut self, name: &str) -> Result<MethodId, AssembleError> {
        let name = self.intern(name)?;
        self.declare_method(name)
    }

    /// Attach a bytecode assembler to a declared method.
    pub fn define_method(
        &mut self,
        method: MethodId,
        signature: SignatureId,
    ) -> Result<MethodAssembler, AssembleError> {
        let def = self
            .methods
            .get(method.index() as usize)
            .ok_or(AssembleError::UnknownMethod { id: method })?;
        let (defined, live, name) = (def.is_defined(), def.writer_live, def.name);
        if defined {
            return Err(AssembleError::AlreadyDefined {
                kind: "method",
                name: self.display_name(name),
            });
        }
        if live {
            return Err(AssembleError::WriterLive {
                kind: "method",
                name: self.display_name(name),
            });
        }

        let sig = self
            .signatures
            .get(signature.index() as usize)
            .ok_or(AssembleError::UnknownSignature { id: signature })?;
        let asm = MethodAssembler::new(
            method,
            signature,
            sig.return_type,
            sig.params.len() as u32,
            self.meta,
            self.line_number,
        );
        self.methods[method.index() as usize].writer_live = true;
        Ok(asm)
    }

    /// Declare and attach in one step.
    pub fn define_method_named(
        &mut self,
        name: &str,
        signature: SignatureId,
    ) -> Result<MethodAssembler, AssembleError> {
        let method = self.declare_method_named(name)?;
        self.define_method(method, signature)
    }

    /// Consume a method assembler: resolve its branches, validate every
    /// recorded cross-reference, and seal the method.
    pub fn finish_method(&mut self, asm: MethodAssembler) -> Result<(), AssembleError> {
        let parts = asm.finish()?;

        for &callee in &parts.calls {
            if callee.index() as usize >= self.methods.len() {
                return Err(AssembleError::UnknownMethod { id: callee });
            }
        }
        for &global in &parts.globals {
            self.check_name(global)?;
        }
        for &offset in &parts.offsets {
            if offset.index() as usize >= self.offsets.len() {
                return Err(AssembleError::UnknownOffset { id: offset });
            }
        }
        for &local in &parts.locals {
            self.check_type(local)?;
        }

        let def = &mut self.methods[parts.method.index() as usize];
        def.flags |= TypeFlags::DEFINED;
        def.signature = parts.signature;
        def.bytecode = parts.code;
        def.labels = parts.labels;
        def.stackvars = parts.locals;
        def.calls = parts.calls;
        def.globals = parts.globals;
        def.offsets = parts.offsets;
        def.meta = parts.meta;
        def.line = parts.line;
        def.writer_live = false;
        Ok(())
    }

    // ---- export ----------------------------------------------------------

    /// Serialize the module into one position-independent blob.
    pub fn export(self) -> Result<Vec<u8>, AssembleError> {
        for def in &self.types {
            if def.writer_live {
                return Err(AssembleError::WriterUnfinished {
                    kind: "type",
                    name: self.display_name(def.name),
                });
            }
        }
        for def in &self.methods {
            if def.writer_live {
                return Err(AssembleError::WriterUnfinished {
                    kind: "method",
                    name: self.display_name(def.name),
                });
            }
        }

        let mut w = RelocWriter::new();
        w.write_bytes(lang::MODULE_MAGIC);
        w.write_u64(platform::version_word());

        let mut list = w.write_deferred();
        for def in &self.types {
            list.write_u32(def.name.raw());
            list.write_u32(def.index.raw());
            list.write_u32(def.flags.bits());
            def.generated.encode(&mut list);
            let mut fields = list.write_deferred();
            for field in &def.fields {
                fields.write_u32(field.name.raw());
                fields.write_u32(field.ty.raw());
                fields.write_usize(field.offset);
                fields.bump();
            }
            list.adopt(fields);
            list.write_usize(def.total_size);
            list.write_u32(def.pointer_type.raw());
            list.write_u32(def.meta.raw());
            list.write_u32(def.line);
            list.bump();
        }
        w.adopt(list);

        let mut list = w.write_deferred();
        for def in &self.methods {
            list.write_u32(def.name.raw());
            list.write_u32(def.index.raw());
            list.write_u32(def.flags.bits());
            list.write_u32(def.signature.raw());
            list.write_u8_array(&def.bytecode);
            list.write_usize_array(def.labels.iter().copied());
            let mut stackvars = list.write_deferred();
            for &var in &def.stackvars {
                stackvars.write_u32(var.raw());
                stackvars.write_usize(0); // offset, resolved by the loader
                stackvars.bump();
            }
            list.adopt(stackvars);
            list.write_usize(0); // frame size, resolved by the loader
            list.write_u32_array(def.calls.iter().map(|id| id.raw()));
            list.write_u32_array(def.globals.iter().map(|id| id.raw()));
            list.write_u32_array(def.offsets.iter().map(|id| id.raw()));
            list.write_u32(def.meta.raw());
            list.write_u32(def.line);
            list.bump();
        }
        w.adopt(list);

        let mut list = w.write_deferred();
        for (index, def) in self.signatures.iter().enumerate() {
            list.write_u32(index as u32);
            list.write_u32(def.return_type.raw());
            let mut params = list.write_deferred();
            for &param in &def.params {
                params.write_u32(param.raw());
                params.write_usize(0); // offset, resolved by the loader
                params.bump();
            }
            list.adopt(params);
            list.write_usize(0); // parameters size, resolved by the loader
            list.bump();
        }
        w.adopt(list);

        let mut list = w.write_deferred();
        for def in &self.offsets {
            list.write_u32(def.object_type.raw());
            list.write_u32_array(def.field_names.iter().map(|id| id.raw()));
            list.write_u32(INVALID_INDEX); // field type, resolved by the loader
            list.write_usize(0); // byte offset, resolved by the loader
            list.bump();
        }
        w.adopt(list);

        for table in [&self.globals, &self.constants] {
            let mut list = w.write_deferred();
            for info in &table.info {
                list.write_u32(info.name.raw());
                list.write_u32(info.ty.raw());
                list.write_usize(info.offset);
                list.bump();
            }
            w.adopt(list);
            w.write_u8_array(table.data.bytes());
        }

        self.symbols.export(&mut w);

        let mut entries = w.write_deferred();
        let mut strings = w.write_deferred();
        if !self.meta.is_invalid() {
            let bytes = self.file_name.as_bytes();
            entries.write_u32(0);
            entries.write_u32(bytes.len() as u32);
            entries.write_u32(self.meta.raw());
            entries.bump();
            strings.write_bytes(bytes);
            strings.bump_by(bytes.len() as u32);
        }
        w.adopt(entries);
        w.adopt(strings);

        let mut blob = w.finalize(lang::MODULE_FOOTER.len());
        let at = blob.len() - lang::MODULE_FOOTER.len();
        blob[at..].copy_from_slice(lang::MODULE_FOOTER);
        Ok(blob)
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new(None)
    }
}
