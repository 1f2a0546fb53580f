//! Per-method bytecode encoding and label resolution.
//!
//! A [`MethodAssembler`] is created by
//! [`ModuleBuilder::define_method`](crate::module::ModuleBuilder::define_method)
//! and consumed by
//! [`ModuleBuilder::finish_method`](crate::module::ModuleBuilder::finish_method).
//! Each emitting call validates its operands up front and appends the
//! instruction's encoded bytes; a validation failure writes nothing.
//!
//! Operand addresses are rewritten during encoding: a global reference is
//! swapped for a per-method dedup index into the referenced-globals table,
//! and a field-path payload for an index into the referenced-offsets table.
//! The module-level ids are recovered from those tables at load time, which
//! keeps the per-instruction encoding small and method bodies
//! position-independent.
//!
//! Branch targets are labels. A label may be branched to before it is
//! bound; every branch site records the placeholder position and
//! [`finish`](MethodAssembler::finish) back-patches all of them once the
//! bound offsets are known.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use ingot_core::operand::{AccessMode, Operand, OperandKind, PathKind, Stack};
use ingot_core::{
    AssembleError, INVALID_INDEX, LabelId, MetaId, MethodId, NameId, OffsetId, RawId, SignatureId,
    TypeId, lang,
};

use crate::opcode::Opcode;
use crate::symbols::SymbolTable;
use crate::writer::RelocWriter;

/// Everything a finished method hands back to the module builder.
#[derive(Debug)]
pub(crate) struct MethodParts {
    pub method: MethodId,
    pub signature: SignatureId,
    pub code: Vec<u8>,
    /// Branch-target offsets, ascending.
    pub labels: Vec<usize>,
    pub locals: Vec<TypeId>,
    pub calls: Vec<MethodId>,
    pub globals: Vec<NameId>,
    pub offsets: Vec<OffsetId>,
    pub meta: MetaId,
    pub line: u32,
}

/// One-shot bytecode encoder for a single method body.
#[derive(Debug)]
pub struct MethodAssembler {
    method: MethodId,
    signature: SignatureId,
    has_return: bool,
    param_count: u32,
    locals: Vec<TypeId>,
    code: RelocWriter,

    // Per-method dedup tables, in first-use order.
    calls: Vec<MethodId>,
    call_lookup: FxHashMap<MethodId, u32>,
    globals: Vec<NameId>,
    global_lookup: FxHashMap<NameId, u32>,
    offsets: Vec<OffsetId>,
    offset_lookup: FxHashMap<OffsetId, u32>,

    // Label protocol state.
    named_labels: SymbolTable<u32, LabelId>,
    /// Per declared label: the named-label table key, or the invalid index
    /// for anonymous labels.
    label_decls: Vec<u32>,
    label_offsets: FxHashMap<LabelId, usize>,
    pending_branches: FxHashMap<LabelId, Vec<usize>>,

    /// Code offset just past the most recent return instruction.
    last_return: usize,

    meta: MetaId,
    line: u32,
}

impl MethodAssembler {
    pub(crate) fn new(
        method: MethodId,
        signature: SignatureId,
        return_type: TypeId,
        param_count: u32,
        meta: MetaId,
        line: u32,
    ) -> Self {
        Self {
            method,
            signature,
            has_return: return_type != TypeId::VOID,
            param_count,
            locals: Vec::new(),
            code: RelocWriter::new(),
            calls: Vec::new(),
            call_lookup: FxHashMap::default(),
            globals: Vec::new(),
            global_lookup: FxHashMap::default(),
            offsets: Vec::new(),
            offset_lookup: FxHashMap::default(),
            named_labels: SymbolTable::new(),
            label_decls: Vec::new(),
            label_offsets: FxHashMap::default(),
            pending_branches: FxHashMap::default(),
            last_return: usize::MAX,
            meta,
            line,
        }
    }

    /// The method under construction.
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// The method's signature.
    pub fn signature(&self) -> SignatureId {
        self.signature
    }

    /// Bytes of bytecode emitted so far.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Declare a local variable; slots are numbered in declaration order.
    pub fn push_local(&mut self, ty: TypeId) -> Stack {
        let slot = Stack(self.locals.len() as u32);
        self.locals.push(ty);
        slot
    }

    /// Declare several locals at once; returns the first slot.
    pub fn push_locals(&mut self, types: impl IntoIterator<Item = TypeId>) -> Stack {
        let first = Stack(self.locals.len() as u32);
        self.locals.extend(types);
        first
    }

    // ---- operand validation ----------------------------------------------

    fn validate_dst(&self, op: Operand) -> Result<(), AssembleError> {
        let header = op.header();
        match header.kind() {
            OperandKind::Stack => {
                let index = header.index();
                if index != ingot_core::operand::Header::INDEX_MAX
                    && index as usize >= self.locals.len()
                {
                    return Err(AssembleError::StackSlotOutOfRange {
                        index,
                        declared: self.locals.len(),
                    });
                }
            }
            OperandKind::Param => {
                let index = header.index();
                if index >= self.param_count {
                    return Err(AssembleError::ParamOutOfRange {
                        index,
                        count: self.param_count as usize,
                    });
                }
            }
            OperandKind::Global => {}
            OperandKind::Const => return Err(AssembleError::ConstantDestination),
        }
        Ok(())
    }

    fn validate_src(&self, op: Operand) -> Result<(), AssembleError> {
        let header = op.header();
        if header.kind() != OperandKind::Const {
            return self.validate_dst(op);
        }
        if header.access() != AccessMode::Direct || header.path() != PathKind::None {
            return Err(AssembleError::ModifiedConstant);
        }
        let ty = TypeId::new(header.index());
        if !ty.is_scalar() {
            return Err(AssembleError::UnencodableConstant { ty });
        }
        Ok(())
    }

    fn check_label(&self, label: LabelId) -> Result<(), AssembleError> {
        if label.index() as usize >= self.label_decls.len() {
            return Err(AssembleError::UndeclaredLabel { label });
        }
        Ok(())
    }

    // ---- operand encoding ------------------------------------------------

    fn dedup_global(&mut self, name: NameId) -> u32 {
        if let Some(&index) = self.global_lookup.get(&name) {
            return index;
        }
        let index = self.globals.len() as u32;
        self.globals.push(name);
        self.global_lookup.insert(name, index);
        index
    }

    fn dedup_offset(&mut self, offset: OffsetId) -> u32 {
        if let Some(&index) = self.offset_lookup.get(&offset) {
            return index;
        }
        let index = self.offsets.len() as u32;
        self.offsets.push(offset);
        self.offset_lookup.insert(offset, index);
        index
    }

    fn dedup_call(&mut self, callee: MethodId) -> u32 {
        if let Some(&index) = self.call_lookup.get(&callee) {
            return index;
        }
        let index = self.calls.len() as u32;
        self.calls.push(callee);
        self.call_lookup.insert(callee, index);
        index
    }

    /// Encode a non-constant operand: rewritten header plus pointer-width
    /// path data.
    fn encode_address(&mut self, op: Operand) {
        let mut header = op.header();
        if header.kind() == OperandKind::Global {
            let index = self.dedup_global(NameId::new(header.index()));
            header.set_index(index);
        }
        let data = match header.path() {
            PathKind::None => 0,
            PathKind::DirectField | PathKind::IndirectField => {
                self.dedup_offset(op.payload().as_field()) as usize
            }
            PathKind::ByteOffset => op.payload().as_offset() as usize,
        };
        self.code.write_u32(header.raw());
        self.code.write_usize(data);
    }

    /// Encode a source operand: an inline constant writes its header plus
    /// a payload sized to its type; anything else encodes as an address.
    fn encode_operand(&mut self, op: Operand) {
        let header = op.header();
        if header.kind() != OperandKind::Const {
            self.encode_address(op);
            return;
        }
        self.code.write_u32(header.raw());
        let bits = op.payload().bits();
        match TypeId::new(header.index()) {
            TypeId::I8 | TypeId::U8 => self.code.write_u8(bits as u8),
            TypeId::I16 | TypeId::U16 => self.code.write_u16(bits as u16),
            TypeId::I32 | TypeId::U32 | TypeId::F32 => self.code.write_u32(bits as u32),
            TypeId::I64 | TypeId::U64 | TypeId::F64 => self.code.write_u64(bits),
            _ => self.code.write_usize(bits as usize),
        }
    }

    // ---- instruction emitters --------------------------------------------

    fn binary(
        &mut self,
        op: Opcode,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        let dst = dst.into();
        let src = src.into();
        self.validate_dst(dst)?;
        self.validate_src(src)?;
        self.code.write_u8(op.into());
        self.code.write_u8(0);
        self.encode_address(dst);
        self.encode_operand(src);
        Ok(())
    }

    /// Emit a no-op.
    pub fn noop(&mut self) {
        self.code.write_u8(Opcode::Noop.into());
    }

    /// Copy `src` into `dst`.
    pub fn set(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Set, dst, src)
    }

    /// Copy `src` into `dst` with numeric conversion.
    pub fn conv(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Conv, dst, src)
    }

    /// `dst = !src` (bitwise complement).
    pub fn not(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriNot, dst, src)
    }

    /// `dst = -src`.
    pub fn neg(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriNeg, dst, src)
    }

    /// `dst *= src`.
    pub fn mul(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriMul, dst, src)
    }

    /// `dst /= src`.
    pub fn div(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriDiv, dst, src)
    }

    /// `dst %= src`.
    pub fn rem(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriMod, dst, src)
    }

    /// `dst += src`.
    pub fn add(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriAdd, dst, src)
    }

    /// `dst -= src`.
    pub fn sub(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriSub, dst, src)
    }

    /// `dst <<= src`.
    pub fn shl(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriLsh, dst, src)
    }

    /// `dst >>= src`.
    pub fn shr(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriRsh, dst, src)
    }

    /// `dst &= src`.
    pub fn and(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriAnd, dst, src)
    }

    /// `dst ^= src`.
    pub fn xor(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriXor, dst, src)
    }

    /// `dst |= src`.
    pub fn or(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::AriOr, dst, src)
    }

    /// Advance the pointer in `dst` by `src` bytes.
    pub fn padd(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::PAdd, dst, src)
    }

    /// Rewind the pointer in `dst` by `src` bytes.
    pub fn psub(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::PSub, dst, src)
    }

    /// `dst = dst - src` as a byte distance between two pointers.
    ///
    /// Unlike the other two-operand forms this one carries no subcode byte.
    pub fn pdif(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        let dst = dst.into();
        let src = src.into();
        self.validate_dst(dst)?;
        self.validate_src(src)?;
        self.code.write_u8(Opcode::PDif.into());
        self.encode_address(dst);
        self.encode_operand(src);
        Ok(())
    }

    /// Three-way comparison of `dst` against `src`.
    pub fn cmp(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Cmp, dst, src)
    }

    /// `dst = (dst == src)`.
    pub fn ceq(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Ceq, dst, src)
    }

    /// `dst = (dst != src)`.
    pub fn cne(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Cne, dst, src)
    }

    /// `dst = (dst > src)`.
    pub fn cgt(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Cgt, dst, src)
    }

    /// `dst = (dst >= src)`.
    pub fn cge(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Cge, dst, src)
    }

    /// `dst = (dst < src)`.
    pub fn clt(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Clt, dst, src)
    }

    /// `dst = (dst <= src)`.
    pub fn cle(
        &mut self,
        dst: impl Into<Operand>,
        src: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.binary(Opcode::Cle, dst, src)
    }

    fn unary_test(&mut self, op: Opcode, dst: impl Into<Operand>) -> Result<(), AssembleError> {
        let dst = dst.into();
        self.validate_dst(dst)?;
        self.code.write_u8(op.into());
        self.code.write_u8(0);
        self.encode_address(dst);
        Ok(())
    }

    /// `dst = (dst == 0)`.
    pub fn cze(&mut self, dst: impl Into<Operand>) -> Result<(), AssembleError> {
        self.unary_test(Opcode::Cze, dst)
    }

    /// `dst = (dst != 0)`.
    pub fn cnz(&mut self, dst: impl Into<Operand>) -> Result<(), AssembleError> {
        self.unary_test(Opcode::Cnz, dst)
    }

    // ---- labels and branches ---------------------------------------------

    /// Declare an anonymous label, usable by branches before it is bound.
    pub fn declare_label(&mut self) -> LabelId {
        let label = LabelId::new(self.label_decls.len() as u32);
        self.label_decls.push(INVALID_INDEX);
        label
    }

    /// Declare a named label. Re-declaring an existing name returns the
    /// same label.
    pub fn declare_named_label(&mut self, name: &str) -> Result<LabelId, AssembleError> {
        if !lang::is_valid_identifier(name) {
            return Err(AssembleError::InvalidIdentifier {
                name: name.to_owned(),
            });
        }
        if let Some((_, &label)) = self.named_labels.by_name(name) {
            return Ok(label);
        }
        let label = LabelId::new(self.label_decls.len() as u32);
        let key = self.named_labels.emplace(name, label);
        self.label_decls.push(key.raw());
        Ok(label)
    }

    /// Bind a declared label to the current bytecode offset.
    pub fn bind_label(&mut self, label: LabelId) -> Result<(), AssembleError> {
        self.check_label(label)?;
        if self.label_offsets.contains_key(&label) {
            return Err(AssembleError::LabelBoundTwice { label });
        }
        self.label_offsets.insert(label, self.code.len());
        Ok(())
    }

    /// Record a branch site: a pointer-width placeholder patched at finish.
    fn write_branch_site(&mut self, label: LabelId) {
        let site = self.code.len();
        self.code.write_usize(0);
        self.pending_branches.entry(label).or_default().push(site);
    }

    /// Unconditional branch to `label`.
    pub fn br(&mut self, label: LabelId) -> Result<(), AssembleError> {
        self.check_label(label)?;
        self.code.write_u8(Opcode::Br.into());
        self.write_branch_site(label);
        Ok(())
    }

    fn cond_branch(
        &mut self,
        op: Opcode,
        label: LabelId,
        lhs: Operand,
        rhs: Option<Operand>,
    ) -> Result<(), AssembleError> {
        self.check_label(label)?;
        self.validate_dst(lhs)?;
        if let Some(rhs) = rhs {
            self.validate_src(rhs)?;
        }
        self.code.write_u8(op.into());
        self.write_branch_site(label);
        self.code.write_u8(0);
        self.encode_address(lhs);
        if let Some(rhs) = rhs {
            self.encode_operand(rhs);
        }
        Ok(())
    }

    /// Branch to `label` if `lhs == rhs`.
    pub fn beq(
        &mut self,
        label: LabelId,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Beq, label, lhs.into(), Some(rhs.into()))
    }

    /// Branch to `label` if `lhs != rhs`.
    pub fn bne(
        &mut self,
        label: LabelId,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Bne, label, lhs.into(), Some(rhs.into()))
    }

    /// Branch to `label` if `lhs > rhs`.
    pub fn bgt(
        &mut self,
        label: LabelId,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Bgt, label, lhs.into(), Some(rhs.into()))
    }

    /// Branch to `label` if `lhs >= rhs`.
    pub fn bge(
        &mut self,
        label: LabelId,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Bge, label, lhs.into(), Some(rhs.into()))
    }

    /// Branch to `label` if `lhs < rhs`.
    pub fn blt(
        &mut self,
        label: LabelId,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Blt, label, lhs.into(), Some(rhs.into()))
    }

    /// Branch to `label` if `lhs <= rhs`.
    pub fn ble(
        &mut self,
        label: LabelId,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Ble, label, lhs.into(), Some(rhs.into()))
    }

    /// Branch to `label` if `lhs == 0`.
    pub fn bze(&mut self, label: LabelId, lhs: impl Into<Operand>) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Bze, label, lhs.into(), None)
    }

    /// Branch to `label` if `lhs != 0`.
    pub fn bnz(&mut self, label: LabelId, lhs: impl Into<Operand>) -> Result<(), AssembleError> {
        self.cond_branch(Opcode::Bnz, label, lhs.into(), None)
    }

    /// Multi-way branch: jump to `labels[selector]`.
    pub fn switch(
        &mut self,
        selector: impl Into<Operand>,
        labels: &[LabelId],
    ) -> Result<(), AssembleError> {
        if labels.is_empty() {
            return Err(AssembleError::EmptySwitch);
        }
        let selector = selector.into();
        self.validate_dst(selector)?;
        for &label in labels {
            self.check_label(label)?;
        }
        self.code.write_u8(Opcode::Sw.into());
        self.encode_address(selector);
        self.code.write_u32(labels.len() as u32);
        for &label in labels {
            self.write_branch_site(label);
        }
        Ok(())
    }

    // ---- calls and returns -----------------------------------------------

    fn check_arg_count(count: usize) -> Result<(), AssembleError> {
        if count > lang::MAX_PARAMETER_COUNT {
            return Err(AssembleError::TooManyParameters {
                count,
                max: lang::MAX_PARAMETER_COUNT,
            });
        }
        Ok(())
    }

    fn encode_args(&mut self, args: &[Operand]) {
        self.code.write_u8(args.len() as u8);
        for &arg in args {
            self.code.write_u8(0);
            self.encode_operand(arg);
        }
    }

    /// Direct call to a method of this module. The return value, if any,
    /// lands in the caller's return-value slot.
    pub fn call(&mut self, callee: MethodId, args: &[Operand]) -> Result<(), AssembleError> {
        Self::check_arg_count(args.len())?;
        for &arg in args {
            self.validate_src(arg)?;
        }
        let index = self.dedup_call(callee);
        self.code.write_u8(Opcode::Call.into());
        self.code.write_u32(index);
        self.encode_args(args);
        Ok(())
    }

    /// Indirect call through a code pointer held in `target`.
    pub fn call_indirect(
        &mut self,
        target: impl Into<Operand>,
        args: &[Operand],
    ) -> Result<(), AssembleError> {
        Self::check_arg_count(args.len())?;
        let target = target.into();
        self.validate_dst(target)?;
        for &arg in args {
            self.validate_src(arg)?;
        }
        self.code.write_u8(Opcode::Callv.into());
        self.encode_address(target);
        self.encode_args(args);
        Ok(())
    }

    /// Return from a void method.
    pub fn ret(&mut self) -> Result<(), AssembleError> {
        if self.has_return {
            return Err(AssembleError::PlainReturnInValueMethod);
        }
        self.code.write_u8(Opcode::Ret.into());
        self.last_return = self.code.len();
        Ok(())
    }

    /// Return `src` from a value-returning method.
    pub fn retv(&mut self, src: impl Into<Operand>) -> Result<(), AssembleError> {
        if !self.has_return {
            return Err(AssembleError::ValueReturnInVoidMethod);
        }
        let src = src.into();
        self.validate_src(src)?;
        self.code.write_u8(Opcode::Retv.into());
        self.code.write_u8(0);
        self.encode_operand(src);
        self.last_return = self.code.len();
        Ok(())
    }

    /// Diagnostic dump of one operand.
    pub fn dump(&mut self, src: impl Into<Operand>) -> Result<(), AssembleError> {
        let src = src.into();
        self.validate_src(src)?;
        self.code.write_u8(Opcode::Dump.into());
        self.encode_operand(src);
        Ok(())
    }

    // ---- finalization ----------------------------------------------------

    /// Resolve branches and close the body.
    ///
    /// Branch sites are grouped by their label's bound offset and patched
    /// in ascending offset order. A bound offset sitting at the current end
    /// of the bytecode gets a synthesized `ret` in a void method; in a
    /// value-returning method a trailing unreached target is an error, as
    /// is a body whose last instruction is not a return.
    pub(crate) fn finish(mut self) -> Result<MethodParts, AssembleError> {
        if self.has_return && self.last_return != self.code.len() {
            return Err(AssembleError::MissingReturn);
        }

        // Multiple labels may alias one offset; group sites by offset.
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (label, sites) in self.pending_branches.drain() {
            let offset = *self
                .label_offsets
                .get(&label)
                .ok_or(AssembleError::UnboundLabel { label })?;
            groups.entry(offset).or_default().extend(sites);
        }

        let mut labels = Vec::with_capacity(groups.len());
        for (offset, sites) in groups {
            if offset >= self.code.len() {
                if self.has_return {
                    return Err(AssembleError::MissingReturn);
                }
                // A target at the very end of a void body: synthesize the
                // return the front-end branched to.
                self.code.write_u8(Opcode::Ret.into());
            }
            for site in sites {
                self.code.patch_usize(site, offset);
            }
            labels.push(offset);
        }

        Ok(MethodParts {
            method: self.method,
            signature: self.signature,
            code: self.code.finalize(0),
            labels,
            locals: self.locals,
            calls: self.calls,
            globals: self.globals,
            offsets: self.offsets,
            meta: self.meta,
            line: self.line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingot_core::operand::{ConstValue, GlobalVar, Param};

    const PTR: usize = std::mem::size_of::<usize>();

    fn void_method() -> MethodAssembler {
        MethodAssembler::new(
            MethodId::new(0),
            SignatureId::new(0),
            TypeId::VOID,
            2,
            MetaId::INVALID,
            0,
        )
    }

    fn int_method() -> MethodAssembler {
        MethodAssembler::new(
            MethodId::new(0),
            SignatureId::new(0),
            TypeId::I32,
            2,
            MetaId::INVALID,
            0,
        )
    }

    fn read_usize(bytes: &[u8], at: usize) -> usize {
        usize::from_ne_bytes(bytes[at..at + PTR].try_into().unwrap())
    }

    #[test]
    fn stack_slot_bounds() {
        let mut m = void_method();
        let a = m.push_local(TypeId::I32);
        assert_eq!(a, Stack(0));

        // Index one past the declared locals fails; one less succeeds.
        assert!(matches!(
            m.set(Stack(1), ConstValue::I32(0)),
            Err(AssembleError::StackSlotOutOfRange { index: 1, declared: 1 })
        ));
        assert!(m.set(Stack(0), ConstValue::I32(0)).is_ok());
        // The return-value sentinel always passes.
        assert!(m.set(Stack::RETVAL, ConstValue::I32(0)).is_ok());
    }

    #[test]
    fn param_bounds() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        assert!(m.set(Stack(0), Param(1)).is_ok());
        assert!(matches!(
            m.set(Stack(0), Param(2)),
            Err(AssembleError::ParamOutOfRange { index: 2, count: 2 })
        ));
        assert!(matches!(
            m.set(Param(2), ConstValue::I32(0)),
            Err(AssembleError::ParamOutOfRange { .. })
        ));
    }

    #[test]
    fn constant_cannot_be_destination() {
        let mut m = void_method();
        assert!(matches!(
            m.set(ConstValue::I32(1), ConstValue::I32(2)),
            Err(AssembleError::ConstantDestination)
        ));
    }

    #[test]
    fn modified_constants_rejected() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        // A constant operand must be direct with no path.
        let bad = Operand::from_parts(
            ingot_core::operand::Header::new(
                OperandKind::Const,
                AccessMode::Deref,
                PathKind::None,
                TypeId::I32.index(),
            ),
            ingot_core::operand::Payload::ZERO,
        );
        assert!(matches!(
            m.set(Stack(0), bad),
            Err(AssembleError::ModifiedConstant)
        ));
    }

    #[test]
    fn void_constant_rejected_as_source() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        assert!(matches!(
            m.set(Stack(0), ConstValue::GlobalRef(NameId::new(0))),
            Err(AssembleError::UnencodableConstant { ty: TypeId::VOID })
        ));
    }

    #[test]
    fn failed_emit_writes_nothing() {
        let mut m = void_method();
        let before = m.code_len();
        assert!(m.set(Stack(3), ConstValue::I32(0)).is_err());
        assert_eq!(m.code_len(), before);
    }

    #[test]
    fn binary_op_layout() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        m.add(Stack(0), ConstValue::I32(7)).unwrap();

        let parts = m.finish().unwrap();
        let code = &parts.code;
        assert_eq!(code[0], u8::from(Opcode::AriAdd));
        assert_eq!(code[1], 0);
        // dst address: header u32 + usize path data.
        let dst = u32::from_ne_bytes(code[2..6].try_into().unwrap());
        assert_eq!(
            dst,
            ingot_core::operand::Header::new(
                OperandKind::Stack,
                AccessMode::Direct,
                PathKind::None,
                0
            )
            .raw()
        );
        assert_eq!(read_usize(code, 6), 0);
        // src constant: header u32 + 4-byte payload.
        let src = u32::from_ne_bytes(code[6 + PTR..10 + PTR].try_into().unwrap());
        assert_eq!(
            src,
            ingot_core::operand::Header::constant(TypeId::I32).raw()
        );
        assert_eq!(
            u32::from_ne_bytes(code[10 + PTR..14 + PTR].try_into().unwrap()),
            7
        );
        assert_eq!(code.len(), 14 + PTR);
    }

    #[test]
    fn constant_payload_width_follows_type() {
        let mut m = void_method();
        m.push_local(TypeId::I64);
        let base = 2 + 4 + PTR; // opcode + subcode + dst header + dst data

        m.set(Stack(0), ConstValue::U8(0xFF)).unwrap();
        m.set(Stack(0), ConstValue::I16(-2)).unwrap();
        m.set(Stack(0), ConstValue::F64(1.0)).unwrap();
        m.set(Stack(0), ConstValue::NULL_PTR).unwrap();

        let parts = m.finish().unwrap();
        let sizes = [base + 4 + 1, base + 4 + 2, base + 4 + 8, base + 4 + PTR];
        assert_eq!(parts.code.len(), sizes.iter().sum::<usize>());
    }

    #[test]
    fn global_operand_rewritten_to_dedup_index() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        let counter = GlobalVar(NameId::new(40));
        let other = GlobalVar(NameId::new(17));

        m.set(counter, ConstValue::I32(1)).unwrap();
        m.set(other, ConstValue::I32(2)).unwrap();
        m.set(counter, ConstValue::I32(3)).unwrap();

        let parts = m.finish().unwrap();
        // First-use order, deduplicated.
        assert_eq!(parts.globals, [NameId::new(40), NameId::new(17)]);

        // Each instruction's dst header carries the local index, not the
        // name id.
        let insn = 2 + 4 + PTR + 4 + 4;
        for (i, expected) in [(0usize, 0u32), (1, 1), (2, 0)] {
            let at = i * insn + 2;
            let header = ingot_core::operand::Header::from_raw(u32::from_ne_bytes(
                parts.code[at..at + 4].try_into().unwrap(),
            ));
            assert_eq!(header.kind(), OperandKind::Global);
            assert_eq!(header.index(), expected);
        }
    }

    #[test]
    fn field_path_rewritten_to_offset_table() {
        let mut m = void_method();
        m.push_local(TypeId::VPTR);
        let path = OffsetId::new(9);

        m.set(Stack(0).deref_field(path).deref(), ConstValue::I32(0))
            .unwrap();

        let parts = m.finish().unwrap();
        assert_eq!(parts.offsets, [OffsetId::new(9)]);
        // Path data holds the dedup index.
        assert_eq!(read_usize(&parts.code, 6), 0);
    }

    #[test]
    fn byte_offset_path_is_inline() {
        let mut m = void_method();
        m.push_local(TypeId::VPTR);
        m.set(Stack(0).at(-8).deref(), ConstValue::I32(0)).unwrap();

        let parts = m.finish().unwrap();
        assert!(parts.offsets.is_empty());
        assert_eq!(read_usize(&parts.code, 6) as isize, -8);
    }

    #[test]
    fn forward_branch_patched_to_bind_offset() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        let end = m.declare_label();

        m.bze(end, Stack(0)).unwrap();
        m.set(Stack(0), ConstValue::I32(1)).unwrap();
        let bound_at = m.code_len();
        m.bind_label(end).unwrap();
        m.ret().unwrap();

        let parts = m.finish().unwrap();
        // Placeholder right after the opcode byte.
        assert_eq!(read_usize(&parts.code, 1), bound_at);
        assert_eq!(parts.labels, [bound_at]);
    }

    #[test]
    fn backward_branch() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        let top = m.declare_label();
        m.bind_label(top).unwrap();
        m.add(Stack(0), ConstValue::I32(1)).unwrap();
        m.br(top).unwrap();
        m.ret().unwrap();

        let parts = m.finish().unwrap();
        let insn = 2 + 4 + PTR + 4 + 4;
        assert_eq!(read_usize(&parts.code, insn + 1), 0);
        assert_eq!(parts.labels, [0]);
    }

    #[test]
    fn label_protocol_errors() {
        let mut m = void_method();
        let label = m.declare_label();
        assert!(matches!(
            m.bind_label(LabelId::new(5)),
            Err(AssembleError::UndeclaredLabel { .. })
        ));
        assert!(matches!(
            m.br(LabelId::new(5)),
            Err(AssembleError::UndeclaredLabel { .. })
        ));
        m.bind_label(label).unwrap();
        assert!(matches!(
            m.bind_label(label),
            Err(AssembleError::LabelBoundTwice { .. })
        ));
    }

    #[test]
    fn branch_to_never_bound_label_fails_finish() {
        let mut m = void_method();
        let label = m.declare_label();
        m.br(label).unwrap();
        assert!(matches!(
            m.finish(),
            Err(AssembleError::UnboundLabel { .. })
        ));
    }

    #[test]
    fn named_labels_dedup_by_name() {
        let mut m = void_method();
        let a = m.declare_named_label("loop_top").unwrap();
        let b = m.declare_named_label("loop_top").unwrap();
        assert_eq!(a, b);
        let c = m.declare_named_label("loop_end").unwrap();
        assert_ne!(a, c);
        assert!(matches!(
            m.declare_named_label("1bad"),
            Err(AssembleError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn trailing_label_synthesizes_ret_in_void_method() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        let end = m.declare_label();
        m.bze(end, Stack(0)).unwrap();
        m.set(Stack(0), ConstValue::I32(1)).unwrap();
        m.bind_label(end).unwrap();
        // No explicit ret; the trailing target gets one.

        let expected = 1 + PTR + 1 + 4 + PTR + 2 + 4 + PTR + 4 + 4;
        let parts = m.finish().unwrap();
        assert_eq!(parts.code.len(), expected + 1);
        assert_eq!(parts.code[expected], u8::from(Opcode::Ret));
        assert_eq!(read_usize(&parts.code, 1), expected);
        assert_eq!(parts.labels, [expected]);
    }

    #[test]
    fn trailing_label_fails_in_value_method() {
        let mut m = int_method();
        m.push_local(TypeId::I32);
        let end = m.declare_label();
        m.bze(end, Stack(0)).unwrap();
        m.retv(Stack(0)).unwrap();
        m.bind_label(end).unwrap();
        assert!(matches!(m.finish(), Err(AssembleError::MissingReturn)));
    }

    #[test]
    fn return_contract() {
        let mut m = int_method();
        assert!(matches!(
            m.ret(),
            Err(AssembleError::PlainReturnInValueMethod)
        ));
        assert!(matches!(m.finish(), Err(AssembleError::MissingReturn)));

        let mut m = void_method();
        assert!(matches!(
            m.retv(ConstValue::I32(0)),
            Err(AssembleError::ValueReturnInVoidMethod)
        ));
        // A void method need not end in a return.
        assert!(m.finish().is_ok());
    }

    #[test]
    fn value_method_must_end_with_return() {
        let mut m = int_method();
        m.push_local(TypeId::I32);
        m.retv(Stack(0)).unwrap();
        m.set(Stack(0), ConstValue::I32(1)).unwrap();
        // Return is no longer the last instruction.
        assert!(matches!(m.finish(), Err(AssembleError::MissingReturn)));
    }

    #[test]
    fn calls_dedup_callees() {
        let mut m = void_method();
        let f = MethodId::new(3);
        let g = MethodId::new(8);
        m.call(f, &[ConstValue::I32(1).into()]).unwrap();
        m.call(g, &[]).unwrap();
        m.call(f, &[]).unwrap();

        let parts = m.finish().unwrap();
        assert_eq!(parts.calls, [f, g]);
        // Third call encodes callee index 0.
        let first = 1 + 4 + 1 + 1 + 4 + 4;
        let second = 1 + 4 + 1;
        let at = first + second + 1;
        assert_eq!(
            u32::from_ne_bytes(parts.code[at..at + 4].try_into().unwrap()),
            0
        );
    }

    #[test]
    fn call_arg_cap() {
        let mut m = void_method();
        let args: Vec<Operand> = (0..257).map(|_| ConstValue::I32(0).into()).collect();
        assert!(matches!(
            m.call(MethodId::new(0), &args),
            Err(AssembleError::TooManyParameters { count: 257, .. })
        ));
        assert!(m.call(MethodId::new(0), &args[..256]).is_ok());
    }

    #[test]
    fn switch_rejects_empty_label_list() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        assert!(matches!(
            m.switch(Stack(0), &[]),
            Err(AssembleError::EmptySwitch)
        ));
    }

    #[test]
    fn switch_patches_every_arm() {
        let mut m = void_method();
        m.push_local(TypeId::I32);
        let a = m.declare_label();
        let b = m.declare_label();

        m.switch(Stack(0), &[a, b, a]).unwrap();
        let at_a = m.code_len();
        m.bind_label(a).unwrap();
        m.noop();
        let at_b = m.code_len();
        m.bind_label(b).unwrap();
        m.ret().unwrap();

        let parts = m.finish().unwrap();
        let arms = 1 + 4 + PTR + 4;
        assert_eq!(read_usize(&parts.code, arms), at_a);
        assert_eq!(read_usize(&parts.code, arms + PTR), at_b);
        assert_eq!(read_usize(&parts.code, arms + 2 * PTR), at_a);
        // Two distinct target offsets, ascending.
        assert_eq!(parts.labels, [at_a, at_b]);
    }

    #[test]
    fn aliased_labels_share_one_exported_offset() {
        let mut m = void_method();
        let first = m.declare_label();
        let second = m.declare_label();
        m.br(first).unwrap();
        m.br(second).unwrap();
        m.bind_label(first).unwrap();
        m.bind_label(second).unwrap();
        m.ret().unwrap();

        let target = 2 * (1 + PTR);
        let parts = m.finish().unwrap();
        assert_eq!(read_usize(&parts.code, 1), target);
        assert_eq!(read_usize(&parts.code, 1 + PTR + 1), target);
        assert_eq!(parts.labels, [target]);
    }
}
