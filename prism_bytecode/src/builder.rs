//! Code builder for assembling method bodies.
//!
//! The `CodeBuilder` emits instructions in their binary encoding, resolves
//! forward branches through labels, lays switch and array payloads out after
//! the code, and builds the exception table.
//!
//! # Example
//! ```
//! use prism_bytecode::{CodeBuilder, IfCond};
//!
//! let mut b = CodeBuilder::new(2);
//! let done = b.create_label();
//! b.if_testz(IfCond::Eq, 0, done);
//! b.const4(1, 1);
//! b.bind_label(done);
//! b.return_void();
//! let code = b.finish().unwrap();
//! assert_eq!(code.insns_size_in_code_units(), 4);
//! ```

use super::code_item::{CatchHandlerList, CodeItem, TryItem, TypeAddrPair};
use super::instruction::{
    DecodeError, Opcode, FILL_ARRAY_DATA_SIGNATURE, PACKED_SWITCH_SIGNATURE,
    SPARSE_SWITCH_SIGNATURE,
};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// A label for branch targets, switch cases and try boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Error produced when finishing a code item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A label was referenced but never bound.
    #[error("label {0:?} is never bound")]
    UnboundLabel(Label),

    /// A branch offset does not fit the chosen instruction width.
    #[error("branch at {dex_pc:#x} to offset {offset} does not fit {opcode}")]
    BranchTooFar {
        dex_pc: u32,
        offset: i64,
        opcode: &'static str,
    },

    /// A try range is empty, inverted, or longer than 65535 units.
    #[error("invalid try range {start:#x}..{end:#x}")]
    InvalidTryRange { start: u32, end: u32 },

    /// The assembled code item is malformed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Comparison used by `if-*` and `if-*z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl IfCond {
    const fn two_reg(self) -> Opcode {
        match self {
            IfCond::Eq => Opcode::IfEq,
            IfCond::Ne => Opcode::IfNe,
            IfCond::Lt => Opcode::IfLt,
            IfCond::Ge => Opcode::IfGe,
            IfCond::Gt => Opcode::IfGt,
            IfCond::Le => Opcode::IfLe,
        }
    }

    const fn against_zero(self) -> Opcode {
        match self {
            IfCond::Eq => Opcode::IfEqz,
            IfCond::Ne => Opcode::IfNez,
            IfCond::Lt => Opcode::IfLtz,
            IfCond::Ge => Opcode::IfGez,
            IfCond::Gt => Opcode::IfGtz,
            IfCond::Le => Opcode::IfLez,
        }
    }
}

/// Dispatch flavour of an invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
    /// Virtual call through a vtable index instead of a method reference.
    VirtualQuick,
}

impl InvokeKind {
    const fn opcode(self, range: bool) -> Opcode {
        match (self, range) {
            (InvokeKind::Virtual, false) => Opcode::InvokeVirtual,
            (InvokeKind::Super, false) => Opcode::InvokeSuper,
            (InvokeKind::Direct, false) => Opcode::InvokeDirect,
            (InvokeKind::Static, false) => Opcode::InvokeStatic,
            (InvokeKind::Interface, false) => Opcode::InvokeInterface,
            (InvokeKind::VirtualQuick, false) => Opcode::InvokeVirtualQuick,
            (InvokeKind::Virtual, true) => Opcode::InvokeVirtualRange,
            (InvokeKind::Super, true) => Opcode::InvokeSuperRange,
            (InvokeKind::Direct, true) => Opcode::InvokeDirectRange,
            (InvokeKind::Static, true) => Opcode::InvokeStaticRange,
            (InvokeKind::Interface, true) => Opcode::InvokeInterfaceRange,
            (InvokeKind::VirtualQuick, true) => Opcode::InvokeVirtualRangeQuick,
        }
    }
}

/// How a pending branch must be patched.
#[derive(Debug, Clone, Copy)]
enum BranchWidth {
    /// Signed byte in the high byte of unit 0.
    Byte,
    /// Signed 16-bit value in unit 1.
    Short,
    /// Signed 32-bit value in units 1..3.
    Word,
}

#[derive(Debug)]
struct BranchFixup {
    dex_pc: u32,
    width: BranchWidth,
    label: Label,
}

#[derive(Debug)]
enum PayloadData {
    Packed { first_key: i32, targets: Vec<Label> },
    Sparse { cases: Vec<(i32, Label)> },
    FillArray { element_width: u16, data: Vec<u8> },
}

#[derive(Debug)]
struct PendingPayload {
    /// Address of the instruction that references the payload.
    owner: u32,
    data: PayloadData,
}

#[derive(Debug)]
struct PendingTry {
    start: Label,
    end: Label,
    typed: Vec<(u32, Label)>,
    catch_all: Option<Label>,
}

/// Builder for [`CodeItem`]s.
#[derive(Debug)]
pub struct CodeBuilder {
    insns: Vec<u16>,
    registers_size: u16,
    ins_size: u16,
    outs_size: u16,
    next_label: u32,
    labels: FxHashMap<Label, u32>,
    branches: Vec<BranchFixup>,
    payloads: Vec<PendingPayload>,
    tries: Vec<PendingTry>,
}

impl CodeBuilder {
    /// Create a builder for a method using `registers_size` registers.
    pub fn new(registers_size: u16) -> Self {
        Self {
            insns: Vec::new(),
            registers_size,
            ins_size: 0,
            outs_size: 0,
            next_label: 0,
            labels: FxHashMap::default(),
            branches: Vec::new(),
            payloads: Vec::new(),
            tries: Vec::new(),
        }
    }

    /// Set the number of incoming argument registers.
    pub fn set_ins_size(&mut self, ins_size: u16) {
        self.ins_size = ins_size;
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Create a new, unbound label.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label to the current position.
    pub fn bind_label(&mut self, label: Label) {
        let pc = self.current_pc();
        self.labels.insert(label, pc);
    }

    /// Address of the next emitted instruction.
    #[inline]
    pub fn current_pc(&self) -> u32 {
        self.insns.len() as u32
    }

    // =========================================================================
    // Instruction Emission
    // =========================================================================

    /// Emit raw code units.
    pub fn emit_units(&mut self, units: &[u16]) {
        self.insns.extend_from_slice(units);
    }

    #[inline]
    fn unit0(op: Opcode, high: u16) -> u16 {
        (high << 8) | op as u16
    }

    #[inline]
    fn nibbles(op: Opcode, a: u8, b: u8) -> u16 {
        Self::unit0(op, (((b & 0xf) as u16) << 4) | (a & 0xf) as u16)
    }

    /// `nop`
    pub fn nop(&mut self) {
        self.insns.push(Opcode::Nop as u16);
    }

    /// `count` consecutive `nop`s.
    pub fn nops(&mut self, count: usize) {
        self.insns.extend(std::iter::repeat(Opcode::Nop as u16).take(count));
    }

    /// `const/4 vA, #value` with `value` in `-8..=7`.
    pub fn const4(&mut self, dst: u8, value: i8) {
        self.insns.push(Self::nibbles(Opcode::Const4, dst, value as u8));
    }

    /// `const/16 vAA, #value`
    pub fn const16(&mut self, dst: u8, value: i16) {
        self.insns
            .extend_from_slice(&[Self::unit0(Opcode::Const16, dst as u16), value as u16]);
    }

    /// `move vA, vB`
    pub fn move_reg(&mut self, dst: u8, src: u8) {
        self.insns.push(Self::nibbles(Opcode::Move, dst, src));
    }

    /// `move-result vAA`
    pub fn move_result(&mut self, dst: u8) {
        self.insns.push(Self::unit0(Opcode::MoveResult, dst as u16));
    }

    /// `move-exception vAA`
    pub fn move_exception(&mut self, dst: u8) {
        self.insns.push(Self::unit0(Opcode::MoveException, dst as u16));
    }

    /// `return-void`
    pub fn return_void(&mut self) {
        self.insns.push(Opcode::ReturnVoid as u16);
    }

    /// `return vAA`
    pub fn return_value(&mut self, src: u8) {
        self.insns.push(Self::unit0(Opcode::Return, src as u16));
    }

    /// `throw vAA`
    pub fn throw(&mut self, src: u8) {
        self.insns.push(Self::unit0(Opcode::Throw, src as u16));
    }

    /// `add-int vAA, vBB, vCC`
    pub fn add_int(&mut self, dst: u8, lhs: u8, rhs: u8) {
        self.insns.extend_from_slice(&[
            Self::unit0(Opcode::AddInt, dst as u16),
            ((rhs as u16) << 8) | lhs as u16,
        ]);
    }

    /// `add-int/lit8 vAA, vBB, #lit`
    pub fn add_int_lit8(&mut self, dst: u8, src: u8, lit: i8) {
        self.insns.extend_from_slice(&[
            Self::unit0(Opcode::AddIntLit8, dst as u16),
            ((lit as u8 as u16) << 8) | src as u16,
        ]);
    }

    /// `iget vA, vB, field@index`
    pub fn iget(&mut self, dst: u8, obj: u8, field_idx: u16) {
        self.insns
            .extend_from_slice(&[Self::nibbles(Opcode::Iget, dst, obj), field_idx]);
    }

    /// `new-instance vAA, type@index`
    pub fn new_instance(&mut self, dst: u8, type_idx: u16) {
        self.insns
            .extend_from_slice(&[Self::unit0(Opcode::NewInstance, dst as u16), type_idx]);
    }

    /// Invoke with up to five argument registers, each below 16.
    pub fn invoke(&mut self, kind: InvokeKind, method_idx: u16, args: &[u8]) {
        debug_assert!(args.len() <= 5, "35c invoke takes at most five registers");
        let reg = |i: usize| args.get(i).copied().unwrap_or(0) as u16 & 0xf;
        let count = args.len().min(5) as u16;
        self.insns.extend_from_slice(&[
            Self::unit0(kind.opcode(false), (count << 4) | reg(4)),
            method_idx,
            (reg(3) << 12) | (reg(2) << 8) | (reg(1) << 4) | reg(0),
        ]);
        self.outs_size = self.outs_size.max(count);
    }

    /// Invoke over a contiguous register range.
    pub fn invoke_range(&mut self, kind: InvokeKind, method_idx: u16, first: u16, count: u8) {
        self.insns.extend_from_slice(&[
            Self::unit0(kind.opcode(true), count as u16),
            method_idx,
            first,
        ]);
        self.outs_size = self.outs_size.max(count as u16);
    }

    // =========================================================================
    // Branches
    // =========================================================================

    fn branch(&mut self, units: &[u16], width: BranchWidth, label: Label) {
        self.branches.push(BranchFixup {
            dex_pc: self.current_pc(),
            width,
            label,
        });
        self.insns.extend_from_slice(units);
    }

    /// `goto` with an 8-bit offset.
    pub fn goto(&mut self, label: Label) {
        self.branch(&[Opcode::Goto as u16], BranchWidth::Byte, label);
    }

    /// `goto/16`
    pub fn goto16(&mut self, label: Label) {
        self.branch(&[Opcode::Goto16 as u16, 0], BranchWidth::Short, label);
    }

    /// `goto/32`
    pub fn goto32(&mut self, label: Label) {
        self.branch(&[Opcode::Goto32 as u16, 0, 0], BranchWidth::Word, label);
    }

    /// `if-<cond> vA, vB, label`
    pub fn if_test(&mut self, cond: IfCond, a: u8, b: u8, label: Label) {
        let unit = Self::nibbles(cond.two_reg(), a, b);
        self.branch(&[unit, 0], BranchWidth::Short, label);
    }

    /// `if-<cond>z vAA, label`
    pub fn if_testz(&mut self, cond: IfCond, a: u8, label: Label) {
        let unit = Self::unit0(cond.against_zero(), a as u16);
        self.branch(&[unit, 0], BranchWidth::Short, label);
    }

    // =========================================================================
    // Payload Instructions
    // =========================================================================

    fn payload_ref(&mut self, op: Opcode, reg: u8, data: PayloadData) {
        self.payloads.push(PendingPayload {
            owner: self.current_pc(),
            data,
        });
        self.insns
            .extend_from_slice(&[Self::unit0(op, reg as u16), 0, 0]);
    }

    /// `packed-switch vAA` over consecutive keys starting at `first_key`.
    pub fn packed_switch(&mut self, reg: u8, first_key: i32, targets: &[Label]) {
        let data = PayloadData::Packed {
            first_key,
            targets: targets.to_vec(),
        };
        self.payload_ref(Opcode::PackedSwitch, reg, data);
    }

    /// `sparse-switch vAA` over `(key, target)` pairs sorted by key.
    pub fn sparse_switch(&mut self, reg: u8, cases: &[(i32, Label)]) {
        let mut cases = cases.to_vec();
        cases.sort_by_key(|&(key, _)| key);
        self.payload_ref(Opcode::SparseSwitch, reg, PayloadData::Sparse { cases });
    }

    /// `fill-array-data vAA` with raw little-endian element bytes.
    pub fn fill_array_data(&mut self, reg: u8, element_width: u16, data: &[u8]) {
        let data = PayloadData::FillArray {
            element_width,
            data: data.to_vec(),
        };
        self.payload_ref(Opcode::FillArrayData, reg, data);
    }

    // =========================================================================
    // Exception Table
    // =========================================================================

    /// Protect `start..end` with typed handlers and an optional catch-all.
    pub fn add_try(
        &mut self,
        start: Label,
        end: Label,
        typed: &[(u32, Label)],
        catch_all: Option<Label>,
    ) {
        self.tries.push(PendingTry {
            start,
            end,
            typed: typed.to_vec(),
            catch_all,
        });
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    fn resolve(&self, label: Label) -> Result<u32, BuildError> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(BuildError::UnboundLabel(label))
    }

    fn write_i32(&mut self, at: usize, value: i32) {
        self.insns[at] = value as u32 as u16;
        self.insns[at + 1] = ((value as u32) >> 16) as u16;
    }

    fn push_i32(&mut self, value: i32) {
        self.insns.push(value as u32 as u16);
        self.insns.push(((value as u32) >> 16) as u16);
    }

    /// Lay out payloads, patch branches and build the code item.
    pub fn finish(mut self) -> Result<CodeItem, BuildError> {
        let payloads = std::mem::take(&mut self.payloads);
        for payload in &payloads {
            // Payloads are 4-byte aligned.
            if self.insns.len() % 2 == 1 {
                self.nop();
            }
            let at = self.current_pc();
            self.write_i32(payload.owner as usize + 1, at as i32 - payload.owner as i32);

            match &payload.data {
                PayloadData::Packed { first_key, targets } => {
                    self.insns
                        .extend_from_slice(&[PACKED_SWITCH_SIGNATURE, targets.len() as u16]);
                    self.push_i32(*first_key);
                    for &target in targets {
                        let rel = self.resolve(target)? as i32 - payload.owner as i32;
                        self.push_i32(rel);
                    }
                }
                PayloadData::Sparse { cases } => {
                    self.insns
                        .extend_from_slice(&[SPARSE_SWITCH_SIGNATURE, cases.len() as u16]);
                    for &(key, _) in cases {
                        self.push_i32(key);
                    }
                    for &(_, target) in cases {
                        let rel = self.resolve(target)? as i32 - payload.owner as i32;
                        self.push_i32(rel);
                    }
                }
                PayloadData::FillArray {
                    element_width,
                    data,
                } => {
                    let count = data.len() as u32 / (*element_width).max(1) as u32;
                    self.insns.extend_from_slice(&[
                        FILL_ARRAY_DATA_SIGNATURE,
                        *element_width,
                        count as u16,
                        (count >> 16) as u16,
                    ]);
                    for chunk in data.chunks(2) {
                        let lo = chunk[0] as u16;
                        let hi = chunk.get(1).copied().unwrap_or(0) as u16;
                        self.insns.push(lo | (hi << 8));
                    }
                }
            }
        }

        let branches = std::mem::take(&mut self.branches);
        for fixup in &branches {
            let target = self.resolve(fixup.label)?;
            let offset = target as i64 - fixup.dex_pc as i64;
            let at = fixup.dex_pc as usize;
            let too_far = || BuildError::BranchTooFar {
                dex_pc: fixup.dex_pc,
                offset,
                opcode: Opcode::from_u8(self.insns[at] as u8).map_or("?", Opcode::name),
            };
            match fixup.width {
                BranchWidth::Byte => {
                    let byte = i8::try_from(offset).map_err(|_| too_far())?;
                    self.insns[at] = (self.insns[at] & 0xff) | ((byte as u8 as u16) << 8);
                }
                BranchWidth::Short => {
                    let short = i16::try_from(offset).map_err(|_| too_far())?;
                    self.insns[at + 1] = short as u16;
                }
                BranchWidth::Word => {
                    let word = i32::try_from(offset).map_err(|_| too_far())?;
                    self.write_i32(at + 1, word);
                }
            }
        }

        let mut tries = Vec::with_capacity(self.tries.len());
        let mut handlers = Vec::with_capacity(self.tries.len());
        for pending in &self.tries {
            let start = self.resolve(pending.start)?;
            let end = self.resolve(pending.end)?;
            let insn_count = end
                .checked_sub(start)
                .filter(|&n| n > 0)
                .and_then(|n| u16::try_from(n).ok())
                .ok_or(BuildError::InvalidTryRange { start, end })?;

            let typed = pending
                .typed
                .iter()
                .map(|&(type_idx, label)| {
                    Ok(TypeAddrPair {
                        type_idx,
                        address: self.resolve(label)?,
                    })
                })
                .collect::<Result<Vec<_>, BuildError>>()?;
            let catch_all_addr = pending.catch_all.map(|l| self.resolve(l)).transpose()?;

            tries.push(TryItem {
                start_addr: start,
                insn_count,
                handler_index: handlers.len() as u16,
            });
            handlers.push(CatchHandlerList {
                typed: typed.into_boxed_slice(),
                catch_all_addr,
            });
        }
        tries.sort_by_key(|t| t.start_addr);

        Ok(CodeItem::new(
            self.registers_size,
            self.ins_size,
            self.outs_size,
            self.insns,
            tries,
            handlers,
        )?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::PayloadKind;

    #[test]
    fn test_forward_branch_patched() {
        let mut b = CodeBuilder::new(1);
        let target = b.create_label();
        b.nops(10);
        b.if_testz(IfCond::Eq, 0, target);
        b.nops(18);
        b.bind_label(target);
        b.return_void();
        let code = b.finish().unwrap();

        let inst = code.instruction_at(10).unwrap();
        assert_eq!(inst.opcode(), Opcode::IfEqz);
        assert_eq!(inst.target_offset(), Some(20));
    }

    #[test]
    fn test_backward_goto() {
        let mut b = CodeBuilder::new(1);
        let top = b.create_label();
        b.bind_label(top);
        b.nops(3);
        b.goto(top);
        let code = b.finish().unwrap();
        assert_eq!(code.instruction_at(3).unwrap().target_offset(), Some(-3));
    }

    #[test]
    fn test_goto_out_of_range() {
        let mut b = CodeBuilder::new(1);
        let far = b.create_label();
        b.goto(far);
        b.nops(200);
        b.bind_label(far);
        b.return_void();
        assert!(matches!(b.finish(), Err(BuildError::BranchTooFar { offset: 201, .. })));
    }

    #[test]
    fn test_unbound_label() {
        let mut b = CodeBuilder::new(1);
        let nowhere = b.create_label();
        b.goto16(nowhere);
        assert_eq!(b.finish().unwrap_err(), BuildError::UnboundLabel(nowhere));
    }

    #[test]
    fn test_packed_switch_layout() {
        let mut b = CodeBuilder::new(1);
        let (c0, c1) = (b.create_label(), b.create_label());
        b.packed_switch(0, 5, &[c0, c1]);
        b.return_void();
        b.bind_label(c0);
        b.return_void();
        b.bind_label(c1);
        b.return_void();
        let code = b.finish().unwrap();

        let switch = code.instruction_at(0).unwrap();
        // 3 + 3 returns = 6, already even.
        assert_eq!(switch.payload_offset(), Some(6));
        let payload = code.switch_payload(0, &switch).unwrap();
        assert_eq!(payload.keys.as_slice(), &[5, 6]);
        assert_eq!(payload.targets.as_slice(), &[4, 5]);

        let kinds: Vec<_> = code
            .instructions()
            .map(|r| r.unwrap().1.payload_kind())
            .collect();
        assert_eq!(kinds.last(), Some(&Some(PayloadKind::PackedSwitch)));
    }

    #[test]
    fn test_payload_alignment() {
        let mut b = CodeBuilder::new(1);
        let c0 = b.create_label();
        b.sparse_switch(0, &[(3, c0)]);
        b.bind_label(c0);
        b.return_void();
        b.return_void();
        b.return_void();
        let code = b.finish().unwrap();
        // 3 + 3 = 6 units of code, no padding needed; payload at 6.
        assert_eq!(code.instruction_at(0).unwrap().payload_offset(), Some(6));

        let mut b = CodeBuilder::new(1);
        let c0 = b.create_label();
        b.sparse_switch(0, &[(3, c0)]);
        b.bind_label(c0);
        b.return_void();
        b.return_void();
        let code = b.finish().unwrap();
        // 5 units of code, one nop of padding.
        assert_eq!(code.instruction_at(0).unwrap().payload_offset(), Some(6));
        assert_eq!(code.insns()[5], 0);
    }

    #[test]
    fn test_try_table() {
        let mut b = CodeBuilder::new(2);
        let (start, end, handler, all) = (
            b.create_label(),
            b.create_label(),
            b.create_label(),
            b.create_label(),
        );
        b.bind_label(start);
        b.invoke(InvokeKind::Static, 1, &[]);
        b.bind_label(end);
        b.return_void();
        b.bind_label(handler);
        b.move_exception(0);
        b.return_void();
        b.bind_label(all);
        b.return_void();
        b.add_try(start, end, &[(9, handler)], Some(all));
        let code = b.finish().unwrap();

        assert_eq!(code.tries().len(), 1);
        assert_eq!(code.tries()[0].insn_count, 3);
        assert_eq!(code.handler_addresses().collect::<Vec<_>>(), vec![4, 6]);
    }

    #[test]
    fn test_invalid_try_range() {
        let mut b = CodeBuilder::new(1);
        let (start, end) = (b.create_label(), b.create_label());
        b.bind_label(start);
        b.bind_label(end);
        b.return_void();
        b.add_try(start, end, &[], None);
        assert!(matches!(b.finish(), Err(BuildError::InvalidTryRange { .. })));
    }

    #[test]
    fn test_invoke_outs_size() {
        let mut b = CodeBuilder::new(4);
        b.invoke(InvokeKind::Virtual, 2, &[0, 1, 2]);
        b.invoke_range(InvokeKind::Interface, 3, 0, 4);
        b.return_void();
        let code = b.finish().unwrap();
        assert_eq!(code.outs_size(), 4);
        assert_eq!(
            code.instruction_at(3).unwrap().opcode(),
            Opcode::InvokeInterfaceRange
        );
    }
}
