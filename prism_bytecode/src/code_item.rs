//! Method bodies: the code array plus its exception table.
//!
//! A `CodeItem` is immutable once built and is shared between the
//! interpreter, the profiler and the compiler through an `Arc`.

use super::instruction::{
    DecodeError, Instruction, Opcode, PACKED_SWITCH_SIGNATURE, SPARSE_SWITCH_SIGNATURE,
};
use smallvec::SmallVec;

// =============================================================================
// Exception Table
// =============================================================================

/// A protected range of code units and the handler list that covers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryItem {
    /// First protected code unit.
    pub start_addr: u32,
    /// Number of protected code units.
    pub insn_count: u16,
    /// Index into the method's handler lists.
    pub handler_index: u16,
}

impl TryItem {
    /// Whether `dex_pc` lies inside the protected range.
    #[inline]
    pub fn covers(&self, dex_pc: u32) -> bool {
        dex_pc >= self.start_addr && dex_pc < self.start_addr + self.insn_count as u32
    }
}

/// A typed catch clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeAddrPair {
    /// Type index of the caught exception class.
    pub type_idx: u32,
    /// Handler entry address.
    pub address: u32,
}

/// Ordered catch clauses for one or more try items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchHandlerList {
    /// Typed handlers, tried in order.
    pub typed: Box<[TypeAddrPair]>,
    /// Catch-all handler, tried last.
    pub catch_all_addr: Option<u32>,
}

impl CatchHandlerList {
    /// Iterate over every handler entry address, catch-all last.
    pub fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.typed
            .iter()
            .map(|pair| pair.address)
            .chain(self.catch_all_addr)
    }
}

// =============================================================================
// Switch Payloads
// =============================================================================

/// Decoded switch table.
///
/// Targets are relative to the switch instruction, not to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPayload {
    /// Case keys, in table order.
    pub keys: SmallVec<[i32; 8]>,
    /// Relative branch offsets, parallel to `keys`.
    pub targets: SmallVec<[i32; 8]>,
}

impl SwitchPayload {
    /// Number of cases.
    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the table has no cases.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

// =============================================================================
// Code Item
// =============================================================================

/// Bytecode of a single method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeItem {
    registers_size: u16,
    ins_size: u16,
    outs_size: u16,
    insns: Box<[u16]>,
    tries: Box<[TryItem]>,
    handlers: Box<[CatchHandlerList]>,
}

impl CodeItem {
    /// Assemble a code item, validating the exception table.
    pub fn new(
        registers_size: u16,
        ins_size: u16,
        outs_size: u16,
        insns: Vec<u16>,
        tries: Vec<TryItem>,
        handlers: Vec<CatchHandlerList>,
    ) -> Result<Self, DecodeError> {
        if let Some(bad) = tries
            .iter()
            .find(|t| t.handler_index as usize >= handlers.len())
        {
            return Err(DecodeError::InvalidHandlerIndex {
                start_addr: bad.start_addr,
                handler_index: bad.handler_index,
            });
        }

        Ok(Self {
            registers_size,
            ins_size,
            outs_size,
            insns: insns.into_boxed_slice(),
            tries: tries.into_boxed_slice(),
            handlers: handlers.into_boxed_slice(),
        })
    }

    /// Code item with no exception table.
    pub fn from_insns(registers_size: u16, insns: Vec<u16>) -> Self {
        Self {
            registers_size,
            insns: insns.into_boxed_slice(),
            ..Self::default()
        }
    }

    /// Number of virtual registers.
    #[inline]
    pub fn registers_size(&self) -> u16 {
        self.registers_size
    }

    /// Number of incoming argument registers.
    #[inline]
    pub fn ins_size(&self) -> u16 {
        self.ins_size
    }

    /// Number of outgoing argument registers needed by invokes.
    #[inline]
    pub fn outs_size(&self) -> u16 {
        self.outs_size
    }

    /// Raw code units.
    #[inline]
    pub fn insns(&self) -> &[u16] {
        &self.insns
    }

    /// Code size in units.
    #[inline]
    pub fn insns_size_in_code_units(&self) -> u32 {
        self.insns.len() as u32
    }

    /// Try items, sorted by start address.
    #[inline]
    pub fn tries(&self) -> &[TryItem] {
        &self.tries
    }

    /// Handler list referenced by a try item.
    #[inline]
    pub fn handlers_for(&self, item: &TryItem) -> &CatchHandlerList {
        // Indices are validated by `new`.
        &self.handlers[item.handler_index as usize]
    }

    /// Innermost try item covering `dex_pc`.
    pub fn find_try_item(&self, dex_pc: u32) -> Option<&TryItem> {
        self.tries.iter().find(|t| t.covers(dex_pc))
    }

    /// Entry address of every handler of every try item, in table order.
    /// Handlers shared between try items are reported once per try item.
    pub fn handler_addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.tries
            .iter()
            .flat_map(move |item| self.handlers_for(item).addresses())
    }

    /// Decode the instruction at `dex_pc`.
    #[inline]
    pub fn instruction_at(&self, dex_pc: u32) -> Result<Instruction<'_>, DecodeError> {
        Instruction::decode(&self.insns, dex_pc)
    }

    /// Linear walk over the code, yielding `(dex_pc, instruction)`.
    ///
    /// Payload pseudo-instructions are yielded too. The iterator stops after
    /// the first decode error.
    pub fn instructions(&self) -> InstructionIter<'_> {
        InstructionIter {
            code: &self.insns,
            dex_pc: 0,
            failed: false,
        }
    }

    /// Decode the switch table referenced by the switch at `dex_pc`.
    pub fn switch_payload(
        &self,
        dex_pc: u32,
        inst: &Instruction<'_>,
    ) -> Result<SwitchPayload, DecodeError> {
        let (Some(offset), true) = (inst.payload_offset(), inst.opcode().is_switch()) else {
            return Err(DecodeError::InvalidPayload { dex_pc, offset: 0 });
        };
        let invalid = DecodeError::InvalidPayload { dex_pc, offset };

        let start = dex_pc as i64 + offset as i64;
        if start < 0 || start >= self.insns.len() as i64 {
            return Err(invalid);
        }
        let data = &self.insns[start as usize..];
        if data.len() < 2 {
            return Err(invalid);
        }

        let expected = match inst.opcode() {
            Opcode::PackedSwitch => PACKED_SWITCH_SIGNATURE,
            _ => SPARSE_SWITCH_SIGNATURE,
        };
        if data[0] != expected {
            return Err(invalid);
        }

        let size = data[1] as usize;
        let read_i32 = |i: usize| (data[i] as u32 | ((data[i + 1] as u32) << 16)) as i32;

        let mut payload = SwitchPayload {
            keys: SmallVec::with_capacity(size),
            targets: SmallVec::with_capacity(size),
        };

        if expected == PACKED_SWITCH_SIGNATURE {
            if data.len() < 4 + size * 2 {
                return Err(invalid);
            }
            let first_key = read_i32(2);
            for i in 0..size {
                payload.keys.push(first_key.wrapping_add(i as i32));
                payload.targets.push(read_i32(4 + i * 2));
            }
        } else {
            if data.len() < 2 + size * 4 {
                return Err(invalid);
            }
            let targets_base = 2 + size * 2;
            for i in 0..size {
                payload.keys.push(read_i32(2 + i * 2));
                payload.targets.push(read_i32(targets_base + i * 2));
            }
        }

        Ok(payload)
    }
}

/// Iterator returned by [`CodeItem::instructions`].
pub struct InstructionIter<'a> {
    code: &'a [u16],
    dex_pc: u32,
    failed: bool,
}

impl<'a> Iterator for InstructionIter<'a> {
    type Item = Result<(u32, Instruction<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.dex_pc as usize >= self.code.len() {
            return None;
        }
        match Instruction::decode(self.code, self.dex_pc) {
            Ok(inst) => {
                let pc = self.dex_pc;
                self.dex_pc += inst.size_in_code_units() as u32;
                Some(Ok((pc, inst)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_walk() {
        // const/4 v0, #0 ; if-eqz v0, +2 ; return-void ; return-void
        let code = CodeItem::from_insns(1, vec![0x0012, 0x0038, 0x0002, 0x000e, 0x000e]);
        let pcs: Vec<u32> = code.instructions().map(|r| r.unwrap().0).collect();
        assert_eq!(pcs, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_instruction_walk_stops_on_error() {
        let code = CodeItem::from_insns(1, vec![0x000e, 0x00ff, 0x000e]);
        let results: Vec<_> = code.instructions().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_invalid_handler_index() {
        let err = CodeItem::new(
            1,
            0,
            0,
            vec![0x000e],
            vec![TryItem {
                start_addr: 0,
                insn_count: 1,
                handler_index: 3,
            }],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHandlerIndex { handler_index: 3, .. }));
    }

    #[test]
    fn test_handler_addresses_include_catch_all() {
        let handlers = vec![CatchHandlerList {
            typed: vec![TypeAddrPair {
                type_idx: 7,
                address: 4,
            }]
            .into_boxed_slice(),
            catch_all_addr: Some(6),
        }];
        let tries = vec![TryItem {
            start_addr: 0,
            insn_count: 2,
            handler_index: 0,
        }];
        let code = CodeItem::new(1, 0, 0, vec![0x000e; 8], tries, handlers).unwrap();
        let addrs: Vec<u32> = code.handler_addresses().collect();
        assert_eq!(addrs, vec![4, 6]);
        assert!(code.find_try_item(1).is_some());
        assert!(code.find_try_item(2).is_none());
    }

    #[test]
    fn test_sparse_switch_payload() {
        // sparse-switch v0, +4 ; return-void ; nop ; payload(keys -1, 10; targets 3, 5)
        let insns = vec![
            0x002c, 0x0004, 0x0000, // 0: sparse-switch
            0x000e, // 3: return-void
            0x0200, 0x0002, // 4: payload header
            0xffff, 0xffff, 0x000a, 0x0000, // keys
            0x0003, 0x0000, 0x0005, 0x0000, // targets
        ];
        let code = CodeItem::from_insns(1, insns);
        let inst = code.instruction_at(0).unwrap();
        let payload = code.switch_payload(0, &inst).unwrap();
        assert_eq!(payload.keys.as_slice(), &[-1, 10]);
        assert_eq!(payload.targets.as_slice(), &[3, 5]);
    }

    #[test]
    fn test_switch_payload_wrong_signature() {
        // packed-switch pointing at a sparse payload
        let insns = vec![0x002b, 0x0004, 0x0000, 0x000e, 0x0200, 0x0000];
        let code = CodeItem::from_insns(1, insns);
        let inst = code.instruction_at(0).unwrap();
        assert!(matches!(
            code.switch_payload(0, &inst),
            Err(DecodeError::InvalidPayload { offset: 4, .. })
        ));
    }
}
