//! Instruction encoding for the register bytecode.
//!
//! Instructions are a variable number of 16-bit code units. The low byte of
//! the first unit is the opcode; the remaining bits and units carry operands
//! in one of a small set of fixed [`Format`]s.
//!
//! ```text
//!  unit 0            unit 1            unit 2
//! ┌────────┬───────┬─────────────────┬─────────────────┐
//! │ AA/B|A │  op   │ BBBB / +CCCC    │ hi half / regs  │
//! └────────┴───────┴─────────────────┴─────────────────┘
//! ```
//!
//! Switch tables and array data live out of line in *payload*
//! pseudo-instructions. A payload begins with a `nop` unit whose high byte is
//! non-zero (the signature), and its size depends on its contents, so a
//! linear scan must ask the decoder for the size of every unit it lands on.

use thiserror::Error;

// =============================================================================
// Payload Signatures
// =============================================================================

/// First unit of a packed-switch payload.
pub const PACKED_SWITCH_SIGNATURE: u16 = 0x0100;

/// First unit of a sparse-switch payload.
pub const SPARSE_SWITCH_SIGNATURE: u16 = 0x0200;

/// First unit of a fill-array-data payload.
pub const FILL_ARRAY_DATA_SIGNATURE: u16 = 0x0300;

// =============================================================================
// Errors
// =============================================================================

/// Error produced while decoding bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The instruction runs past the end of the code array.
    #[error("truncated instruction at {dex_pc:#x}: needs {needed} code units, {available} available")]
    Truncated {
        dex_pc: u32,
        needed: usize,
        available: usize,
    },

    /// The opcode byte does not name a known instruction.
    #[error("unknown opcode {opcode:#04x} at {dex_pc:#x}")]
    UnknownOpcode { dex_pc: u32, opcode: u8 },

    /// A `nop` carries a high byte that is not a payload signature.
    #[error("unknown payload signature {signature:#06x} at {dex_pc:#x}")]
    UnknownPayload { dex_pc: u32, signature: u16 },

    /// A switch refers to a payload outside the code array or of the wrong kind.
    #[error("switch at {dex_pc:#x} has invalid payload at relative offset {offset}")]
    InvalidPayload { dex_pc: u32, offset: i32 },

    /// A branch or switch target does not land inside the address space.
    #[error("branch at {dex_pc:#x} with offset {offset} leaves the method")]
    BranchOutOfRange { dex_pc: u32, offset: i32 },

    /// A branch opcode whose decoded form carries no target offset.
    #[error("branch at {dex_pc:#x} has no target offset")]
    MissingBranchTarget { dex_pc: u32 },

    /// A try item refers to a handler list that does not exist.
    #[error("try item at {start_addr:#x} refers to missing handler list {handler_index}")]
    InvalidHandlerIndex { start_addr: u32, handler_index: u16 },
}

// =============================================================================
// Formats
// =============================================================================

/// Operand layout of an instruction.
///
/// The name encodes the size in units (first digit), the number of registers
/// (second digit) and the kind of extra operand (letter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// `ØØ|op`
    F10x,
    /// `B|A|op`
    F12x,
    /// `B|A|op` with a 4-bit literal in B.
    F11n,
    /// `AA|op`
    F11x,
    /// `AA|op` with an 8-bit branch offset.
    F10t,
    /// `ØØ|op AAAA` with a 16-bit branch offset.
    F20t,
    /// `AA|op BBBB`
    F22x,
    /// `AA|op +BBBB` branch against zero.
    F21t,
    /// `AA|op #+BBBB`
    F21s,
    /// `AA|op BBBB` constant-pool index.
    F21c,
    /// `B|A|op +CCCC` two-register branch.
    F22t,
    /// `AA|op CC|BB` with an 8-bit literal.
    F22b,
    /// `B|A|op CCCC` constant-pool index.
    F22c,
    /// `AA|op CC|BB`
    F23x,
    /// `ØØ|op AAAAlo AAAAhi`
    F30t,
    /// `AA|op +BBBBlo +BBBBhi` payload reference.
    F31t,
    /// `AA|op #+BBBBlo #+BBBBhi`
    F31i,
    /// `A|G|op BBBB F|E|D|C` up to five argument registers.
    F35c,
    /// `AA|op BBBB CCCC` register range.
    F3rc,
}

impl Format {
    /// Size of an instruction in this format, in code units.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Format::F10x | Format::F12x | Format::F11n | Format::F11x | Format::F10t => 1,
            Format::F20t
            | Format::F22x
            | Format::F21t
            | Format::F21s
            | Format::F21c
            | Format::F22t
            | Format::F22b
            | Format::F22c
            | Format::F23x => 2,
            Format::F30t | Format::F31t | Format::F31i | Format::F35c | Format::F3rc => 3,
        }
    }
}

// =============================================================================
// Opcodes
// =============================================================================

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $value:literal, $fmt:ident, $text:literal; )*) => {
        /// Bytecode operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $value, )*
        }

        impl Opcode {
            /// Decode an opcode byte.
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $( $value => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            /// Operand layout of this opcode.
            pub const fn format(self) -> Format {
                match self {
                    $( Opcode::$name => Format::$fmt, )*
                }
            }

            /// Mnemonic used by disassembly and diagnostics.
            pub const fn name(self) -> &'static str {
                match self {
                    $( Opcode::$name => $text, )*
                }
            }
        }
    };
}

opcodes! {
    /// No operation; also introduces payloads.
    Nop = 0x00, F10x, "nop";
    Move = 0x01, F12x, "move";
    MoveFrom16 = 0x02, F22x, "move/from16";
    MoveObject = 0x07, F12x, "move-object";
    MoveResult = 0x0a, F11x, "move-result";
    MoveResultObject = 0x0c, F11x, "move-result-object";
    MoveException = 0x0d, F11x, "move-exception";
    ReturnVoid = 0x0e, F10x, "return-void";
    Return = 0x0f, F11x, "return";
    ReturnObject = 0x11, F11x, "return-object";
    Const4 = 0x12, F11n, "const/4";
    Const16 = 0x13, F21s, "const/16";
    Const = 0x14, F31i, "const";
    ConstString = 0x1a, F21c, "const-string";
    ConstClass = 0x1c, F21c, "const-class";
    MonitorEnter = 0x1d, F11x, "monitor-enter";
    MonitorExit = 0x1e, F11x, "monitor-exit";
    CheckCast = 0x1f, F21c, "check-cast";
    InstanceOf = 0x20, F22c, "instance-of";
    ArrayLength = 0x21, F12x, "array-length";
    NewInstance = 0x22, F21c, "new-instance";
    NewArray = 0x23, F22c, "new-array";
    FillArrayData = 0x26, F31t, "fill-array-data";
    Throw = 0x27, F11x, "throw";
    Goto = 0x28, F10t, "goto";
    Goto16 = 0x29, F20t, "goto/16";
    Goto32 = 0x2a, F30t, "goto/32";
    PackedSwitch = 0x2b, F31t, "packed-switch";
    SparseSwitch = 0x2c, F31t, "sparse-switch";
    CmpLong = 0x31, F23x, "cmp-long";
    IfEq = 0x32, F22t, "if-eq";
    IfNe = 0x33, F22t, "if-ne";
    IfLt = 0x34, F22t, "if-lt";
    IfGe = 0x35, F22t, "if-ge";
    IfGt = 0x36, F22t, "if-gt";
    IfLe = 0x37, F22t, "if-le";
    IfEqz = 0x38, F21t, "if-eqz";
    IfNez = 0x39, F21t, "if-nez";
    IfLtz = 0x3a, F21t, "if-ltz";
    IfGez = 0x3b, F21t, "if-gez";
    IfGtz = 0x3c, F21t, "if-gtz";
    IfLez = 0x3d, F21t, "if-lez";
    Aget = 0x44, F23x, "aget";
    Aput = 0x4b, F23x, "aput";
    Iget = 0x52, F22c, "iget";
    Iput = 0x59, F22c, "iput";
    Sget = 0x60, F21c, "sget";
    Sput = 0x67, F21c, "sput";
    InvokeVirtual = 0x6e, F35c, "invoke-virtual";
    InvokeSuper = 0x6f, F35c, "invoke-super";
    InvokeDirect = 0x70, F35c, "invoke-direct";
    InvokeStatic = 0x71, F35c, "invoke-static";
    InvokeInterface = 0x72, F35c, "invoke-interface";
    InvokeVirtualRange = 0x74, F3rc, "invoke-virtual/range";
    InvokeSuperRange = 0x75, F3rc, "invoke-super/range";
    InvokeDirectRange = 0x76, F3rc, "invoke-direct/range";
    InvokeStaticRange = 0x77, F3rc, "invoke-static/range";
    InvokeInterfaceRange = 0x78, F3rc, "invoke-interface/range";
    AddInt = 0x90, F23x, "add-int";
    SubInt = 0x91, F23x, "sub-int";
    MulInt = 0x92, F23x, "mul-int";
    DivInt = 0x93, F23x, "div-int";
    RemInt = 0x94, F23x, "rem-int";
    AddInt2Addr = 0xb0, F12x, "add-int/2addr";
    AddIntLit8 = 0xd8, F22b, "add-int/lit8";
    /// Virtual call through a pre-resolved vtable index.
    InvokeVirtualQuick = 0xe9, F35c, "invoke-virtual-quick";
    InvokeVirtualRangeQuick = 0xea, F3rc, "invoke-virtual/range-quick";
}

impl Opcode {
    /// Unconditional jump in any width.
    #[inline]
    pub const fn is_goto(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::Goto16 | Opcode::Goto32)
    }

    /// Two-register or register-against-zero conditional branch.
    #[inline]
    pub const fn is_conditional_branch(self) -> bool {
        matches!(self.format(), Format::F22t | Format::F21t)
    }

    /// Packed or sparse switch.
    #[inline]
    pub const fn is_switch(self) -> bool {
        matches!(self, Opcode::PackedSwitch | Opcode::SparseSwitch)
    }

    /// Dispatch on the receiver's dynamic type (virtual or interface), in any
    /// encoding variant.
    #[inline]
    pub const fn is_polymorphic_invoke(self) -> bool {
        matches!(
            self,
            Opcode::InvokeVirtual
                | Opcode::InvokeVirtualRange
                | Opcode::InvokeVirtualQuick
                | Opcode::InvokeVirtualRangeQuick
                | Opcode::InvokeInterface
                | Opcode::InvokeInterfaceRange
        )
    }

    /// Any invoke.
    #[inline]
    pub const fn is_invoke(self) -> bool {
        matches!(self.format(), Format::F35c | Format::F3rc)
    }
}

// =============================================================================
// Decoded Instruction
// =============================================================================

/// Which kind of out-of-line payload a `nop` unit introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    PackedSwitch,
    SparseSwitch,
    FillArrayData,
}

/// A decoded instruction borrowed from its code array.
///
/// Decoding validates that all units of the instruction are present, so the
/// accessors below never index out of bounds.
#[derive(Clone, Copy)]
pub struct Instruction<'a> {
    units: &'a [u16],
    opcode: Opcode,
    payload: Option<PayloadKind>,
    size: usize,
}

impl<'a> Instruction<'a> {
    /// Decode the instruction that starts at `dex_pc`.
    pub fn decode(code: &'a [u16], dex_pc: u32) -> Result<Self, DecodeError> {
        let tail = code.get(dex_pc as usize..).unwrap_or(&[]);
        let Some(&first) = tail.first() else {
            return Err(DecodeError::Truncated {
                dex_pc,
                needed: 1,
                available: 0,
            });
        };

        let op_byte = (first & 0xff) as u8;
        let opcode =
            Opcode::from_u8(op_byte).ok_or(DecodeError::UnknownOpcode { dex_pc, opcode: op_byte })?;

        let (payload, size) = if opcode == Opcode::Nop && first != 0 {
            let (kind, size) = Self::payload_size(tail, dex_pc)?;
            (Some(kind), size)
        } else {
            (None, opcode.format().size())
        };

        if tail.len() < size {
            return Err(DecodeError::Truncated {
                dex_pc,
                needed: size,
                available: tail.len(),
            });
        }

        Ok(Self {
            units: &tail[..size],
            opcode,
            payload,
            size,
        })
    }

    /// Size of a payload pseudo-instruction, read from its header.
    fn payload_size(tail: &[u16], dex_pc: u32) -> Result<(PayloadKind, usize), DecodeError> {
        let header = |needed: usize| -> Result<(), DecodeError> {
            if tail.len() < needed {
                Err(DecodeError::Truncated {
                    dex_pc,
                    needed,
                    available: tail.len(),
                })
            } else {
                Ok(())
            }
        };

        match tail[0] {
            PACKED_SWITCH_SIGNATURE => {
                header(2)?;
                Ok((PayloadKind::PackedSwitch, tail[1] as usize * 2 + 4))
            }
            SPARSE_SWITCH_SIGNATURE => {
                header(2)?;
                Ok((PayloadKind::SparseSwitch, tail[1] as usize * 4 + 2))
            }
            FILL_ARRAY_DATA_SIGNATURE => {
                header(4)?;
                let width = tail[1] as usize;
                let count = tail[2] as usize | ((tail[3] as usize) << 16);
                Ok((PayloadKind::FillArrayData, (count * width + 1) / 2 + 4))
            }
            signature => Err(DecodeError::UnknownPayload { dex_pc, signature }),
        }
    }

    /// The operation.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Payload kind, if this is a payload pseudo-instruction.
    #[inline]
    pub fn payload_kind(&self) -> Option<PayloadKind> {
        self.payload
    }

    /// Size in code units, including payload contents.
    #[inline]
    pub fn size_in_code_units(&self) -> usize {
        self.size
    }

    /// Raw code units of this instruction.
    #[inline]
    pub fn units(&self) -> &'a [u16] {
        self.units
    }

    #[inline]
    fn high_byte(&self) -> u16 {
        self.units[0] >> 8
    }

    #[inline]
    fn read_i32(&self, index: usize) -> i32 {
        (self.units[index] as u32 | ((self.units[index + 1] as u32) << 16)) as i32
    }

    /// Relative branch offset of a `goto` or `if-*`, in code units.
    pub fn target_offset(&self) -> Option<i32> {
        if self.payload.is_some() {
            return None;
        }
        match self.opcode.format() {
            Format::F10t => Some(self.high_byte() as u8 as i8 as i32),
            Format::F20t | Format::F21t | Format::F22t => Some(self.units[1] as i16 as i32),
            Format::F30t => Some(self.read_i32(1)),
            _ => None,
        }
    }

    /// Relative offset of the payload referenced by a switch or
    /// `fill-array-data`, in code units.
    pub fn payload_offset(&self) -> Option<i32> {
        match self.opcode.format() {
            Format::F31t if self.payload.is_none() => Some(self.read_i32(1)),
            _ => None,
        }
    }

    /// Register A.
    pub fn vreg_a(&self) -> u16 {
        match self.opcode.format() {
            Format::F12x | Format::F11n | Format::F22t | Format::F22c => self.high_byte() & 0xf,
            Format::F35c => self.high_byte() >> 4,
            _ => self.high_byte(),
        }
    }

    /// Register B, or the constant-pool index for `21c`/`35c`/`3rc`.
    pub fn vreg_b(&self) -> Option<u16> {
        match self.opcode.format() {
            Format::F12x | Format::F22t | Format::F22c => Some(self.high_byte() >> 4),
            Format::F22x | Format::F21c | Format::F35c | Format::F3rc => Some(self.units[1]),
            Format::F23x | Format::F22b => Some(self.units[1] & 0xff),
            _ => None,
        }
    }

    /// Register C, or the constant-pool index for `22c`.
    pub fn vreg_c(&self) -> Option<u16> {
        match self.opcode.format() {
            Format::F22c => Some(self.units[1]),
            Format::F23x => Some(self.units[1] >> 8),
            Format::F35c => Some(self.units[2] & 0xf),
            Format::F3rc => Some(self.units[2]),
            _ => None,
        }
    }

    /// Signed literal of a `const*` or `*/lit8` instruction.
    pub fn literal(&self) -> Option<i32> {
        match self.opcode.format() {
            Format::F11n => Some(((self.high_byte() as u8 as i8) >> 4) as i32),
            Format::F21s => Some(self.units[1] as i16 as i32),
            Format::F31i => Some(self.read_i32(1)),
            Format::F22b => Some((self.units[1] >> 8) as u8 as i8 as i32),
            _ => None,
        }
    }

    /// Argument registers of a `35c` invoke.
    pub fn invoke_args(&self) -> Option<smallvec::SmallVec<[u16; 5]>> {
        match self.opcode.format() {
            Format::F35c => {
                let count = (self.high_byte() >> 4) as usize;
                let packed = self.units[2];
                let g = self.high_byte() & 0xf;
                let regs = [
                    packed & 0xf,
                    (packed >> 4) & 0xf,
                    (packed >> 8) & 0xf,
                    packed >> 12,
                    g,
                ];
                Some(regs[..count.min(5)].iter().copied().collect())
            }
            Format::F3rc => {
                let first = self.units[2];
                Some((0..self.high_byte()).map(|i| first.wrapping_add(i)).collect())
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Instruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.payload {
            Some(kind) => write!(f, "{:?}-payload ({} units)", kind, self.size),
            None => write!(f, "{} ({} units)", self.opcode.name(), self.size),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
