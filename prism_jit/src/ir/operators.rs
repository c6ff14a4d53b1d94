//! Operator definitions for the instruction graph.
//!
//! Operators are a closed set. Families that share an encoding shape are
//! grouped into sub-enums (`ArithOp`, `CmpOp`, `FieldOp`, ...) so passes can
//! match a whole family at once, while every concrete kind still has its own
//! stable debug name.
//!
//! Constants are stored by bit pattern so `Operator` can be `Eq + Hash`,
//! which the graph relies on for deduplicating shared nodes.

use std::fmt;

// =============================================================================
// Arithmetic
// =============================================================================

/// Binary arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Rem = 4,
}

impl ArithOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "Add",
            ArithOp::Sub => "Sub",
            ArithOp::Mul => "Mul",
            ArithOp::Div => "Div",
            ArithOp::Rem => "Rem",
        }
    }
}

// =============================================================================
// Bitwise
// =============================================================================

/// Binary bitwise logic, shifts and rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BitwiseOp {
    And = 0,
    Or = 1,
    Xor = 2,
    Shl = 3,
    /// Arithmetic shift right.
    Shr = 4,
    /// Logical shift right.
    UShr = 5,
    /// Rotate right.
    Ror = 6,
}

impl BitwiseOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, BitwiseOp::And | BitwiseOp::Or | BitwiseOp::Xor)
    }

    pub const fn name(self) -> &'static str {
        match self {
            BitwiseOp::And => "And",
            BitwiseOp::Or => "Or",
            BitwiseOp::Xor => "Xor",
            BitwiseOp::Shl => "Shl",
            BitwiseOp::Shr => "Shr",
            BitwiseOp::UShr => "UShr",
            BitwiseOp::Ror => "Ror",
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Boolean-producing comparison. `Below`/`Above` compare unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    Equal = 0,
    NotEqual = 1,
    LessThan = 2,
    LessThanOrEqual = 3,
    GreaterThan = 4,
    GreaterThanOrEqual = 5,
    Below = 6,
    BelowOrEqual = 7,
    Above = 8,
    AboveOrEqual = 9,
}

impl CmpOp {
    /// Condition that holds exactly when `self` does not.
    #[inline]
    pub const fn inverse(self) -> Self {
        match self {
            CmpOp::Equal => CmpOp::NotEqual,
            CmpOp::NotEqual => CmpOp::Equal,
            CmpOp::LessThan => CmpOp::GreaterThanOrEqual,
            CmpOp::LessThanOrEqual => CmpOp::GreaterThan,
            CmpOp::GreaterThan => CmpOp::LessThanOrEqual,
            CmpOp::GreaterThanOrEqual => CmpOp::LessThan,
            CmpOp::Below => CmpOp::AboveOrEqual,
            CmpOp::BelowOrEqual => CmpOp::Above,
            CmpOp::Above => CmpOp::BelowOrEqual,
            CmpOp::AboveOrEqual => CmpOp::Below,
        }
    }

    #[inline]
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            CmpOp::Below | CmpOp::BelowOrEqual | CmpOp::Above | CmpOp::AboveOrEqual
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            CmpOp::Equal => "Equal",
            CmpOp::NotEqual => "NotEqual",
            CmpOp::LessThan => "LessThan",
            CmpOp::LessThanOrEqual => "LessThanOrEqual",
            CmpOp::GreaterThan => "GreaterThan",
            CmpOp::GreaterThanOrEqual => "GreaterThanOrEqual",
            CmpOp::Below => "Below",
            CmpOp::BelowOrEqual => "BelowOrEqual",
            CmpOp::Above => "Above",
            CmpOp::AboveOrEqual => "AboveOrEqual",
        }
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Array element access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArrayOp {
    Get = 0,
    Set = 1,
    Length = 2,
}

/// Field access. Unresolved variants go through the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldOp {
    InstanceGet = 0,
    InstanceSet = 1,
    StaticGet = 2,
    StaticSet = 3,
    UnresolvedInstanceGet = 4,
    UnresolvedInstanceSet = 5,
    UnresolvedStaticGet = 6,
    UnresolvedStaticSet = 7,
}

impl FieldOp {
    #[inline]
    pub const fn is_resolved(self) -> bool {
        (self as u8) < 4
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldOp::InstanceGet => "InstanceFieldGet",
            FieldOp::InstanceSet => "InstanceFieldSet",
            FieldOp::StaticGet => "StaticFieldGet",
            FieldOp::StaticSet => "StaticFieldSet",
            FieldOp::UnresolvedInstanceGet => "UnresolvedInstanceFieldGet",
            FieldOp::UnresolvedInstanceSet => "UnresolvedInstanceFieldSet",
            FieldOp::UnresolvedStaticGet => "UnresolvedStaticFieldGet",
            FieldOp::UnresolvedStaticSet => "UnresolvedStaticFieldSet",
        }
    }
}

// =============================================================================
// Checks
// =============================================================================

/// Runtime check that deoptimizes or throws on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CheckKind {
    Null = 0,
    Bounds = 1,
    DivZero = 2,
    /// Class initialization check.
    Clinit = 3,
    /// Receiver-type guard for a devirtualized call.
    DevirtGuard = 4,
}

// =============================================================================
// Calls
// =============================================================================

/// Invoke dispatch kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InvokeKind {
    StaticOrDirect = 0,
    Virtual = 1,
    Interface = 2,
    Unresolved = 3,
}

// =============================================================================
// Control
// =============================================================================

/// Block-terminating and exceptional control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlOp {
    Goto = 0,
    If = 1,
    PackedSwitch = 2,
    Return = 3,
    ReturnVoid = 4,
    Throw = 5,
    TryBoundary = 6,
    Deoptimize = 7,
    /// The graph's unique exit.
    Exit = 8,
}

// =============================================================================
// Backend Extensions
// =============================================================================

/// Arithmetic with a fused memory operand, formed during instruction
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FusedMemoryOp {
    AddLhsMemory = 0,
    AddRhsMemory = 1,
    SubRhsMemory = 2,
    MulRhsMemory = 3,
    DivRhsMemory = 4,
}

/// x86-specific nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum X86Op {
    /// Materializes the method's base address; one per graph.
    ComputeBaseMethodAddress = 0,
    LoadFromConstantTable = 1,
    FpNeg = 2,
    PackedSwitch = 3,
    BoundsCheckMemory = 4,
    SelectValue = 5,
    ProfileInvoke = 6,
    IncrementExecutionCount = 7,
}

// =============================================================================
// Operator
// =============================================================================

/// Operation performed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Constants and per-graph values
    IntConstant(i32),
    LongConstant(i64),
    /// Stored as bits.
    FloatConstant(u32),
    /// Stored as bits.
    DoubleConstant(u64),
    NullConstant,
    CurrentMethod,
    ParameterValue(u16),

    // Arithmetic and logic
    Arith(ArithOp),
    Neg,
    Not,
    BooleanNot,
    Bitwise(BitwiseOp),
    Condition(CmpOp),
    /// Three-way compare producing -1, 0 or 1.
    Compare,
    TypeConversion,
    Select,
    Phi,

    // Memory
    Array(ArrayOp),
    /// Field access with its field index.
    Field(FieldOp, u32),

    // Checks and types
    Check(CheckKind),
    BoundType,
    CheckCast,
    InstanceOf,

    // Allocation and loads, with their type or string index
    NewInstance(u32),
    NewArray(u32),
    LoadClass(u32),
    LoadString(u32),
    LoadException,
    ClearException,
    ClassTableGet,

    /// Call with its method index.
    Invoke(InvokeKind, u32),

    Control(ControlOp),

    // Runtime interaction
    /// Monitor enter (`true`) or exit.
    MonitorOperation(bool),
    MemoryBarrier,
    SuspendCheck,
    Suspend,
    TestSuspend,
    NativeDebugInfo,

    // Backend
    ParallelMove,
    FusedMemory(FusedMemoryOp),
    X86(X86Op),
}

impl Operator {
    #[inline]
    pub fn float_constant(value: f32) -> Self {
        Operator::FloatConstant(value.to_bits())
    }

    #[inline]
    pub fn double_constant(value: f64) -> Self {
        Operator::DoubleConstant(value.to_bits())
    }

    #[inline]
    pub const fn is_constant(&self) -> bool {
        matches!(
            self,
            Operator::IntConstant(_)
                | Operator::LongConstant(_)
                | Operator::FloatConstant(_)
                | Operator::DoubleConstant(_)
                | Operator::NullConstant
        )
    }

    /// Operators a graph holds at most one node of per distinct value.
    #[inline]
    pub const fn is_shared(&self) -> bool {
        self.is_constant()
            || matches!(
                self,
                Operator::CurrentMethod
                    | Operator::ParameterValue(_)
                    | Operator::Control(ControlOp::Exit)
                    | Operator::X86(X86Op::ComputeBaseMethodAddress)
            )
    }

    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self, Operator::Control(_) | Operator::X86(X86Op::PackedSwitch))
    }

    #[inline]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Operator::Phi)
    }

    /// Whether the operation can raise an exception.
    pub const fn can_throw(&self) -> bool {
        match self {
            Operator::Check(kind) => !matches!(kind, CheckKind::DevirtGuard),
            Operator::Field(op, _) => !op.is_resolved(),
            Operator::Array(ArrayOp::Set) => true,
            Operator::CheckCast
            | Operator::NewInstance(_)
            | Operator::NewArray(_)
            | Operator::LoadClass(_)
            | Operator::LoadString(_)
            | Operator::Invoke(..)
            | Operator::Control(ControlOp::Throw)
            | Operator::MonitorOperation(_)
            | Operator::X86(X86Op::BoundsCheckMemory) => true,
            _ => false,
        }
    }

    /// Kind name used in diagnostics and failure reports.
    pub const fn debug_name(&self) -> &'static str {
        match self {
            Operator::IntConstant(_) => "IntConstant",
            Operator::LongConstant(_) => "LongConstant",
            Operator::FloatConstant(_) => "FloatConstant",
            Operator::DoubleConstant(_) => "DoubleConstant",
            Operator::NullConstant => "NullConstant",
            Operator::CurrentMethod => "CurrentMethod",
            Operator::ParameterValue(_) => "ParameterValue",
            Operator::Arith(op) => op.name(),
            Operator::Neg => "Neg",
            Operator::Not => "Not",
            Operator::BooleanNot => "BooleanNot",
            Operator::Bitwise(op) => op.name(),
            Operator::Condition(op) => op.name(),
            Operator::Compare => "Compare",
            Operator::TypeConversion => "TypeConversion",
            Operator::Select => "Select",
            Operator::Phi => "Phi",
            Operator::Array(ArrayOp::Get) => "ArrayGet",
            Operator::Array(ArrayOp::Set) => "ArraySet",
            Operator::Array(ArrayOp::Length) => "ArrayLength",
            Operator::Field(op, _) => op.name(),
            Operator::Check(CheckKind::Null) => "NullCheck",
            Operator::Check(CheckKind::Bounds) => "BoundsCheck",
            Operator::Check(CheckKind::DivZero) => "DivZeroCheck",
            Operator::Check(CheckKind::Clinit) => "ClinitCheck",
            Operator::Check(CheckKind::DevirtGuard) => "DevirtGuard",
            Operator::BoundType => "BoundType",
            Operator::CheckCast => "CheckCast",
            Operator::InstanceOf => "InstanceOf",
            Operator::NewInstance(_) => "NewInstance",
            Operator::NewArray(_) => "NewArray",
            Operator::LoadClass(_) => "LoadClass",
            Operator::LoadString(_) => "LoadString",
            Operator::LoadException => "LoadException",
            Operator::ClearException => "ClearException",
            Operator::ClassTableGet => "ClassTableGet",
            Operator::Invoke(InvokeKind::StaticOrDirect, _) => "InvokeStaticOrDirect",
            Operator::Invoke(InvokeKind::Virtual, _) => "InvokeVirtual",
            Operator::Invoke(InvokeKind::Interface, _) => "InvokeInterface",
            Operator::Invoke(InvokeKind::Unresolved, _) => "InvokeUnresolved",
            Operator::Control(ControlOp::Goto) => "Goto",
            Operator::Control(ControlOp::If) => "If",
            Operator::Control(ControlOp::PackedSwitch) => "PackedSwitch",
            Operator::Control(ControlOp::Return) => "Return",
            Operator::Control(ControlOp::ReturnVoid) => "ReturnVoid",
            Operator::Control(ControlOp::Throw) => "Throw",
            Operator::Control(ControlOp::TryBoundary) => "TryBoundary",
            Operator::Control(ControlOp::Deoptimize) => "Deoptimize",
            Operator::Control(ControlOp::Exit) => "Exit",
            Operator::MonitorOperation(_) => "MonitorOperation",
            Operator::MemoryBarrier => "MemoryBarrier",
            Operator::SuspendCheck => "SuspendCheck",
            Operator::Suspend => "Suspend",
            Operator::TestSuspend => "TestSuspend",
            Operator::NativeDebugInfo => "NativeDebugInfo",
            Operator::ParallelMove => "ParallelMove",
            Operator::FusedMemory(FusedMemoryOp::AddLhsMemory) => "AddLHSMemory",
            Operator::FusedMemory(FusedMemoryOp::AddRhsMemory) => "AddRHSMemory",
            Operator::FusedMemory(FusedMemoryOp::SubRhsMemory) => "SubRHSMemory",
            Operator::FusedMemory(FusedMemoryOp::MulRhsMemory) => "MulRHSMemory",
            Operator::FusedMemory(FusedMemoryOp::DivRhsMemory) => "DivRHSMemory",
            Operator::X86(X86Op::ComputeBaseMethodAddress) => "X86ComputeBaseMethodAddress",
            Operator::X86(X86Op::LoadFromConstantTable) => "X86LoadFromConstantTable",
            Operator::X86(X86Op::FpNeg) => "X86FPNeg",
            Operator::X86(X86Op::PackedSwitch) => "X86PackedSwitch",
            Operator::X86(X86Op::BoundsCheckMemory) => "X86BoundsCheckMemory",
            Operator::X86(X86Op::SelectValue) => "X86SelectValue",
            Operator::X86(X86Op::ProfileInvoke) => "X86ProfileInvoke",
            Operator::X86(X86Op::IncrementExecutionCount) => "X86IncrementExecutionCount",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::IntConstant(v) => write!(f, "IntConstant({v})"),
            Operator::LongConstant(v) => write!(f, "LongConstant({v})"),
            Operator::FloatConstant(bits) => write!(f, "FloatConstant({})", f32::from_bits(*bits)),
            Operator::DoubleConstant(bits) => {
                write!(f, "DoubleConstant({})", f64::from_bits(*bits))
            }
            Operator::ParameterValue(i) => write!(f, "ParameterValue({i})"),
            Operator::Field(_, idx) => write!(f, "{}(field@{idx})", self.debug_name()),
            Operator::Invoke(_, idx) => write!(f, "{}(method@{idx})", self.debug_name()),
            _ => f.write_str(self.debug_name()),
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
    fn test_shared_operators() {
        assert!(Operator::IntConstant(3).is_shared());
        assert!(Operator::NullConstant.is_shared());
        assert!(Operator::CurrentMethod.is_shared());
        assert!(Operator::ParameterValue(0).is_shared());
        assert!(Operator::Control(ControlOp::Exit).is_shared());
        assert!(!Operator::Control(ControlOp::Return).is_shared());
        assert!(!Operator::Arith(ArithOp::Add).is_shared());
    }

    #[test]
    fn test_float_constants_compare_by_bits() {
        assert_eq!(Operator::double_constant(1.5), Operator::double_constant(1.5));
        assert_ne!(Operator::float_constant(0.0), Operator::float_constant(-0.0));
    }

    #[test]
    fn test_debug_names() {
        assert_eq!(Operator::Arith(ArithOp::Rem).debug_name(), "Rem");
        assert_eq!(Operator::Bitwise(BitwiseOp::UShr).debug_name(), "UShr");
        assert_eq!(Operator::Condition(CmpOp::AboveOrEqual).debug_name(), "AboveOrEqual");
        assert_eq!(
            Operator::Field(FieldOp::UnresolvedStaticSet, 2).debug_name(),
            "UnresolvedStaticFieldSet"
        );
        assert_eq!(Operator::FusedMemory(FusedMemoryOp::AddLhsMemory).debug_name(), "AddLHSMemory");
        assert_eq!(
            Operator::X86(X86Op::ComputeBaseMethodAddress).debug_name(),
            "X86ComputeBaseMethodAddress"
        );
    }

    #[test]
    fn test_display_includes_payload() {
        assert_eq!(Operator::IntConstant(-4).to_string(), "IntConstant(-4)");
        assert_eq!(
            Operator::Invoke(InvokeKind::Virtual, 12).to_string(),
            "InvokeVirtual(method@12)"
        );
        assert_eq!(Operator::Select.to_string(), "Select");
    }

    #[test]
    fn test_cmp_inverse_round_trips() {
        for op in [CmpOp::Equal, CmpOp::LessThan, CmpOp::Below, CmpOp::AboveOrEqual] {
            assert_eq!(op.inverse().inverse(), op);
            assert_eq!(op.inverse().is_unsigned(), op.is_unsigned());
        }
    }

    #[test]
    fn test_can_throw() {
        assert!(Operator::Check(CheckKind::Null).can_throw());
        assert!(!Operator::Check(CheckKind::DevirtGuard).can_throw());
        assert!(Operator::Field(FieldOp::UnresolvedInstanceGet, 0).can_throw());
        assert!(!Operator::Field(FieldOp::InstanceGet, 0).can_throw());
        assert!(Operator::Invoke(InvokeKind::StaticOrDirect, 1).can_throw());
        assert!(!Operator::Arith(ArithOp::Div).can_throw());
    }
}
