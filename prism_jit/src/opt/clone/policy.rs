//! Which node kinds the cloner can duplicate.
//!
//! The decision is a single `match` over every operator with no catch-all
//! arm, so adding an operator without classifying it fails to compile.
//!
//! Kinds that cannot be cloned fall into four groups:
//!
//! | Reason            | Kinds                                                        |
//! |-------------------|--------------------------------------------------------------|
//! | `MethodSingleton` | `CurrentMethod`, `Exit`, `X86ComputeBaseMethodAddress`        |
//! | `SharedConstant`  | int, long, float, double and null constants                  |
//! | `Parameter`       | `ParameterValue`                                             |
//! | `BackendOnly`     | `ParallelMove` and the fused memory-operand arithmetic       |
//!
//! A duplicate of any of these would break the graph's one-node-per-value
//! rule or appear after the point where the graph is still rewritable.

use crate::ir::operators::{ControlOp, Operator, X86Op};

/// Why a node kind cannot be cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsupportedReason {
    /// The graph holds exactly one node of this kind.
    MethodSingleton,
    /// Constants are deduplicated per value.
    SharedConstant,
    /// Parameters are bound once at method entry.
    Parameter,
    /// Only exists after instruction selection or register allocation.
    BackendOnly,
}

impl UnsupportedReason {
    pub const fn describe(self) -> &'static str {
        match self {
            UnsupportedReason::MethodSingleton => "per-graph singleton",
            UnsupportedReason::SharedConstant => "shared constant",
            UnsupportedReason::Parameter => "method parameter",
            UnsupportedReason::BackendOnly => "backend-only node",
        }
    }
}

/// Classification of a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloneSupport {
    Cloneable,
    Unsupported(UnsupportedReason),
}

impl CloneSupport {
    #[inline]
    pub const fn is_cloneable(self) -> bool {
        matches!(self, CloneSupport::Cloneable)
    }
}

/// Classify `op`.
#[deny(clippy::wildcard_enum_match_arm)]
pub const fn clone_support(op: &Operator) -> CloneSupport {
    use CloneSupport::{Cloneable, Unsupported};
    use UnsupportedReason::{BackendOnly, MethodSingleton, Parameter, SharedConstant};

    match op {
        Operator::IntConstant(_)
        | Operator::LongConstant(_)
        | Operator::FloatConstant(_)
        | Operator::DoubleConstant(_)
        | Operator::NullConstant => Unsupported(SharedConstant),

        Operator::CurrentMethod
        | Operator::Control(ControlOp::Exit)
        | Operator::X86(X86Op::ComputeBaseMethodAddress) => Unsupported(MethodSingleton),

        Operator::ParameterValue(_) => Unsupported(Parameter),

        Operator::ParallelMove | Operator::FusedMemory(_) => Unsupported(BackendOnly),

        Operator::Arith(_)
        | Operator::Neg
        | Operator::Not
        | Operator::BooleanNot
        | Operator::Bitwise(_)
        | Operator::Condition(_)
        | Operator::Compare
        | Operator::TypeConversion
        | Operator::Select
        | Operator::Phi => Cloneable,

        Operator::Array(_) | Operator::Field(..) => Cloneable,

        Operator::Check(_) | Operator::BoundType | Operator::CheckCast | Operator::InstanceOf => {
            Cloneable
        }

        Operator::NewInstance(_)
        | Operator::NewArray(_)
        | Operator::LoadClass(_)
        | Operator::LoadString(_)
        | Operator::LoadException
        | Operator::ClearException
        | Operator::ClassTableGet => Cloneable,

        Operator::Invoke(..) => Cloneable,

        Operator::Control(ControlOp::Goto)
        | Operator::Control(ControlOp::If)
        | Operator::Control(ControlOp::PackedSwitch)
        | Operator::Control(ControlOp::Return)
        | Operator::Control(ControlOp::ReturnVoid)
        | Operator::Control(ControlOp::Throw)
        | Operator::Control(ControlOp::TryBoundary)
        | Operator::Control(ControlOp::Deoptimize) => Cloneable,

        Operator::MonitorOperation(_)
        | Operator::MemoryBarrier
        | Operator::SuspendCheck
        | Operator::Suspend
        | Operator::TestSuspend
        | Operator::NativeDebugInfo => Cloneable,

        Operator::X86(X86Op::LoadFromConstantTable)
        | Operator::X86(X86Op::FpNeg)
        | Operator::X86(X86Op::PackedSwitch)
        | Operator::X86(X86Op::BoundsCheckMemory)
        | Operator::X86(X86Op::SelectValue)
        | Operator::X86(X86Op::ProfileInvoke)
        | Operator::X86(X86Op::IncrementExecutionCount) => Cloneable,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{
        ArithOp, ArrayOp, BitwiseOp, CheckKind, CmpOp, FieldOp, FusedMemoryOp, InvokeKind,
    };

    fn unsupported() -> Vec<Operator> {
        vec![
            Operator::IntConstant(0),
            Operator::LongConstant(1),
            Operator::float_constant(2.0),
            Operator::double_constant(3.0),
            Operator::NullConstant,
            Operator::CurrentMethod,
            Operator::ParameterValue(0),
            Operator::Control(ControlOp::Exit),
            Operator::X86(X86Op::ComputeBaseMethodAddress),
            Operator::ParallelMove,
            Operator::FusedMemory(FusedMemoryOp::AddLhsMemory),
            Operator::FusedMemory(FusedMemoryOp::AddRhsMemory),
            Operator::FusedMemory(FusedMemoryOp::SubRhsMemory),
            Operator::FusedMemory(FusedMemoryOp::MulRhsMemory),
            Operator::FusedMemory(FusedMemoryOp::DivRhsMemory),
        ]
    }

    #[test]
    fn test_unsupported_kinds() {
        for op in unsupported() {
            assert!(!clone_support(&op).is_cloneable(), "{op} should not be cloneable");
        }
    }

    #[test]
    fn test_reasons() {
        assert_eq!(
            clone_support(&Operator::CurrentMethod),
            CloneSupport::Unsupported(UnsupportedReason::MethodSingleton)
        );
        assert_eq!(
            clone_support(&Operator::NullConstant),
            CloneSupport::Unsupported(UnsupportedReason::SharedConstant)
        );
        assert_eq!(
            clone_support(&Operator::ParameterValue(3)),
            CloneSupport::Unsupported(UnsupportedReason::Parameter)
        );
        assert_eq!(
            clone_support(&Operator::FusedMemory(FusedMemoryOp::DivRhsMemory)),
            CloneSupport::Unsupported(UnsupportedReason::BackendOnly)
        );
    }

    #[test]
    fn test_shared_kinds_are_never_cloneable() {
        for op in unsupported() {
            if op.is_shared() {
                assert!(!clone_support(&op).is_cloneable());
            }
        }
        assert!(Operator::X86(X86Op::ComputeBaseMethodAddress).is_shared());
    }

    #[test]
    fn test_cloneable_kinds() {
        let ops = [
            Operator::Arith(ArithOp::Div),
            Operator::Bitwise(BitwiseOp::Ror),
            Operator::Condition(CmpOp::Below),
            Operator::Select,
            Operator::Phi,
            Operator::Array(ArrayOp::Length),
            Operator::Field(FieldOp::UnresolvedStaticGet, 1),
            Operator::Check(CheckKind::DevirtGuard),
            Operator::Invoke(InvokeKind::Interface, 9),
            Operator::Control(ControlOp::Deoptimize),
            Operator::Control(ControlOp::ReturnVoid),
            Operator::MonitorOperation(true),
            Operator::NativeDebugInfo,
            Operator::X86(X86Op::PackedSwitch),
            Operator::X86(X86Op::IncrementExecutionCount),
        ];
        for op in ops {
            assert_eq!(clone_support(&op), CloneSupport::Cloneable, "{op}");
        }
    }
}
