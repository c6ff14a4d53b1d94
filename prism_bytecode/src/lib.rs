//! Register bytecode for the Prism JIT.
//!
//! Method bodies are arrays of 16-bit code units holding variable-length
//! instructions, out-of-line switch and array payloads, and a try/catch
//! table. This crate decodes them one instruction at a time and assembles
//! them through a label-resolving [`CodeBuilder`].
#![warn(clippy::all)]

pub mod builder;
pub mod code_item;
pub mod instruction;

pub use builder::{BuildError, CodeBuilder, IfCond, InvokeKind, Label};
pub use code_item::{CatchHandlerList, CodeItem, SwitchPayload, TryItem, TypeAddrPair};
pub use instruction::{DecodeError, Format, Instruction, Opcode, PayloadKind};
