//! Call-site and basic-block discovery.
//!
//! A single linear pass over a method's bytecode finds:
//!
//! - **Call sites** worth a receiver type cache: virtual and interface
//!   invokes in every encoding, in encounter order
//! - **Block starts**: entry, branch and switch targets, fall-throughs after
//!   conditional branches and switches, and every catch handler
//!
//! Payload pseudo-instructions are stepped over using their decoded size.

use prism_bytecode::{CodeItem, DecodeError, Instruction};
use std::collections::BTreeSet;
use tracing::trace;

/// Result of scanning one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockAnalysis {
    /// Offsets of polymorphic invokes, in encounter order.
    pub call_sites: Vec<u32>,
    /// Deduplicated block-start offsets, ascending.
    pub block_starts: Vec<u32>,
}

/// Linear-scan analyzer.
#[derive(Debug)]
pub struct BlockAnalyzer<'a> {
    code: &'a CodeItem,
    call_sites: Vec<u32>,
    block_starts: BTreeSet<u32>,
}

impl<'a> BlockAnalyzer<'a> {
    /// Scan `code` and collect its call sites and block starts.
    pub fn analyze(code: &'a CodeItem) -> Result<BlockAnalysis, DecodeError> {
        let mut analyzer = BlockAnalyzer {
            code,
            call_sites: Vec::new(),
            block_starts: BTreeSet::new(),
        };

        analyzer.block_starts.insert(0);
        for entry in code.instructions() {
            let (dex_pc, inst) = entry?;
            analyzer.visit(dex_pc, &inst)?;
        }
        analyzer.block_starts.extend(code.handler_addresses());

        trace!(
            call_sites = analyzer.call_sites.len(),
            block_starts = analyzer.block_starts.len(),
            code_units = code.insns_size_in_code_units(),
            "analyzed method bytecode"
        );

        Ok(BlockAnalysis {
            call_sites: analyzer.call_sites,
            block_starts: analyzer.block_starts.into_iter().collect(),
        })
    }

    fn visit(&mut self, dex_pc: u32, inst: &Instruction<'_>) -> Result<(), DecodeError> {
        if inst.payload_kind().is_some() {
            return Ok(());
        }

        let op = inst.opcode();
        let fall_through = dex_pc + inst.size_in_code_units() as u32;

        if op.is_polymorphic_invoke() {
            self.call_sites.push(dex_pc);
        } else if op.is_goto() {
            self.add_branch_target(dex_pc, branch_offset(dex_pc, inst)?)?;
        } else if op.is_conditional_branch() {
            self.block_starts.insert(fall_through);
            self.add_branch_target(dex_pc, branch_offset(dex_pc, inst)?)?;
        } else if op.is_switch() {
            let table = self.code.switch_payload(dex_pc, inst)?;
            self.block_starts.insert(fall_through);
            for &offset in &table.targets {
                self.add_branch_target(dex_pc, offset)?;
            }
        }
        Ok(())
    }

    fn add_branch_target(&mut self, dex_pc: u32, offset: i32) -> Result<(), DecodeError> {
        let target = dex_pc as i64 + offset as i64;
        if target < 0 || target >= self.code.insns_size_in_code_units() as i64 {
            return Err(DecodeError::BranchOutOfRange { dex_pc, offset });
        }
        self.block_starts.insert(target as u32);
        Ok(())
    }
}

fn branch_offset(dex_pc: u32, inst: &Instruction<'_>) -> Result<i32, DecodeError> {
    inst.target_offset()
        .ok_or(DecodeError::MissingBranchTarget { dex_pc })
}

// =============================================================================
// Tests
// =============================================================================
