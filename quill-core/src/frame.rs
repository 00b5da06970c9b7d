//! Per-method stack and local-slot tracker.
//!
//! One tracker is owned by one emission pass over one body and stays
//! in lockstep with physical byte emission: every push/pop mirrors an
//! instruction that was just written. Widths are a type, not a raw
//! integer, so a one-word/two-word mixup fails to compile instead of
//! corrupting the simulated depth.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ir::LabelId;

/// Operand-stack words an entry occupies. Wide values (64-bit ints,
/// double-precision floats) take two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    One,
    Two,
}

impl Width {
    pub fn words(self) -> u16 {
        match self {
            Width::One => 1,
            Width::Two => 2,
        }
    }
}

/// Structural failures inside one body's emission. These indicate a
/// bug in the stage that produced the instruction tree and abort the
/// enclosing type's generation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("operand stack underflow (pop of {wanted} word(s) at depth {depth})")]
    Underflow { wanted: u16, depth: u16 },
    #[error("label {0:?} defined twice")]
    LabelRedefined(LabelId),
    #[error("label {0:?} referenced but never visited")]
    UnvisitedLabel(LabelId),
    #[error("branch at offset {origin} cannot reach {target} (16-bit range)")]
    BranchOutOfRange { origin: u32, target: u32 },
}

#[derive(Debug, Default)]
struct LabelEntry {
    /// Bytecode offset once the label is visited.
    offset: Option<u32>,
    /// (operand position in the code buffer, opcode offset) pairs
    /// waiting for the label's offset.
    patch_sites: Vec<(usize, u32)>,
}

/// Tracks simulated operand-stack depth, required max stack, highest
/// local slot, and the jump-label map for one method body.
#[derive(Debug)]
pub struct FrameTracker {
    depth: u16,
    max_stack: u16,
    max_locals: u16,
    labels: BTreeMap<LabelId, LabelEntry>,
}

impl FrameTracker {
    /// `param_slots` is the floor for max_locals: `this` plus the
    /// declared parameters.
    pub fn new(param_slots: u16) -> FrameTracker {
        FrameTracker {
            depth: 0,
            max_stack: 0,
            max_locals: param_slots,
            labels: BTreeMap::new(),
        }
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn push(&mut self, width: Width) {
        self.depth += width.words();
        if self.depth > self.max_stack {
            self.max_stack = self.depth;
        }
    }

    pub fn pop(&mut self, width: Width) -> Result<(), FrameError> {
        let wanted = width.words();
        if self.depth < wanted {
            return Err(FrameError::Underflow {
                wanted,
                depth: self.depth,
            });
        }
        self.depth -= wanted;
        Ok(())
    }

    /// Discards whatever the stack currently holds beyond `floor`
    /// words; used by auto-popping value packs. Returns the number of
    /// words discarded so the caller can emit matching pop opcodes.
    pub fn drain_to(&mut self, floor: u16) -> u16 {
        let residue = self.depth.saturating_sub(floor);
        self.depth = self.depth.min(floor);
        residue
    }

    /// Records that a local slot of the given width is in use.
    pub fn touch_slot(&mut self, slot: u16, width: Width) {
        let top = slot + width.words();
        if top > self.max_locals {
            self.max_locals = top;
        }
    }

    /// Marks the label as living at `offset`. Visiting twice is a
    /// structural error.
    pub fn define_label(&mut self, label: LabelId, offset: u32) -> Result<(), FrameError> {
        let entry = self.labels.entry(label).or_default();
        if entry.offset.is_some() {
            return Err(FrameError::LabelRedefined(label));
        }
        entry.offset = Some(offset);
        Ok(())
    }

    /// Registers a forward or backward reference. `operand_pos` is the
    /// index in the code buffer where the 16-bit relative offset goes;
    /// `opcode_offset` is the branch opcode's own bytecode offset,
    /// which JVM branch offsets are relative to.
    pub fn refer_label(&mut self, label: LabelId, operand_pos: usize, opcode_offset: u32) {
        self.labels
            .entry(label)
            .or_default()
            .patch_sites
            .push((operand_pos, opcode_offset));
    }

    pub fn offset_of(&self, label: LabelId) -> Option<u32> {
        self.labels.get(&label).and_then(|entry| entry.offset)
    }

    /// Resolves every recorded reference into `code`, asserting that
    /// all referenced labels were visited.
    pub fn patch_branches(&self, code: &mut [u8]) -> Result<(), FrameError> {
        for (label, entry) in &self.labels {
            if entry.patch_sites.is_empty() {
                continue;
            }
            let Some(target) = entry.offset else {
                return Err(FrameError::UnvisitedLabel(*label));
            };
            for &(operand_pos, opcode_offset) in &entry.patch_sites {
                let rel = i64::from(target) - i64::from(opcode_offset);
                let rel16 = i16::try_from(rel).map_err(|_| FrameError::BranchOutOfRange {
                    origin: opcode_offset,
                    target,
                })?;
                let bytes = rel16.to_be_bytes();
                code[operand_pos] = bytes[0];
                code[operand_pos + 1] = bytes[1];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_stack_follows_the_high_water_mark() {
        let mut tracker = FrameTracker::new(1);
        tracker.push(Width::One);
        tracker.push(Width::Two);
        assert_eq!(tracker.depth(), 3);
        tracker.pop(Width::Two).unwrap();
        tracker.push(Width::One);
        assert_eq!(tracker.depth(), 2);
        assert_eq!(tracker.max_stack(), 3);
    }

    #[test]
    fn pop_below_zero_is_an_error() {
        let mut tracker = FrameTracker::new(0);
        tracker.push(Width::One);
        assert_eq!(
            tracker.pop(Width::Two),
            Err(FrameError::Underflow { wanted: 2, depth: 1 })
        );
    }

    #[test]
    fn wide_locals_take_two_slots() {
        let mut tracker = FrameTracker::new(1);
        tracker.touch_slot(1, Width::Two);
        assert_eq!(tracker.max_locals(), 3);
        tracker.touch_slot(0, Width::One);
        assert_eq!(tracker.max_locals(), 3);
    }

    #[test]
    fn drain_reports_residue() {
        let mut tracker = FrameTracker::new(0);
        tracker.push(Width::One);
        tracker.push(Width::One);
        assert_eq!(tracker.drain_to(0), 2);
        assert_eq!(tracker.depth(), 0);
        assert_eq!(tracker.drain_to(0), 0);
    }

    #[test]
    fn branch_patching_resolves_forward_references() {
        let mut tracker = FrameTracker::new(0);
        // goto at offset 0, operand at positions 1..3, target offset 7
        let mut code = vec![0xa7, 0, 0, 0, 0, 0, 0, 0x01];
        tracker.refer_label(LabelId(0), 1, 0);
        tracker.define_label(LabelId(0), 7).unwrap();
        tracker.patch_branches(&mut code).unwrap();
        assert_eq!(&code[1..3], &[0, 7]);
    }

    #[test]
    fn unvisited_label_is_an_error() {
        let mut tracker = FrameTracker::new(0);
        tracker.refer_label(LabelId(3), 1, 0);
        let mut code = vec![0; 4];
        assert_eq!(
            tracker.patch_branches(&mut code),
            Err(FrameError::UnvisitedLabel(LabelId(3)))
        );
    }

    #[test]
    fn double_definition_is_an_error() {
        let mut tracker = FrameTracker::new(0);
        tracker.define_label(LabelId(1), 4).unwrap();
        assert_eq!(
            tracker.define_label(LabelId(1), 8),
            Err(FrameError::LabelRedefined(LabelId(1)))
        );
    }
}
