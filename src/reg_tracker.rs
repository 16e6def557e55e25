// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::*;

use std::ops::{Index, IndexMut, Range};

/// Source-operand index reported for implicit address-register reads from
/// relative addressing.  There is no real operand slot for these.
pub const ADDR_SRC_IDX: usize = usize::MAX;

/// Half-precision register cells available to the GPR file.  A full
/// register covers two of them in merged mode, so this bounds the full
/// file at 256 registers.
const NUM_GPR_CELLS: usize = 512;
const NUM_ADDR_REGS: usize = 2;
const NUM_PRED_REGS: usize = 4;

/// One `T` per physical register cell, indexable by [`RegRef`].
///
/// GPR aliasing follows the register-file merge policy: with merged
/// registers, full register `r` maps to half-cells `2r..2r+2` and half
/// register `hr` to cell `r`, so mixed-precision overlaps are visible.
/// With split registers the two precisions index disjoint cell ranges.
/// Address and predicate registers never alias anything.
pub struct RegTracker<T> {
    gpr: [T; NUM_GPR_CELLS],
    addr: [T; NUM_ADDR_REGS],
    pred: [T; NUM_PRED_REGS],
    merged: bool,
}

fn new_array_with<T, const N: usize>(f: &impl Fn() -> T) -> [T; N] {
    let mut v = Vec::with_capacity(N);
    for _ in 0..N {
        v.push(f());
    }
    v.try_into()
        .unwrap_or_else(|_| panic!("Array size mismatch"))
}

impl<T> RegTracker<T> {
    pub fn new_with(merged: bool, f: &impl Fn() -> T) -> Self {
        Self {
            gpr: new_array_with(f),
            addr: new_array_with(f),
            pred: new_array_with(f),
            merged,
        }
    }

    fn gpr_cells(&self, reg: &RegRef) -> Range<usize> {
        let base = usize::from(reg.base);
        let comps = usize::from(reg.comps);
        let range = match (self.merged, reg.half) {
            (true, true) => base..base + comps,
            (true, false) => base * 2..(base + comps) * 2,
            (false, true) => {
                let half_base = NUM_GPR_CELLS / 2;
                half_base + base..half_base + base + comps
            }
            (false, false) => base..base + comps,
        };
        assert!(
            range.end <= NUM_GPR_CELLS,
            "Register {reg} out of range for the GPR file"
        );
        range
    }

    pub fn for_each_instr_src_mut(
        &mut self,
        instr: &Instr,
        mut f: impl FnMut(usize, &mut T),
    ) {
        for (i, src) in instr.srcs.iter().enumerate() {
            if let SrcRef::Reg(reg) = &src.src_ref {
                for t in &mut self[*reg] {
                    f(i, t);
                }
            }
            if src.relative {
                for t in &mut self[RegRef::addr(0)] {
                    f(ADDR_SRC_IDX, t);
                }
            }
        }

        // Relative stores read the address register too
        for dst in &instr.dsts {
            if dst.relative {
                for t in &mut self[RegRef::addr(0)] {
                    f(ADDR_SRC_IDX, t);
                }
            }
        }
    }

    pub fn for_each_instr_dst_mut(
        &mut self,
        instr: &Instr,
        mut f: impl FnMut(usize, &mut T),
    ) {
        for (i, dst) in instr.dsts.iter().enumerate() {
            for t in &mut self[dst.reg] {
                f(i, t);
            }
        }
    }
}

impl<T> Index<RegRef> for RegTracker<T> {
    type Output = [T];

    fn index(&self, reg: RegRef) -> &[T] {
        match reg.file {
            RegFile::GPR => &self.gpr[self.gpr_cells(&reg)],
            RegFile::Addr => {
                let base = usize::from(reg.base);
                &self.addr[base..base + usize::from(reg.comps)]
            }
            RegFile::Pred => {
                let base = usize::from(reg.base);
                &self.pred[base..base + usize::from(reg.comps)]
            }
        }
    }
}

impl<T> IndexMut<RegRef> for RegTracker<T> {
    fn index_mut(&mut self, reg: RegRef) -> &mut [T] {
        match reg.file {
            RegFile::GPR => {
                let range = self.gpr_cells(&reg);
                &mut self.gpr[range]
            }
            RegFile::Addr => {
                let base = usize::from(reg.base);
                &mut self.addr[base..base + usize::from(reg.comps)]
            }
            RegFile::Pred => {
                let base = usize::from(reg.base);
                &mut self.pred[base..base + usize::from(reg.comps)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(t: &mut RegTracker<u32>, reg: RegRef) {
        for c in &mut t[reg] {
            *c += 1;
        }
    }

    fn count(t: &RegTracker<u32>, reg: RegRef) -> u32 {
        t[reg].iter().sum()
    }

    #[test]
    fn merged_half_aliases_full() {
        let mut t = RegTracker::new_with(true, &|| 0_u32);
        mark(&mut t, RegRef::half(4, 1));
        // Full r2 covers half-cells 4 and 5
        assert_eq!(count(&t, RegRef::full(2, 1)), 1);
        assert_eq!(count(&t, RegRef::full(3, 1)), 0);
    }

    #[test]
    fn split_half_never_aliases_full() {
        let mut t = RegTracker::new_with(false, &|| 0_u32);
        mark(&mut t, RegRef::half(4, 1));
        assert_eq!(count(&t, RegRef::full(2, 1)), 0);
        assert_eq!(count(&t, RegRef::half(4, 2)), 1);
    }

    #[test]
    fn addr_and_pred_are_disjoint_from_gprs() {
        let mut t = RegTracker::new_with(true, &|| 0_u32);
        mark(&mut t, RegRef::addr(0));
        mark(&mut t, RegRef::pred(0));
        assert_eq!(count(&t, RegRef::full(0, 4)), 0);
        assert_eq!(count(&t, RegRef::addr(0)), 1);
        assert_eq!(count(&t, RegRef::pred(0)), 1);
    }
}
