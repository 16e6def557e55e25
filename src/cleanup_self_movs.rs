// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::*;
use rustc_hash::FxHashSet;

/// A same-type register-to-register move whose source and destination are
/// the same register, with no modifiers and no relative addressing.  RA
/// leaves these behind; they are pure no-ops but would still force
/// ordering constraints on the scheduler.
fn is_self_mov(instr: &Instr) -> bool {
    if instr.op != Op::Mov {
        return false;
    }
    let [dst] = &instr.dsts[..] else {
        return false;
    };
    let [src] = &instr.srcs[..] else {
        return false;
    };
    if !src.mods.is_empty() || src.relative || dst.relative {
        return false;
    }
    let SrcRef::Reg(src_reg) = src.src_ref else {
        return false;
    };
    src_reg == dst.reg
}

impl Shader {
    /// Delete no-op self-moves and scrub any false dependencies that named
    /// them.  Runs once before dependency-graph construction.
    pub fn cleanup_self_movs(&mut self) {
        let mut removed = FxHashSet::default();
        for block in &mut self.blocks {
            block.instrs.retain(|instr| {
                if is_self_mov(instr) {
                    removed.insert(instr.id);
                    false
                } else {
                    true
                }
            });
        }

        if removed.is_empty() {
            return;
        }
        log::debug!("Removed {} self-moves", removed.len());

        for block in &mut self.blocks {
            for instr in &mut block.instrs {
                instr.false_deps.retain(|id| !removed.contains(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mov(id: u32, dst: RegRef, src: Src) -> Box<Instr> {
        let mut i = Instr::new(InstrId(id), Op::Mov);
        i.dsts.push(Dst::reg(dst));
        i.srcs.push(src);
        Box::new(i)
    }

    fn shader_with(instrs: Vec<Box<Instr>>) -> Shader {
        let mut s = Shader::new(ShaderInfo {
            stage: ShaderStage::Fragment,
            mergedregs: true,
        });
        s.blocks.push(Block { instrs });
        s
    }

    #[test]
    fn self_mov_is_removed_and_false_deps_scrubbed() {
        let r2 = RegRef::full(2, 1);
        let self_mov = mov(0, r2, Src::reg(r2));
        let mut add = Instr::new(InstrId(1), Op::Add);
        add.dsts.push(Dst::reg(RegRef::full(3, 1)));
        add.srcs.push(Src::reg(r2));
        add.false_deps.push(InstrId(0));

        let mut s = shader_with(vec![self_mov, Box::new(add)]);
        s.cleanup_self_movs();

        assert_eq!(s.blocks[0].instrs.len(), 1);
        assert_eq!(s.blocks[0].instrs[0].op, Op::Add);
        assert!(s.blocks[0].instrs[0].false_deps.is_empty());
    }

    #[test]
    fn modified_and_immediate_movs_survive() {
        let r2 = RegRef::full(2, 1);
        let mut neg = Src::reg(r2);
        neg.mods = SrcMods::NEG;

        let mut s = shader_with(vec![
            mov(0, r2, neg),
            mov(1, r2, Src::imm(0)),
            mov(2, r2, Src::reg(RegRef::half(4, 1))),
        ]);
        s.cleanup_self_movs();
        assert_eq!(s.blocks[0].instrs.len(), 3);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let r2 = RegRef::full(2, 1);
        let mut s = shader_with(vec![
            mov(0, r2, Src::reg(r2)),
            mov(1, RegRef::full(3, 1), Src::reg(r2)),
        ]);
        s.cleanup_self_movs();
        let after_once: Vec<_> =
            s.blocks[0].instrs.iter().map(|i| i.id).collect();
        s.cleanup_self_movs();
        let after_twice: Vec<_> =
            s.blocks[0].instrs.iter().map(|i| i.id).collect();
        assert_eq!(after_once, after_twice);
    }
}
