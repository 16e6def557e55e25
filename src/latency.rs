// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::*;

/// Scheduler tuning constants.
///
/// The defaults are microbenchmark-derived for the reference target; other
/// hardware must re-derive them rather than assume they carry over.
#[derive(Clone, Copy, Debug)]
pub struct SchedParams {
    /// Worst-case cycles until a shared-function ("ss") result is
    /// available.
    pub soft_ss_delay: u32,

    /// Worst-case cycles until a texture/global-memory ("sy") result is
    /// available.
    pub soft_sy_delay: u32,

    /// Ready-list lookahead window: a stall of at most this many cycles is
    /// accepted to issue cheap work into an async latency shadow.
    pub soft_delay_limit: u32,
}

impl Default for SchedParams {
    fn default() -> SchedParams {
        SchedParams {
            soft_ss_delay: 5,
            soft_sy_delay: 9,
            soft_delay_limit: 3,
        }
    }
}

/// Issue-slot cost of an instruction, in cycles.  Bookkeeping
/// pseudo-instructions are free; everything else occupies `1 + rpt`
/// issue slots.
pub fn exec_cycles(instr: &Instr) -> u32 {
    if instr.op.is_meta() {
        0
    } else {
        1 + u32::from(instr.rpt)
    }
}

/// Documented worst-case result latency for an async producer, used to
/// seed the unit cooldown counters and to weight its result edges.
pub fn soft_delay(instr: &Instr, params: &SchedParams) -> Option<u32> {
    if instr.op.is_sy_producer() {
        Some(params.soft_sy_delay)
    } else if instr.op.is_ss_producer() {
        Some(params.soft_ss_delay)
    } else {
        None
    }
}

/// Minimum issue-cycle separation between a producer and a consumer
/// reading one of its results through `src_idx`.
///
/// Total over every producer/consumer pair the IR can express: a producer
/// class without a rule here is a missing table entry and panics rather
/// than defaulting to zero, which would schedule a real hazard.
pub fn instr_delay(
    producer: &Instr,
    consumer: &Instr,
    src_idx: usize,
    merged_regs: bool,
) -> u32 {
    if producer.op.is_meta() || consumer.op.is_meta() {
        return 0;
    }

    // The address register takes a fixed six cycles to land, whatever
    // wrote it and whoever reads it.
    if producer.writes_addr() {
        return 6;
    }

    // Async results are synchronized by the consumer's sy/ss sync bits;
    // the scheduler accounts for them through the soft latency instead.
    if producer.op.is_sy_producer() || producer.op.is_ss_producer() {
        return 0;
    }

    // Shader outputs don't need any delay
    if consumer.op == Op::End {
        return 0;
    }

    assert!(
        producer.op.is_alu(),
        "No result latency rule for producer {}",
        producer.op
    );

    let base = if consumer.op.is_flow()
        || consumer.op.is_sfu()
        || consumer.op.is_tex()
        || consumer.op.is_mem()
    {
        6
    } else {
        assert!(
            consumer.op.is_alu(),
            "No result latency rule for consumer {}",
            consumer.op
        );

        // With merged registers, reading a result at the other precision
        // costs an extra two cycles.
        let mismatched_half = merged_regs
            && src_idx < consumer.srcs.len()
            && match (producer.dsts.first(), &consumer.srcs[src_idx].src_ref)
            {
                (Some(dst), SrcRef::Reg(src)) => dst.reg.half != src.half,
                _ => false,
            };
        let penalty = if mismatched_half { 2 } else { 0 };

        if consumer.op == Op::Mad && src_idx == 2 {
            // The accumulator isn't needed on the first cycle
            1 + penalty
        } else {
            3 + penalty
        }
    };

    base + u32::from(producer.rpt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alu(op: Op, dst: RegRef) -> Instr {
        let mut i = Instr::new(InstrId(0), op);
        i.dsts.push(Dst::reg(dst));
        i
    }

    fn alu_reading(op: Op, srcs: &[RegRef]) -> Instr {
        let mut i = Instr::new(InstrId(1), op);
        i.dsts.push(Dst::reg(RegRef::full(15, 1)));
        i.srcs.extend(srcs.iter().map(|&r| Src::reg(r)));
        i
    }

    #[test]
    fn alu_to_alu_is_three_cycles() {
        let p = alu(Op::Add, RegRef::full(0, 1));
        let c = alu_reading(Op::Mul, &[RegRef::full(0, 1)]);
        assert_eq!(instr_delay(&p, &c, 0, false), 3);
    }

    #[test]
    fn mad_accumulator_is_tied() {
        let p = alu(Op::Add, RegRef::full(0, 1));
        let c = alu_reading(
            Op::Mad,
            &[RegRef::full(1, 1), RegRef::full(2, 1), RegRef::full(0, 1)],
        );
        assert_eq!(instr_delay(&p, &c, 2, false), 1);
        assert_eq!(instr_delay(&p, &c, 0, false), 3);
    }

    #[test]
    fn merged_precision_mismatch_penalty() {
        let p = alu(Op::Add, RegRef::half(4, 1));
        let c = alu_reading(Op::Add, &[RegRef::full(2, 1)]);
        assert_eq!(instr_delay(&p, &c, 0, true), 5);
        // Split files don't pay the penalty
        assert_eq!(instr_delay(&p, &c, 0, false), 3);
    }

    #[test]
    fn repeat_extends_the_producer() {
        let mut p = alu(Op::Add, RegRef::full(0, 4));
        p.rpt = 3;
        let c = alu_reading(Op::Mul, &[RegRef::full(0, 1)]);
        assert_eq!(instr_delay(&p, &c, 0, false), 6);
        assert_eq!(exec_cycles(&p), 4);
    }

    #[test]
    fn address_writes_take_six_cycles() {
        let p = alu(Op::Mov, RegRef::addr(0));
        let c = alu_reading(Op::Add, &[RegRef::full(0, 1)]);
        assert_eq!(instr_delay(&p, &c, crate::reg_tracker::ADDR_SRC_IDX, true), 6);
    }

    #[test]
    fn async_producers_rely_on_sync_bits() {
        let p = alu(Op::Sam, RegRef::full(0, 4));
        let c = alu_reading(Op::Add, &[RegRef::full(0, 1)]);
        assert_eq!(instr_delay(&p, &c, 0, false), 0);

        let params = SchedParams::default();
        assert_eq!(soft_delay(&p, &params), Some(params.soft_sy_delay));
        assert_eq!(soft_delay(&c, &params), None);
    }

    #[test]
    fn meta_is_free() {
        let p = alu(Op::Input, RegRef::full(0, 1));
        let c = alu_reading(Op::Add, &[RegRef::full(0, 1)]);
        assert_eq!(instr_delay(&p, &c, 0, false), 0);
        assert_eq!(exec_cycles(&p), 0);
    }

    #[test]
    fn alu_to_memory_is_six_cycles() {
        let p = alu(Op::Add, RegRef::full(0, 1));
        let c = alu_reading(Op::Stg, &[RegRef::full(0, 1)]);
        assert_eq!(instr_delay(&p, &c, 0, false), 6);
    }
}
