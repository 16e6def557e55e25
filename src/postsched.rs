// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Post-RA list scheduler.
//!
//! Per block this builds a dependency DAG over the RA-assigned
//! instruction list (register hazards, explicit false dependencies,
//! side-effect conflicts), then emits one legal total order that hides
//! async-unit latency where it can.  Registers are fixed by the time we
//! run; only order changes.

use crate::api::DEBUG;
use crate::ir::*;
use crate::latency::{exec_cycles, instr_delay, soft_delay, SchedParams};
use crate::reg_tracker::RegTracker;
use crate::sched_graph::{calc_statistics, save_graphviz, DepGraph, NodeLabel};
use rustc_hash::FxHashMap;
use std::cmp::{max, Reverse};

fn add_dep(
    g: &mut DepGraph,
    instrs: &[Box<Instr>],
    before: usize,
    after: usize,
    delay: u32,
) {
    if before == after {
        return;
    }
    debug_assert!(before < after);

    // Block inputs are scheduling roots; nothing orders ahead of them
    if instrs[after].op.is_input() {
        return;
    }
    g.add_edge_max_delay(before, after, delay);
}

/// Forward pass: order every register read after the most recent write of
/// each cell it covers, with the producer's result latency on the edge.
/// Writes only update the cell state here; write hazards are the reverse
/// pass's job.
fn calc_forward_deps(
    g: &mut DepGraph,
    instrs: &[Box<Instr>],
    info: &ShaderInfo,
    params: &SchedParams,
) {
    let mut regs = Box::new(RegTracker::<Option<(usize, usize)>>::new_with(
        info.mergedregs,
        &|| None,
    ));

    for ip in 0..instrs.len() {
        let instr = &instrs[ip];

        regs.for_each_instr_src_mut(instr, |src_idx, cell| {
            let Some((w_ip, _)) = *cell else {
                return;
            };
            let writer = &instrs[w_ip];

            let mut delay = instr_delay(writer, instr, src_idx, info.mergedregs);
            if let Some(soft) = soft_delay(writer, params) {
                delay = max(delay, soft);
            }

            if writer.op.is_sy_producer() {
                g.nodes[ip].label.has_sy_src = true;
            }
            if writer.op.is_ss_producer() {
                g.nodes[ip].label.has_ss_src = true;
            }

            add_dep(g, instrs, w_ip, ip, delay);
        });

        regs.for_each_instr_dst_mut(instr, |dst_idx, cell| {
            *cell = Some((ip, dst_idx));
        });
    }
}

/// Reverse pass: anti-dependencies.  A write must not be hoisted above an
/// earlier read (WAR) or an earlier write (WAW) of any cell it covers.
/// Zero delay; these constrain order, not latency.
fn calc_reverse_deps(g: &mut DepGraph, instrs: &[Box<Instr>], info: &ShaderInfo) {
    let mut regs = Box::new(RegTracker::<Option<(usize, usize)>>::new_with(
        info.mergedregs,
        &|| None,
    ));

    for ip in (0..instrs.len()).rev() {
        let instr = &instrs[ip];

        regs.for_each_instr_src_mut(instr, |_, cell| {
            let Some((w_ip, w_dst_idx)) = *cell else {
                return;
            };
            // An early-clobber destination is invalid to read one cycle
            // before the writer completes
            let delay = if instrs[w_ip].dsts[w_dst_idx].early_clobber {
                1
            } else {
                0
            };
            add_dep(g, instrs, ip, w_ip, delay);
        });

        regs.for_each_instr_dst_mut(instr, |dst_idx, cell| {
            if let Some((w_ip, _)) = *cell {
                add_dep(g, instrs, ip, w_ip, 0);
            }
            *cell = Some((ip, dst_idx));
        });
    }
}

fn effective_barrier(
    instr: &Instr,
    info: &ShaderInfo,
) -> (BarrierMask, BarrierMask) {
    // Tess-ctrl invocations run in lockstep, which makes the workgroup
    // barrier a no-op; it shouldn't serialize anything
    if instr.op == Op::Bar && info.stage == ShaderStage::TessCtrl {
        (BarrierMask::empty(), BarrierMask::empty())
    } else {
        (instr.barrier_class, instr.barrier_conflict)
    }
}

/// Ordering rules orthogonal to registers: explicit false dependencies,
/// side-effect conflicts, block terminators, and the input/discard/memory
/// ordering requirements.
fn calc_ordering_deps(g: &mut DepGraph, instrs: &[Box<Instr>], info: &ShaderInfo) {
    let mut id_to_ip = FxHashMap::default();
    for (ip, instr) in instrs.iter().enumerate() {
        let old = id_to_ip.insert(instr.id, ip);
        assert!(old.is_none(), "Duplicate instruction id {}", instr.id);
    }

    let mut inputs = Vec::new();
    let mut kills = Vec::new();
    let mut barriers: Vec<usize> = Vec::new();

    for (ip, instr) in instrs.iter().enumerate() {
        for dep_id in &instr.false_deps {
            // Cross-block references don't order anything here
            let Some(&dep_ip) = id_to_ip.get(dep_id) else {
                continue;
            };
            assert!(
                dep_ip < ip,
                "False dependency {dep_id} of {instr} points forward"
            );
            add_dep(g, instrs, dep_ip, ip, 0);
        }

        // Nothing is reordered across a block terminator
        if instr.op.is_branch() {
            for prior in 0..ip {
                add_dep(g, instrs, prior, ip, 0);
            }
        }

        let (class, conflict) = effective_barrier(instr, info);
        if !class.is_empty() || !conflict.is_empty() {
            for &p in &barriers {
                let (p_class, p_conflict) = effective_barrier(&instrs[p], info);
                if p_class.intersects(conflict) || class.intersects(p_conflict)
                {
                    add_dep(g, instrs, p, ip, 0);
                }
            }
            barriers.push(ip);
        }

        if instr.op.is_input() {
            inputs.push(ip);
        } else if instr.op.is_kill() {
            // The last input fetch lands before any discard
            for &input in &inputs {
                add_dep(g, instrs, input, ip, 0);
            }
            kills.push(ip);
        } else if instr.op.is_tex() || instr.op.is_mem() {
            // Discards never sink past live-fiber-dependent memory ops
            for &kill in &kills {
                add_dep(g, instrs, kill, ip, 0);
            }
        }
    }
}

pub(crate) fn generate_dep_graph(
    info: &ShaderInfo,
    params: &SchedParams,
    instrs: &[Box<Instr>],
) -> DepGraph {
    let mut g = DepGraph::new(instrs.iter().map(|instr| NodeLabel {
        exec_cycles: exec_cycles(instr),
        ..Default::default()
    }));

    calc_forward_deps(&mut g, instrs, info, params);
    calc_reverse_deps(&mut g, instrs, info);
    calc_ordering_deps(&mut g, instrs, info);

    g
}

struct SchedCtx<'a> {
    g: DepGraph,
    instrs: &'a [Box<Instr>],
    params: &'a SchedParams,

    /// Nodes with no unscheduled predecessors
    ready: Vec<usize>,
    order: Vec<usize>,

    /// Virtual issue cycle
    ip: u32,

    /// Cycles until outstanding ss/sy results are guaranteed available
    ss_delay: u32,
    sy_delay: u32,
}

impl SchedCtx<'_> {
    fn max_delay(&self, i: usize) -> u32 {
        self.g.nodes[i].label.max_delay
    }

    /// Cycles this node would stall if issued now.  Violating this is a
    /// correctness bug, enforced through `earliest_ip`.
    fn node_delay(&self, i: usize) -> u32 {
        self.g.nodes[i].label.earliest_ip.saturating_sub(self.ip)
    }

    /// Hard delay, further extended by the unit cooldowns when the node
    /// consumes an async result.  Used for ranking only.
    fn node_delay_soft(&self, i: usize) -> u32 {
        let label = &self.g.nodes[i].label;
        let mut delay = self.node_delay(i);
        if label.has_ss_src {
            delay = max(delay, self.ss_delay);
        }
        if label.has_sy_src {
            delay = max(delay, self.sy_delay);
        }
        delay
    }

    fn schedule(&mut self, i: usize) {
        let pos = self
            .ready
            .iter()
            .position(|&r| r == i)
            .unwrap_or_else(|| {
                panic!("{} scheduled before its dependencies", self.instrs[i])
            });
        self.ready.swap_remove(pos);

        let label = &self.g.nodes[i].label;
        self.ip = max(self.ip, label.earliest_ip) + label.exec_cycles;

        let edges = std::mem::take(&mut self.g.nodes[i].outgoing_edges);
        for e in &edges {
            let child = &mut self.g.nodes[e.head_idx].label;
            child.earliest_ip = max(child.earliest_ip, self.ip + e.label.delay);
            child.num_deps -= 1;
            if child.num_deps == 0 {
                self.ready.push(e.head_idx);
            }
        }

        let instr = &self.instrs[i];
        let label = &self.g.nodes[i].label;
        if instr.op.is_ss_producer() {
            self.ss_delay = self.params.soft_ss_delay;
        } else if label.has_ss_src {
            self.ss_delay = 0;
        } else {
            self.ss_delay = self.ss_delay.saturating_sub(1);
        }
        if instr.op.is_sy_producer() {
            self.sy_delay = self.params.soft_sy_delay;
        } else if label.has_sy_src {
            self.sy_delay = 0;
        } else {
            self.sy_delay = self.sy_delay.saturating_sub(1);
        }

        self.order.push(i);
    }

    /// Tiered pick from the ready set.  The first non-empty tier wins;
    /// within a tier the largest `max_delay` wins.
    fn choose_instr(&self) -> Option<usize> {
        // Bookkeeping first, to keep the ready set lean
        if let Some(&i) = self
            .ready
            .iter()
            .filter(|&&i| {
                let op = &self.instrs[i].op;
                op.is_meta() && !op.is_input()
            })
            .max_by_key(|&&i| self.max_delay(i))
        {
            return Some(i);
        }

        // Stray block inputs (normally drained before the main loop)
        if let Some(&i) = self
            .ready
            .iter()
            .filter(|&&i| self.instrs[i].op.is_input())
            .max_by_key(|&&i| self.max_delay(i))
        {
            return Some(i);
        }

        // A discard that won't stall shouldn't hold back unrelated work
        if let Some(&i) = self
            .ready
            .iter()
            .filter(|&&i| {
                self.instrs[i].op.is_kill() && self.node_delay(i) == 0
            })
            .max_by_key(|&&i| self.max_delay(i))
        {
            return Some(i);
        }

        // Issue expensive async work as early as legally possible
        if let Some(&i) = self
            .ready
            .iter()
            .filter(|&&i| {
                let op = &self.instrs[i].op;
                (op.is_sy_producer() || op.is_ss_producer())
                    && self.node_delay_soft(i) == 0
            })
            .max_by_key(|&&i| self.max_delay(i))
        {
            return Some(i);
        }

        // Bounded lookahead: accept a short stall to fill an async
        // latency shadow with cheap ready work
        if let Some(&i) = self
            .ready
            .iter()
            .filter(|&&i| {
                self.node_delay_soft(i) <= self.params.soft_delay_limit
            })
            .min_by_key(|&&i| {
                (self.node_delay_soft(i), Reverse(self.max_delay(i)))
            })
        {
            return Some(i);
        }

        // Anything that doesn't stall at all
        if let Some(&i) = self
            .ready
            .iter()
            .filter(|&&i| self.node_delay(i) == 0)
            .max_by_key(|&&i| self.max_delay(i))
        {
            return Some(i);
        }

        // Eat the stall on the longest remaining chain
        self.ready.iter().max_by_key(|&&i| self.max_delay(i)).copied()
    }
}

pub(crate) fn sched_block(
    info: &ShaderInfo,
    params: &SchedParams,
    instrs: Vec<Box<Instr>>,
) -> (Vec<Box<Instr>>, u32) {
    let mut g = generate_dep_graph(info, params, &instrs);
    let ready = calc_statistics(&mut g);

    if DEBUG.graphviz() {
        if let Err(e) = save_graphviz(&instrs, &g) {
            log::warn!("Failed to dump the dependency graph: {e}");
        }
    }

    let mut ctx = SchedCtx {
        g,
        instrs: &instrs,
        params,
        ready,
        order: Vec::with_capacity(instrs.len()),
        ip: 0,
        ss_delay: 0,
        sy_delay: 0,
    };

    // Input registers are materialized before anything else, then
    // prefetched textures, then the constant-preload macro
    for phase in [Op::Input, Op::TexPrefetch, Op::PreloadConsts] {
        for i in 0..ctx.instrs.len() {
            if ctx.instrs[i].op == phase && ctx.ready.contains(&i) {
                ctx.schedule(i);
            }
        }
    }
    debug_assert!(ctx
        .instrs
        .iter()
        .enumerate()
        .filter(|(_, instr)| instr.op.is_input())
        .all(|(i, _)| ctx.order.contains(&i)));

    while ctx.order.len() < ctx.instrs.len() {
        let Some(i) = ctx.choose_instr() else {
            panic!(
                "No ready instructions with {} still unscheduled; the \
                 dependency graph has a cycle",
                ctx.instrs.len() - ctx.order.len()
            );
        };
        ctx.schedule(i);
    }

    let cycle_count = ctx.ip;
    let order = ctx.order;

    let mut slots: Vec<Option<Box<Instr>>> =
        instrs.into_iter().map(Some).collect();
    let scheduled = order
        .into_iter()
        .map(|i| slots[i].take().expect("Instruction scheduled twice"))
        .collect();

    (scheduled, cycle_count)
}

impl Shader {
    /// Post-RA instruction scheduling
    ///
    /// List scheduling with the latency-weighted-depth heuristic; see
    /// Cooper & Torczon's "Engineering A Compiler", 3rd ed., chapter 12.3
    /// "Local scheduling".  Returns the total virtual cycle count, which a
    /// later legalization pass may use when inserting real stall cycles.
    pub fn opt_postsched(&mut self, params: &SchedParams) -> u32 {
        self.cleanup_self_movs();

        let mut num_static_cycles = 0;
        for (block_idx, block) in self.blocks.iter_mut().enumerate() {
            let orig_instr_count = block.instrs.len();
            let instrs = std::mem::take(&mut block.instrs);
            let (instrs, cycle_count) = sched_block(&self.info, params, instrs);
            block.instrs = instrs;
            assert_eq!(orig_instr_count, block.instrs.len());
            num_static_cycles += cycle_count;

            log::debug!(
                "Scheduled block {block_idx}: {} instructions in {} cycles",
                block.instrs.len(),
                cycle_count,
            );
            if DEBUG.print() {
                for instr in &block.instrs {
                    log::debug!("  {instr}");
                }
            }
        }
        num_static_cycles
    }
}
