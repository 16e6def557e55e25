// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Post-RA shader IR consumed by the scheduler.
//!
//! Instruction selection and register allocation have already run by the
//! time this IR exists: every source and destination carries a concrete
//! physical register, and side-effect ordering requirements are expressed
//! through [`BarrierMask`] pairs and explicit false dependencies.

use std::fmt;

/// Stable per-shader instruction identity.
///
/// Used by explicit false dependencies, which have to survive passes that
/// insert or remove instructions (so list positions won't do).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RegFile {
    /// General-purpose registers.  Half- and full-precision registers may
    /// alias depending on [`ShaderInfo::mergedregs`].
    GPR,
    /// Address registers used for relative addressing.  Never alias GPRs.
    Addr,
    /// Predicate registers.  Never alias GPRs.
    Pred,
}

/// A physical register reference covering `comps` consecutive registers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegRef {
    pub file: RegFile,
    pub base: u16,
    pub comps: u8,
    pub half: bool,
}

impl RegRef {
    pub fn full(base: u16, comps: u8) -> RegRef {
        RegRef {
            file: RegFile::GPR,
            base,
            comps,
            half: false,
        }
    }

    pub fn half(base: u16, comps: u8) -> RegRef {
        RegRef {
            file: RegFile::GPR,
            base,
            comps,
            half: true,
        }
    }

    pub fn addr(base: u16) -> RegRef {
        RegRef {
            file: RegFile::Addr,
            base,
            comps: 1,
            half: false,
        }
    }

    pub fn pred(base: u16) -> RegRef {
        RegRef {
            file: RegFile::Pred,
            base,
            comps: 1,
            half: false,
        }
    }
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            RegFile::GPR => {
                if self.half {
                    write!(f, "hr{}", self.base)?;
                } else {
                    write!(f, "r{}", self.base)?;
                }
            }
            RegFile::Addr => write!(f, "a{}", self.base)?,
            RegFile::Pred => write!(f, "p{}", self.base)?,
        }
        if self.comps > 1 {
            write!(f, ":{}", self.comps)?;
        }
        Ok(())
    }
}

bitflags::bitflags! {
    /// Source modifiers.  Any of these disqualifies a mov from self-move
    /// cleanup.
    #[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
    pub struct SrcMods: u8 {
        const NEG = 1 << 0;
        const ABS = 1 << 1;
        const BNOT = 1 << 2;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SrcRef {
    /// Constant-buffer slot.  No scheduling dependency.
    Const(u16),
    /// Inline immediate.  No scheduling dependency.
    Imm(u32),
    Reg(RegRef),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Src {
    pub src_ref: SrcRef,
    pub mods: SrcMods,
    /// Address-relative access.  Implicitly reads the address register.
    pub relative: bool,
}

impl Src {
    pub fn reg(reg: RegRef) -> Src {
        Src {
            src_ref: SrcRef::Reg(reg),
            mods: SrcMods::empty(),
            relative: false,
        }
    }

    pub fn imm(imm: u32) -> Src {
        Src {
            src_ref: SrcRef::Imm(imm),
            mods: SrcMods::empty(),
            relative: false,
        }
    }
}

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mods.contains(SrcMods::NEG) {
            write!(f, "-")?;
        }
        if self.mods.contains(SrcMods::BNOT) {
            write!(f, "!")?;
        }
        match &self.src_ref {
            SrcRef::Const(c) => write!(f, "c[{c}]"),
            SrcRef::Imm(v) => write!(f, "{v:#x}"),
            SrcRef::Reg(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Dst {
    pub reg: RegRef,
    /// The destination becomes invalid to read one cycle before the
    /// instruction completes.  Set on multi-cycle macro expansions.
    pub early_clobber: bool,
    /// Address-relative store.  Implicitly reads the address register.
    pub relative: bool,
}

impl Dst {
    pub fn reg(reg: RegRef) -> Dst {
        Dst {
            reg,
            early_clobber: false,
            relative: false,
        }
    }
}

impl fmt::Display for Dst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reg.fmt(f)
    }
}

bitflags::bitflags! {
    /// Side-effect categories for non-register hazards.
    ///
    /// Two instructions conflict when one's `barrier_class` intersects the
    /// other's `barrier_conflict`.
    #[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
    pub struct BarrierMask: u16 {
        const BUFFER_R = 1 << 0;
        const BUFFER_W = 1 << 1;
        const IMAGE_R = 1 << 2;
        const IMAGE_W = 1 << 3;
        const SHARED_R = 1 << 4;
        const SHARED_W = 1 << 5;
        const PRIVATE_R = 1 << 6;
        const PRIVATE_W = 1 << 7;
        const CONST_W = 1 << 8;
        const ACTIVE_FIBERS_R = 1 << 9;
        const ACTIVE_FIBERS_W = 1 << 10;
        const EVERYTHING = (1 << 11) - 1;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    // Zero-cost bookkeeping pseudo-instructions
    /// Block-input declaration.  Materializes an input register; always
    /// scheduled before anything else in the block.
    Input,
    /// Texture fetch hoisted to the shader preamble by an earlier pass.
    TexPrefetch,
    /// Register vector gather for a multi-register operand.
    Collect,
    /// Register vector scatter of a multi-register result.
    Split,

    // ALU
    Mov,
    /// Type-converting move.  Never a candidate for self-move cleanup.
    Cov,
    Add,
    Mul,
    /// Fused multiply-add.  The accumulator (third source) is tied to the
    /// result pipeline and needs a shorter delay.
    Mad,
    /// Compare, writes a predicate register.
    Cmp,

    // Special-function unit ("ss" results)
    Rcp,
    Rsq,
    Sqrt,
    Sin,
    Cos,
    Exp2,
    Log2,

    // Texture/memory ("sy" results for loads)
    Sam,
    Ldg,
    Stg,
    Ldl,
    Stl,
    Ldc,
    Atomic,
    /// Constant-preload macro.  Expanded downstream; scheduled in its own
    /// early phase.
    PreloadConsts,

    // Flow
    Jump,
    Br,
    End,
    Kill,
    Demote,

    // Execution barriers
    Bar,
    Fence,
}

impl Op {
    pub fn is_meta(&self) -> bool {
        matches!(self, Op::Input | Op::TexPrefetch | Op::Collect | Op::Split)
    }

    pub fn is_input(&self) -> bool {
        matches!(self, Op::Input)
    }

    pub fn is_alu(&self) -> bool {
        matches!(
            self,
            Op::Mov | Op::Cov | Op::Add | Op::Mul | Op::Mad | Op::Cmp
        )
    }

    pub fn is_sfu(&self) -> bool {
        matches!(
            self,
            Op::Rcp | Op::Rsq | Op::Sqrt | Op::Sin | Op::Cos | Op::Exp2 | Op::Log2
        )
    }

    pub fn is_tex(&self) -> bool {
        matches!(self, Op::Sam)
    }

    pub fn is_mem(&self) -> bool {
        matches!(
            self,
            Op::Ldg
                | Op::Stg
                | Op::Ldl
                | Op::Stl
                | Op::Ldc
                | Op::Atomic
                | Op::PreloadConsts
        )
    }

    pub fn is_flow(&self) -> bool {
        matches!(
            self,
            Op::Jump | Op::Br | Op::End | Op::Kill | Op::Demote | Op::Bar | Op::Fence
        )
    }

    pub fn is_kill(&self) -> bool {
        matches!(self, Op::Kill | Op::Demote)
    }

    /// Block terminators.  Nothing is reordered across these.
    pub fn is_branch(&self) -> bool {
        matches!(self, Op::Jump | Op::Br | Op::End)
    }

    /// Results arrive asynchronously from the texture/global-memory unit
    /// and are consumed with an "sy" sync.
    pub fn is_sy_producer(&self) -> bool {
        matches!(self, Op::Sam | Op::Ldg | Op::Ldc | Op::Atomic)
    }

    /// Results arrive asynchronously from the shared-function unit or
    /// local memory and are consumed with an "ss" sync.
    pub fn is_ss_producer(&self) -> bool {
        self.is_sfu() || matches!(self, Op::Ldl)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Input => "input",
            Op::TexPrefetch => "tex_prefetch",
            Op::Collect => "collect",
            Op::Split => "split",
            Op::Mov => "mov",
            Op::Cov => "cov",
            Op::Add => "add",
            Op::Mul => "mul",
            Op::Mad => "mad",
            Op::Cmp => "cmp",
            Op::Rcp => "rcp",
            Op::Rsq => "rsq",
            Op::Sqrt => "sqrt",
            Op::Sin => "sin",
            Op::Cos => "cos",
            Op::Exp2 => "exp2",
            Op::Log2 => "log2",
            Op::Sam => "sam",
            Op::Ldg => "ldg",
            Op::Stg => "stg",
            Op::Ldl => "ldl",
            Op::Stl => "stl",
            Op::Ldc => "ldc",
            Op::Atomic => "atomic",
            Op::PreloadConsts => "preload_consts",
            Op::Jump => "jump",
            Op::Br => "br",
            Op::End => "end",
            Op::Kill => "kill",
            Op::Demote => "demote",
            Op::Bar => "bar",
            Op::Fence => "fence",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub id: InstrId,
    pub op: Op,
    pub dsts: Vec<Dst>,
    pub srcs: Vec<Src>,
    /// How many extra consecutive result cycles this instruction occupies
    /// (SIMD-style repeat).  0 means a single-cycle result.
    pub rpt: u8,
    pub barrier_class: BarrierMask,
    pub barrier_conflict: BarrierMask,
    /// Same-block must-come-after references for side-effect-only ordering.
    /// Entries naming instructions removed by cleanup passes are dropped.
    pub false_deps: Vec<InstrId>,
}

impl Instr {
    pub fn new(id: InstrId, op: Op) -> Instr {
        Instr {
            id,
            op,
            dsts: Vec::new(),
            srcs: Vec::new(),
            rpt: 0,
            barrier_class: BarrierMask::empty(),
            barrier_conflict: BarrierMask::empty(),
            false_deps: Vec::new(),
        }
    }

    /// Whether any destination is an address register.  Consumers of the
    /// address need a long fixed delay, whatever the opcode.
    pub fn writes_addr(&self) -> bool {
        self.dsts.iter().any(|d| d.reg.file == RegFile::Addr)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if self.rpt > 0 {
            write!(f, "(rpt{})", self.rpt)?;
        }
        let mut sep = " ";
        for dst in &self.dsts {
            write!(f, "{sep}{dst}")?;
            sep = ", ";
        }
        for src in &self.srcs {
            write!(f, "{sep}{src}")?;
            sep = ", ";
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderInfo {
    pub stage: ShaderStage,
    /// Whether half- and full-precision registers share one physical file.
    /// When set, full register `r` aliases half registers `2r` and `2r+1`.
    pub mergedregs: bool,
}

#[derive(Default)]
pub struct Block {
    pub instrs: Vec<Box<Instr>>,
}

pub struct Shader {
    pub info: ShaderInfo,
    pub blocks: Vec<Block>,
}

impl Shader {
    pub fn new(info: ShaderInfo) -> Shader {
        Shader {
            info,
            blocks: Vec::new(),
        }
    }
}
