// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use std::env;
use std::sync::OnceLock;

bitflags::bitflags! {
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Print the scheduled instruction list for every block
        const PRINT = 1 << 0;
        /// Dump the per-block dependency graph as graphviz
        const GRAPHVIZ = 1 << 1;
    }
}

pub struct Debug {
    flags: OnceLock<DebugFlags>,
}

impl Debug {
    fn flags(&self) -> DebugFlags {
        *self.flags.get_or_init(|| {
            let mut flags = DebugFlags::empty();
            let Ok(env) = env::var("MAKO_DEBUG") else {
                return flags;
            };
            for flag in env.split(',') {
                match flag.trim() {
                    "print" => flags |= DebugFlags::PRINT,
                    "graphviz" => flags |= DebugFlags::GRAPHVIZ,
                    "" => (),
                    unk => log::warn!("Unknown MAKO_DEBUG flag {unk:?}"),
                }
            }
            flags
        })
    }

    pub fn print(&self) -> bool {
        self.flags().contains(DebugFlags::PRINT)
    }

    pub fn graphviz(&self) -> bool {
        self.flags().contains(DebugFlags::GRAPHVIZ)
    }
}

pub static DEBUG: Debug = Debug {
    flags: OnceLock::new(),
};
