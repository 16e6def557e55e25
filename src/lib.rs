// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

mod api;
mod cleanup_self_movs;
mod ir;
mod latency;
mod postsched;
mod reg_tracker;
mod sched_graph;


pub use api::DEBUG;
pub use ir::*;
pub use latency::SchedParams;
