// acc — Accelerator graph compiler
//
// Library root. Graph IR, hierarchy queries, passes, and the pass pipeline.

pub mod addr_copy;
pub mod diag;
pub mod dot;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod load;
pub mod pass;
pub mod pipeline;
pub mod verify;
