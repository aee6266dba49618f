//! Graph module for deadlock diagnosis
//!
//! - Wait-for graph: which threads are blocked behind which other threads
//! - Cycle detection: circular waits in that graph

pub mod cycles;
pub mod wait_for_graph;

pub use cycles::{Cycle, canonical, find_cycles};
pub use wait_for_graph::WaitForGraph;
