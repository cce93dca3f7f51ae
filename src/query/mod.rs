//! Query compilation: from a query tree to distributed plan fragments.
//!
//! A query is analyzed against catalog metadata, lowered into a logical plan,
//! optimized (rule rewrites plus exchange placement) and finally cut into fragments
//! that tasks on different nodes execute.

pub mod analyzer;
pub mod ast;
pub mod distribution;
pub mod fragment;
pub mod functions;
pub mod optimizer;
pub mod plan;
pub mod planner;
