//! TSQ - distributed query core for a time-series store
//!
//! Queries are analyzed against catalog metadata, planned, optimized and cut into
//! fragments. Fragments run as tasks on the nodes owning the data and stream their
//! pages to each other until the coordinator holds the final result.

pub mod config;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod page;
pub mod query;
pub mod rpc;
pub mod server;
pub mod spi;
pub mod task;

pub use error::QueryError;
