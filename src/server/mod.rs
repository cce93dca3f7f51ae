//! Cluster runtime: nodes exchanging messages over a transport, and the coordinator
//! that plans queries and schedules their fragments onto nodes.

pub mod coordinator;
pub mod node;

pub use coordinator::{Coordinator, ScheduledTask};
pub use node::Node;
