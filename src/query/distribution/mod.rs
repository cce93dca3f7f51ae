//! Distribution planning: decides where data has to move between tasks and between
//! pipelines of a task, and makes that movement explicit as exchange nodes.

pub mod add_exchanges;
pub mod add_local_exchanges;
pub mod properties;

pub use add_exchanges::AddExchanges;
pub use add_local_exchanges::AddLocalExchanges;
pub use properties::{ActualProperties, Distribution, StreamProperties};
