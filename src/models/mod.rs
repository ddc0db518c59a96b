//! Data structures mirroring the management API's JSON responses.

pub mod node;
pub mod pool;

pub use node::{Node, NodeSummary};
pub use pool::InstancePool;
