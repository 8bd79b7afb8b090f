//! Directory adapters and connection-health tracking.

mod in_memory;
mod monitor;

pub use in_memory::{DirectoryMode, InMemoryDirectory};
pub use monitor::{DirectoryHealthPolicy, DirectoryMonitor, ProbeRecord};
