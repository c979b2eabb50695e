#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod traits;
pub use traits::{ExecutionBackend, ExecutionResult, InboxTracker, Machine, MachineFactory};

mod cache;
pub use cache::{MachineHashCache, TraceKey};

mod manager;
pub use manager::{StateManager, StateManagerConfig};
