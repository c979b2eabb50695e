#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod errors;
pub use errors::ProviderError;

mod request;
pub use request::{AssociatedAssertionMetadata, HashCollectorConfig, HistoryCommitmentRequest};

mod traits;
pub use traits::{
    ExecutionProvider, L2MessageStateCollector, MachineHashCollector, ProofCollector,
    StateProvider,
};

mod provider;
pub use provider::HistoryCommitmentProvider;
