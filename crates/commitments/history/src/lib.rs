#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod errors;
pub use errors::{CommitmentError, CommitmentResult};

mod commitment;
pub use commitment::{HistoryCommitment, verify_leaf_inclusion};

mod committer;
pub use committer::{compute_root, generate_prefix_proof};

pub(crate) mod math;
