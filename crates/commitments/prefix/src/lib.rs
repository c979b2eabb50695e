#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod errors;
pub use errors::{ProofError, ProofResult};

mod bits;
pub use bits::{least_significant_bit, most_significant_bit};

mod expansion;
pub use expansion::{MAX_LEVEL, append_complete_subtree, append_leaf, hash_node, root, tree_size};

mod verify;
pub use verify::{PrefixProofInputs, maximum_append_between, verify_prefix_proof};

mod bisect;
pub use bisect::bisection_point;
