#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod errors;
pub use errors::ChallengeError;

mod tracker;
pub use tracker::{EdgeTracker, TrackerState};

mod manager;
pub use manager::ChallengeManager;

mod poster;
pub use poster::Poster;

mod stack;
pub use stack::{ChallengeStack, ChallengeStackBuilder};
