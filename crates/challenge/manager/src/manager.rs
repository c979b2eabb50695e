//! The challenge manager: watches the assertion chain for rivals to the
//! canonical branch and drives edge trackers through their moves.

use rebut_protocol::{
    AssertionCreatedInfo, AssertionHash, Batch, DisputeChain, Height,
};
use rebut_provider::{
    AssociatedAssertionMetadata, HistoryCommitmentProvider, HistoryCommitmentRequest,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use crate::{ChallengeError, EdgeTracker, TrackerState};

/// Watches assertions, opens challenges on forks, and sequentially drives
/// every live edge tracker once per tick.
pub struct ChallengeManager {
    chain: Arc<dyn DisputeChain>,
    provider: Arc<HistoryCommitmentProvider>,
    validator_name: Arc<str>,
    trackers: Vec<EdgeTracker>,
    handled_assertions: HashSet<AssertionHash>,
    challenges_lost: u64,
}

impl core::fmt::Debug for ChallengeManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChallengeManager")
            .field("validator_name", &self.validator_name)
            .field("trackers", &self.trackers.len())
            .finish_non_exhaustive()
    }
}

impl ChallengeManager {
    /// Creates a manager with no live trackers.
    pub fn new(
        chain: Arc<dyn DisputeChain>,
        provider: Arc<HistoryCommitmentProvider>,
        validator_name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            chain,
            provider,
            validator_name: validator_name.into(),
            trackers: Vec::new(),
            handled_assertions: HashSet::new(),
            challenges_lost: 0,
        }
    }

    /// The number of tracked edges confirmed so far.
    pub fn confirmed_edges(&self) -> usize {
        self.trackers.iter().filter(|t| t.state() == TrackerState::Confirmed).count()
    }

    /// The number of challenges this party has lost.
    pub const fn challenges_lost(&self) -> u64 {
        self.challenges_lost
    }

    /// One poll tick: scan for forks, then let every tracker act once.
    /// Errors never escape a tick; transient failures are retried on the
    /// next one.
    pub async fn tick(&mut self) {
        if let Err(err) = self.scan_assertions().await {
            warn!(
                target: "challenge::manager",
                validator = %self.validator_name,
                %err,
                "Assertion scan failed, retrying on next tick"
            );
        }

        let mut spawned = Vec::new();
        for tracker in &mut self.trackers {
            let was_lost = tracker.state() == TrackerState::Lost;
            spawned.extend(tracker.act().await);
            if !was_lost && tracker.state() == TrackerState::Lost {
                self.challenges_lost += 1;
            }
        }
        // Terminal trackers stay for inspection; acting on them is a no-op.
        self.trackers.extend(spawned);
    }

    /// Looks for forks in the assertion tree past the latest confirmed
    /// assertion and opens a block challenge on the child this party's view
    /// supports.
    async fn scan_assertions(&mut self) -> Result<(), ChallengeError> {
        let latest_confirmed = self.chain.latest_confirmed().await?;
        let assertions = self.chain.assertions_after(latest_confirmed.assertion_hash).await?;

        for assertion in &assertions {
            if self.handled_assertions.contains(&assertion.assertion_hash) {
                continue;
            }
            let rivaled = assertions.iter().any(|other| {
                other.assertion_hash != assertion.assertion_hash &&
                    other.parent_assertion_hash == assertion.parent_assertion_hash
            });
            if !rivaled {
                continue;
            }
            let parent = self.chain.read_assertion(assertion.parent_assertion_hash).await?;
            match self.agrees_with_assertion(&parent, assertion).await {
                Ok(true) => {
                    info!(
                        target: "challenge::manager",
                        validator = %self.validator_name,
                        assertion = %assertion.assertion_hash,
                        "Rivaled assertion matches local view, opening challenge"
                    );
                    self.open_challenge(&parent, assertion).await?;
                    self.handled_assertions.insert(assertion.assertion_hash);
                }
                Ok(false) => {
                    debug!(
                        target: "challenge::manager",
                        validator = %self.validator_name,
                        assertion = %assertion.assertion_hash,
                        "Observed rival assertion disagreeing with local view"
                    );
                    self.handled_assertions.insert(assertion.assertion_hash);
                }
                Err(err) if err.is_catching_up() => {
                    // Not validated far enough to judge; leave unhandled and
                    // revisit on a later tick.
                    debug!(
                        target: "challenge::manager",
                        validator = %self.validator_name,
                        assertion = %assertion.assertion_hash,
                        "Deferring assertion judgement until validation catches up"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Whether this party's execution provider reproduces the assertion's
    /// claimed after-state exactly.
    async fn agrees_with_assertion(
        &self,
        parent: &AssertionCreatedInfo,
        assertion: &AssertionCreatedInfo,
    ) -> Result<bool, ChallengeError> {
        let expected = self
            .provider
            .execution_state_after_previous_state(
                assertion.inbox_max_count,
                parent.after_state.global_state,
            )
            .await?;
        Ok(claims_match(&expected, assertion))
    }

    /// Opens the block-level challenge edge claiming `assertion` and spawns
    /// its tracker.
    async fn open_challenge(
        &mut self,
        parent: &AssertionCreatedInfo,
        assertion: &AssertionCreatedInfo,
    ) -> Result<(), ChallengeError> {
        let metadata = assertion_metadata(parent, assertion);
        let start_commitment = self
            .provider
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: metadata,
                upper_challenge_origin_heights: Vec::new(),
                from_height: Height(0),
                up_to_height: Some(Height(0)),
            })
            .await?;
        let end_commitment = self
            .provider
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: metadata,
                upper_challenge_origin_heights: Vec::new(),
                from_height: Height(0),
                up_to_height: None,
            })
            .await?;
        let proof = self
            .provider
            .prefix_proof(
                &HistoryCommitmentRequest {
                    assertion_metadata: metadata,
                    upper_challenge_origin_heights: Vec::new(),
                    from_height: Height(0),
                    up_to_height: None,
                },
                Height(0),
            )
            .await?;
        let edge_id = self
            .chain
            .create_block_challenge_edge(
                assertion.assertion_hash,
                start_commitment,
                end_commitment,
                proof,
            )
            .await?;
        info!(
            target: "challenge::manager",
            validator = %self.validator_name,
            assertion = %assertion.assertion_hash,
            edge = %edge_id,
            "Opened block challenge edge"
        );
        self.trackers.push(EdgeTracker::new(
            self.chain.clone(),
            self.provider.clone(),
            metadata,
            edge_id,
            self.validator_name.clone(),
        ));
        Ok(())
    }
}

/// The provider metadata for commitments under `assertion`.
pub(crate) fn assertion_metadata(
    parent: &AssertionCreatedInfo,
    assertion: &AssertionCreatedInfo,
) -> AssociatedAssertionMetadata {
    AssociatedAssertionMetadata {
        wasm_module_root: assertion.wasm_module_root,
        from_state: parent.after_state.global_state,
        batch_limit: Batch(assertion.after_state.global_state.batch),
    }
}

/// Whether `expected` from a local execution provider matches an assertion's
/// claim. Shared by the poster when following its agreed branch.
pub(crate) fn claims_match(
    expected: &rebut_protocol::ExecutionState,
    assertion: &AssertionCreatedInfo,
) -> bool {
    expected.global_state == assertion.after_state.global_state &&
        expected.end_history_root == assertion.after_state.end_history_root
}
