//! The assertion poster.

use rebut_protocol::{AssertionCreatedInfo, ChainError, DisputeChain};
use rebut_provider::HistoryCommitmentProvider;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{ChallengeError, manager::claims_match};

/// Periodically proposes new assertions extending the branch this party's
/// execution view agrees with.
#[derive(Clone)]
pub struct Poster {
    chain: Arc<dyn DisputeChain>,
    provider: Arc<HistoryCommitmentProvider>,
    validator_name: Arc<str>,
    minimum_gap_blocks: u64,
}

impl core::fmt::Debug for Poster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Poster").field("validator_name", &self.validator_name).finish_non_exhaustive()
    }
}

impl Poster {
    /// Creates a poster. `minimum_gap_blocks` is how many parent-chain
    /// blocks must pass after the parent assertion's creation before a child
    /// is posted on top of it.
    pub fn new(
        chain: Arc<dyn DisputeChain>,
        provider: Arc<HistoryCommitmentProvider>,
        validator_name: impl Into<Arc<str>>,
        minimum_gap_blocks: u64,
    ) -> Self {
        Self { chain, provider, validator_name: validator_name.into(), minimum_gap_blocks }
    }

    /// Posts one assertion extending the agreed branch's tip, if anything new
    /// has been validated. Returns `None` when there is nothing to post yet:
    /// the tip already claims everything validated, the chain is ahead of
    /// local validation, or the exact assertion exists already. Posting is
    /// idempotent in intent; calling again before confirmation either
    /// extends the same branch or no-ops.
    pub async fn post_assertion(&self) -> Result<Option<AssertionCreatedInfo>, ChallengeError> {
        let parent = self.agreed_branch_tip().await?;
        let inbox_count = self.chain.current_inbox_count().await?;
        if inbox_count == 0 || parent.inbox_max_count > inbox_count {
            return Ok(None);
        }
        let block_number = self.chain.latest_block_number().await?;
        if block_number.saturating_sub(parent.creation_block) < self.minimum_gap_blocks {
            debug!(
                target: "challenge::poster",
                validator = %self.validator_name,
                parent_created = parent.creation_block,
                block_number,
                "Parent assertion too recent, skipping post"
            );
            return Ok(None);
        }

        let after_state = match self
            .provider
            .execution_state_after_previous_state(inbox_count, parent.after_state.global_state)
            .await
        {
            Ok(state) => state,
            Err(err) => {
                let challenge_err = ChallengeError::from(err);
                if challenge_err.is_catching_up() {
                    debug!(
                        target: "challenge::poster",
                        validator = %self.validator_name,
                        inbox_count,
                        "Not yet validated through the inbox, skipping post"
                    );
                    return Ok(None);
                }
                return Err(challenge_err);
            }
        };
        if after_state.global_state == parent.after_state.global_state {
            return Ok(None);
        }

        // Claims are bounded by the batch the end state lands in.
        let gs = after_state.global_state;
        let inbox_max_count = if gs.pos_in_batch == 0 { gs.batch } else { gs.batch + 1 };
        match self
            .chain
            .post_assertion(parent.assertion_hash, after_state, inbox_max_count.max(1))
            .await
        {
            Ok(info) => {
                info!(
                    target: "challenge::poster",
                    validator = %self.validator_name,
                    assertion = %info.assertion_hash,
                    batch = gs.batch,
                    pos_in_batch = gs.pos_in_batch,
                    "Posted assertion"
                );
                Ok(Some(info))
            }
            Err(ChainError::AlreadyExists) => {
                debug!(
                    target: "challenge::poster",
                    validator = %self.validator_name,
                    "Assertion already posted"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Walks from the latest confirmed assertion along children this party's
    /// execution view agrees with, returning the branch tip.
    async fn agreed_branch_tip(&self) -> Result<AssertionCreatedInfo, ChallengeError> {
        let mut tip = self.chain.latest_confirmed().await?;
        let pending = self.chain.assertions_after(tip.assertion_hash).await?;
        loop {
            let mut advanced = false;
            for candidate in &pending {
                if candidate.parent_assertion_hash != tip.assertion_hash {
                    continue;
                }
                let expected = self
                    .provider
                    .execution_state_after_previous_state(
                        candidate.inbox_max_count,
                        tip.after_state.global_state,
                    )
                    .await;
                match expected {
                    Ok(expected) if claims_match(&expected, candidate) => {
                        tip = candidate.clone();
                        advanced = true;
                        break;
                    }
                    // Disagreement or not-yet-validated children never extend
                    // the agreed branch.
                    Ok(_) => {}
                    Err(err) if ChallengeError::from(err.clone()).is_catching_up() => {}
                    Err(err) => return Err(err.into()),
                }
            }
            if !advanced {
                return Ok(tip);
            }
        }
    }
}

