//! Edge trackers: one small state machine per challenge edge this party
//! created or inherited through bisection.

use rebut_prefix::bisection_point;
use rebut_protocol::{DisputeChain, EdgeId, EdgeStatus, Height};
use rebut_provider::{AssociatedAssertionMetadata, HistoryCommitmentProvider,
    HistoryCommitmentRequest};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::ChallengeError;

/// The tracker's position in an edge's lifecycle.
///
/// One [`EdgeTracker::act`] call performs at most one protocol move, so a
/// manager driving its trackers sequentially submits at most one transaction
/// per tracker per tick and nothing races its own nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Watching the edge, deciding the next move.
    Started,
    /// The range has collapsed to one step at the deepest level; submit the
    /// one-step proof.
    AtOneStepProof,
    /// The edge has a length-one rival above the deepest level; open the next
    /// level's challenge.
    AddingSubchallengeLeaf,
    /// The edge is rivaled over a multi-step range; bisect it.
    Bisecting,
    /// All moves made; waiting for the challenge to resolve.
    AwaitingConfirmation,
    /// The edge was confirmed. Terminal.
    Confirmed,
    /// A move failed fatally: this party's claim lost. Terminal.
    Lost,
}

impl TrackerState {
    /// Whether the tracker has nothing further to do.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Lost)
    }
}

/// Tracks one challenge edge owned by this party, deciding and submitting its
/// moves.
pub struct EdgeTracker {
    chain: Arc<dyn DisputeChain>,
    provider: Arc<HistoryCommitmentProvider>,
    metadata: AssociatedAssertionMetadata,
    edge_id: EdgeId,
    state: TrackerState,
    validator_name: Arc<str>,
}

impl core::fmt::Debug for EdgeTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EdgeTracker")
            .field("edge_id", &self.edge_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EdgeTracker {
    /// Creates a tracker in the started state.
    pub fn new(
        chain: Arc<dyn DisputeChain>,
        provider: Arc<HistoryCommitmentProvider>,
        metadata: AssociatedAssertionMetadata,
        edge_id: EdgeId,
        validator_name: Arc<str>,
    ) -> Self {
        metrics::counter!("challenge_trackers_spawned").increment(1);
        Self { chain, provider, metadata, edge_id, state: TrackerState::Started, validator_name }
    }

    /// The tracked edge.
    pub const fn edge_id(&self) -> EdgeId {
        self.edge_id
    }

    /// The tracker's current state.
    pub const fn state(&self) -> TrackerState {
        self.state
    }

    /// Performs at most one protocol move, returning trackers for any edges
    /// the move created. Transient failures put the tracker back to
    /// [`TrackerState::Started`] for the next tick; fatal failures mean this
    /// party lost and the tracker terminates.
    pub async fn act(&mut self) -> Vec<Self> {
        match self.step().await {
            Ok(spawned) => spawned,
            Err(err) if err.is_fatal() => {
                error!(
                    target: "challenge::tracker",
                    validator = %self.validator_name,
                    edge = %self.edge_id,
                    %err,
                    "Move failed fatally, challenge lost"
                );
                metrics::counter!("challenge_moves_lost").increment(1);
                self.state = TrackerState::Lost;
                Vec::new()
            }
            Err(err) => {
                warn!(
                    target: "challenge::tracker",
                    validator = %self.validator_name,
                    edge = %self.edge_id,
                    %err,
                    "Move failed, retrying on next tick"
                );
                self.state = TrackerState::Started;
                Vec::new()
            }
        }
    }

    async fn step(&mut self) -> Result<Vec<Self>, ChallengeError> {
        match self.state {
            TrackerState::Started => {
                let edge = self.chain.edge(self.edge_id).await?;
                if edge.status == EdgeStatus::Confirmed {
                    self.state = TrackerState::Confirmed;
                    return Ok(Vec::new());
                }
                // An unrivaled edge has no move to make; it wins by the
                // counterparty's silence, which the contracts settle by
                // timer outside this engine.
                if !self.chain.has_rival(self.edge_id).await? {
                    return Ok(Vec::new());
                }
                if self.chain.has_length_one_rival(self.edge_id).await? {
                    let deepest = self.chain.challenge_config().num_levels() - 1;
                    self.state = if u64::from(edge.level.0) == deepest {
                        TrackerState::AtOneStepProof
                    } else {
                        TrackerState::AddingSubchallengeLeaf
                    };
                    return Ok(Vec::new());
                }
                self.state = TrackerState::Bisecting;
                Ok(Vec::new())
            }
            TrackerState::Bisecting => {
                let spawned = self.bisect().await?;
                self.state = TrackerState::AwaitingConfirmation;
                Ok(spawned)
            }
            TrackerState::AddingSubchallengeLeaf => {
                let spawned = self.open_subchallenge().await?;
                self.state = TrackerState::AwaitingConfirmation;
                Ok(vec![spawned])
            }
            TrackerState::AtOneStepProof => {
                self.submit_one_step_proof().await?;
                self.state = TrackerState::AwaitingConfirmation;
                Ok(Vec::new())
            }
            TrackerState::AwaitingConfirmation => {
                let edge = self.chain.edge(self.edge_id).await?;
                if edge.status == EdgeStatus::Confirmed {
                    self.state = TrackerState::Confirmed;
                }
                Ok(Vec::new())
            }
            TrackerState::Confirmed | TrackerState::Lost => Ok(Vec::new()),
        }
    }

    /// Bisects the edge at the canonical midpoint with this party's
    /// commitment and prefix proof, spawning trackers for both children.
    async fn bisect(&self) -> Result<Vec<Self>, ChallengeError> {
        let edge = self.chain.edge(self.edge_id).await?;
        let bisect_to = bisection_point(edge.start_height, edge.end_height).map_err(|_| {
            ChallengeError::Unbisectable { start: edge.start_height, end: edge.end_height }
        })?;
        let origin_heights: Vec<Height> =
            edge.origin_heights.iter().copied().map(Height).collect();

        let commitment = self
            .provider
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: self.metadata,
                upper_challenge_origin_heights: origin_heights.clone(),
                from_height: Height(0),
                up_to_height: Some(Height(bisect_to)),
            })
            .await?;
        let proof = self
            .provider
            .prefix_proof(
                &HistoryCommitmentRequest {
                    assertion_metadata: self.metadata,
                    upper_challenge_origin_heights: origin_heights,
                    from_height: Height(0),
                    up_to_height: Some(Height(edge.end_height)),
                },
                Height(bisect_to),
            )
            .await?;

        let (lower, upper) = self.chain.bisect_edge(self.edge_id, commitment.merkle, proof).await?;
        info!(
            target: "challenge::tracker",
            validator = %self.validator_name,
            edge = %self.edge_id,
            bisect_to,
            "Bisected edge"
        );
        metrics::counter!("challenge_bisections").increment(1);
        Ok(vec![self.child(lower), self.child(upper)])
    }

    /// Opens the next challenge level below this length-one edge and spawns a
    /// tracker for the new level-zero edge.
    async fn open_subchallenge(&self) -> Result<Self, ChallengeError> {
        let edge = self.chain.edge(self.edge_id).await?;
        let mut origin_heights: Vec<Height> =
            edge.origin_heights.iter().copied().map(Height).collect();
        origin_heights.push(Height(edge.start_height));

        let end_history = self
            .provider
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: self.metadata,
                upper_challenge_origin_heights: origin_heights.clone(),
                from_height: Height(0),
                up_to_height: None,
            })
            .await?;
        let start_history = self
            .provider
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: self.metadata,
                upper_challenge_origin_heights: origin_heights.clone(),
                from_height: Height(0),
                up_to_height: Some(Height(0)),
            })
            .await?;
        let proof = self
            .provider
            .prefix_proof(
                &HistoryCommitmentRequest {
                    assertion_metadata: self.metadata,
                    upper_challenge_origin_heights: origin_heights,
                    from_height: Height(0),
                    up_to_height: None,
                },
                Height(0),
            )
            .await?;

        let child =
            self.chain.create_subchallenge_edge(self.edge_id, start_history, end_history, proof).await?;
        info!(
            target: "challenge::tracker",
            validator = %self.validator_name,
            claim = %self.edge_id,
            subchallenge = %child,
            "Opened subchallenge"
        );
        metrics::counter!("challenge_subchallenges_opened").increment(1);
        Ok(self.child(child))
    }

    /// Submits the one-step proof for this deepest-level, length-one edge.
    async fn submit_one_step_proof(&self) -> Result<(), ChallengeError> {
        let edge = self.chain.edge(self.edge_id).await?;
        let origin_heights: Vec<Height> =
            edge.origin_heights.iter().copied().map(Height).collect();
        let (data, before_proof, after_proof) = self
            .provider
            .one_step_proof_data(&self.metadata, &origin_heights, Height(edge.start_height))
            .await?;
        self.chain
            .confirm_edge_by_one_step_proof(self.edge_id, data, before_proof, after_proof)
            .await?;
        info!(
            target: "challenge::tracker",
            validator = %self.validator_name,
            edge = %self.edge_id,
            "One-step proof confirmed"
        );
        metrics::counter!("challenge_one_step_proofs").increment(1);
        Ok(())
    }

    fn child(&self, edge_id: EdgeId) -> Self {
        Self::new(
            self.chain.clone(),
            self.provider.clone(),
            self.metadata,
            edge_id,
            self.validator_name.clone(),
        )
    }
}
