//! The [`HistoryCommitmentProvider`].

use alloy_primitives::{B256, U256};
use alloy_sol_types::SolValue;
use rebut_history::{HistoryCommitment, compute_root, generate_prefix_proof};
use rebut_prefix::{PrefixProofInputs, verify_prefix_proof};
use rebut_protocol::{ChallengeLevel, Height, OneStepData, OpcodeIndex, StepSize};
use std::sync::Arc;
use tracing::debug;

use crate::{
    AssociatedAssertionMetadata, ExecutionProvider, HashCollectorConfig,
    HistoryCommitmentRequest, L2MessageStateCollector, MachineHashCollector, ProofCollector,
    ProviderError,
};

/// Computes history commitments and prefix proofs at every challenge level by
/// dispatching to the right leaf source.
///
/// The challenge leaf heights are per-deployment constants; they must match
/// the on-chain challenge manager's configuration exactly or every proof this
/// provider generates will be rejected on chain.
pub struct HistoryCommitmentProvider {
    l2_message_state_collector: Arc<dyn L2MessageStateCollector>,
    machine_hash_collector: Arc<dyn MachineHashCollector>,
    proof_collector: Arc<dyn ProofCollector>,
    execution_provider: Arc<dyn ExecutionProvider>,
    challenge_leaf_heights: Vec<Height>,
}

impl core::fmt::Debug for HistoryCommitmentProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HistoryCommitmentProvider")
            .field("challenge_leaf_heights", &self.challenge_leaf_heights)
            .finish_non_exhaustive()
    }
}

impl HistoryCommitmentProvider {
    /// Creates a provider over the three leaf sources and the execution
    /// provider.
    pub fn new(
        l2_message_state_collector: Arc<dyn L2MessageStateCollector>,
        machine_hash_collector: Arc<dyn MachineHashCollector>,
        proof_collector: Arc<dyn ProofCollector>,
        execution_provider: Arc<dyn ExecutionProvider>,
        challenge_leaf_heights: Vec<Height>,
    ) -> Self {
        Self {
            l2_message_state_collector,
            machine_hash_collector,
            proof_collector,
            execution_provider,
            challenge_leaf_heights,
        }
    }

    /// The assertable execution state following `previous_global_state`,
    /// delegated to the execution provider. See
    /// [`ExecutionProvider::execution_state_after_previous_state`].
    pub async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: rebut_protocol::GlobalState,
    ) -> Result<rebut_protocol::ExecutionState, ProviderError> {
        self.execution_provider
            .execution_state_after_previous_state(max_inbox_count, previous_global_state)
            .await
    }

    /// Computes a history commitment over the range the request names.
    pub async fn history_commitment(
        &self,
        req: &HistoryCommitmentRequest,
    ) -> Result<HistoryCommitment, ProviderError> {
        let leaves = self.history_commitment_impl(req).await?;
        let virtual_size =
            self.virtual_from(req.up_to_height, &req.upper_challenge_origin_heights)?;
        Ok(HistoryCommitment::new(&leaves, virtual_size)?)
    }

    /// Collects the leaf hashes for a request, dispatching on the number of
    /// upper challenge origin heights: none means the block level, one per
    /// enclosing machine level below that.
    async fn history_commitment_impl(
        &self,
        req: &HistoryCommitmentRequest,
    ) -> Result<Vec<B256>, ProviderError> {
        let validated_heights =
            self.validate_origin_heights(&req.upper_challenge_origin_heights)?;

        let from_block_challenge_height = match validated_heights.first() {
            None => {
                return self
                    .l2_message_state_collector
                    .l2_message_states_up_to(
                        req.assertion_metadata.from_state,
                        req.assertion_metadata.batch_limit,
                        req.up_to_height,
                    )
                    .await;
            }
            Some(height) => *height,
        };

        let desired_challenge_level = deepest_requested_challenge_level(validated_heights);

        // The machine stepping for this commitment starts at the opcode the
        // enclosing levels have narrowed the dispute to.
        let machine_start_index =
            self.compute_machine_start_index(validated_heights, req.from_height)?;
        let step_size = self.compute_step_size(desired_challenge_level)?;
        let num_desired_hashes =
            self.compute_required_number_of_hashes(desired_challenge_level, req.up_to_height)?;

        // The first origin height addresses the block challenge level, which
        // is over messages rather than opcodes; the machine levels start at
        // the second entry.
        let cfg = HashCollectorConfig {
            assertion_metadata: req.assertion_metadata,
            block_challenge_height: from_block_challenge_height,
            step_heights: validated_heights[1..].to_vec(),
            num_desired_hashes,
            machine_start_index,
            step_size,
        };
        debug!(
            target: "provider",
            level = desired_challenge_level,
            start_index = machine_start_index.0,
            step_size = step_size.0,
            hashes = num_desired_hashes,
            "collecting machine hashes"
        );
        self.machine_hash_collector.collect_machine_hashes(&cfg).await
    }

    /// Produces the abi-packed prefix proof showing the commitment at
    /// `prefix_height` is a prefix of the commitment over the request's full
    /// range.
    ///
    /// A `prefix_height` equal to the request's upper bound produces the
    /// degenerate proof over the same range, which verifies trivially; the
    /// protocol permits it and some confirmation paths rely on it.
    pub async fn prefix_proof(
        &self,
        req: &HistoryCommitmentRequest,
        prefix_height: Height,
    ) -> Result<Vec<u8>, ProviderError> {
        let leaves = self.history_commitment_impl(req).await?;
        let virtual_size =
            self.virtual_from(req.up_to_height, &req.upper_challenge_origin_heights)?;

        // The prefix may extend past the real leaves into virtual padding.
        let pre_size = prefix_height.0 + 1;
        let prefix_len = (pre_size as usize).min(leaves.len());
        let prefix_root = compute_root(&leaves[..prefix_len], pre_size)?;
        let full_root = compute_root(&leaves, virtual_size)?;

        let (pre_expansion, proof) = generate_prefix_proof(prefix_height.0, &leaves, virtual_size)?;

        // Re-verify before handing the proof out for submission. A proof that
        // fails here would revert on chain; surfacing the bug locally is
        // strictly better than burning gas discovering it.
        verify_prefix_proof(&PrefixProofInputs {
            pre_root: prefix_root,
            pre_size,
            post_root: full_root,
            post_size: virtual_size,
            pre_expansion: &pre_expansion,
            prefix_proof: &proof,
        })?;

        Ok((pre_expansion, proof).abi_encode())
    }

    /// Assembles the data needed to confirm a deepest-level length-one edge:
    /// the one-step proof payload plus the boundary-leaf inclusion proofs of
    /// the step's before and after states.
    pub async fn one_step_proof_data(
        &self,
        assertion_metadata: &AssociatedAssertionMetadata,
        start_heights: &[Height],
        up_to_height: Height,
    ) -> Result<(OneStepData, Vec<B256>, Vec<B256>), ProviderError> {
        if start_heights.is_empty() {
            return Err(ProviderError::MissingOriginHeights);
        }
        let end_commit = self
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: *assertion_metadata,
                upper_challenge_origin_heights: start_heights.to_vec(),
                from_height: Height(0),
                up_to_height: Some(Height(up_to_height.0 + 1)),
            })
            .await?;
        let start_commit = self
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: *assertion_metadata,
                upper_challenge_origin_heights: start_heights.to_vec(),
                from_height: Height(0),
                up_to_height: Some(up_to_height),
            })
            .await?;

        let machine_index = self.compute_machine_start_index(start_heights, up_to_height)?;
        let proof = self
            .proof_collector
            .collect_proof(assertion_metadata, start_heights[0], machine_index)
            .await?;

        let data = OneStepData {
            before_hash: start_commit.last_leaf,
            after_hash: end_commit.last_leaf,
            proof,
        };
        Ok((data, start_commit.last_leaf_proof, end_commit.last_leaf_proof))
    }

    /// Whether this party's view agrees with a claimed commitment at a
    /// challenge level: the local recomputation at the claimed height must
    /// reproduce the claimed merkle root.
    pub async fn agrees_with_history_commitment(
        &self,
        challenge_level: ChallengeLevel,
        req: &HistoryCommitmentRequest,
        claimed_height: u64,
        claimed_merkle: B256,
    ) -> Result<bool, ProviderError> {
        let local = self
            .history_commitment(&HistoryCommitmentRequest {
                assertion_metadata: req.assertion_metadata,
                upper_challenge_origin_heights: if challenge_level.is_block_level() {
                    Vec::new()
                } else {
                    req.upper_challenge_origin_heights.clone()
                },
                from_height: Height(0),
                up_to_height: Some(Height(claimed_height)),
            })
            .await?;
        Ok(local.height == claimed_height && local.merkle == claimed_merkle)
    }

    /// The virtual size for a commitment: the requested height plus one, or
    /// the level's full leaf height plus one when the request is unbounded.
    fn virtual_from(
        &self,
        up_to_height: Option<Height>,
        origin_heights: &[Height],
    ) -> Result<u64, ProviderError> {
        match up_to_height {
            Some(height) => Ok(height.0 + 1),
            None => {
                let validated = self.validate_origin_heights(origin_heights)?;
                let level = deepest_requested_challenge_level(validated);
                Ok(self.leaf_height_at_challenge_level(level)?.0 + 1)
            }
        }
    }

    /// The number of leaf hashes a commitment at `challenge_level` needs:
    /// heights start at zero, so it is the end height plus one.
    fn compute_required_number_of_hashes(
        &self,
        challenge_level: u64,
        up_to_height: Option<Height>,
    ) -> Result<u64, ProviderError> {
        let max_height = self.leaf_height_at_challenge_level(challenge_level)?;
        let end = match up_to_height {
            None => max_height,
            Some(end) => {
                if end > max_height {
                    return Err(ProviderError::HeightAboveLevelMax {
                        end: end.0,
                        max: max_height.0,
                    });
                }
                end
            }
        };
        Ok(end.0 + 1)
    }

    /// The absolute opcode index the machine must be stepped to before
    /// hashing starts: the sum over enclosing machine levels of that level's
    /// height times the number of opcodes one of its steps spans.
    ///
    /// Accumulated in 256-bit arithmetic because the heights come from
    /// adversarial on-chain inputs; an overflowing product must surface as an
    /// error, not wrap.
    fn compute_machine_start_index(
        &self,
        upper_challenge_origin_heights: &[Height],
        from_height: Height,
    ) -> Result<OpcodeIndex, ProviderError> {
        if upper_challenge_origin_heights.is_empty() {
            return Ok(OpcodeIndex(0));
        }
        // Skip the block level entry; the machine levels follow it, and the
        // requested height is one level deeper still.
        let mut heights: Vec<Height> = upper_challenge_origin_heights[1..].to_vec();
        heights.push(from_height);
        let leaf_heights = &self.challenge_leaf_heights[1..];

        let mut opcode_index = U256::ZERO;
        for (idx, height) in heights.iter().enumerate() {
            let mut span = U256::from(1u64);
            for leaf_height in &leaf_heights[idx + 1..] {
                span *= U256::from(leaf_height.0);
            }
            opcode_index += span * U256::from(height.0);
        }
        u64::try_from(opcode_index)
            .map(OpcodeIndex)
            .map_err(|_| ProviderError::MachineStartOverflow)
    }

    /// The opcodes between two consecutive leaves at `challenge_level`: one
    /// at the deepest level, otherwise the product of the leaf heights of all
    /// deeper levels.
    fn compute_step_size(&self, challenge_level: u64) -> Result<StepSize, ProviderError> {
        if challenge_level + 1 == self.number_of_challenge_levels() {
            return Ok(StepSize(1));
        }
        let mut total = 1u64;
        for leaf_height in &self.challenge_leaf_heights[(challenge_level + 1) as usize..] {
            total *= leaf_height.0;
        }
        Ok(StepSize(total))
    }

    fn validate_origin_heights<'a>(
        &self,
        upper_challenge_origin_heights: &'a [Height],
    ) -> Result<&'a [Height], ProviderError> {
        if upper_challenge_origin_heights.len() as u64 >= self.number_of_challenge_levels() {
            return Err(ProviderError::LevelOutOfRange {
                level: upper_challenge_origin_heights.len() as u64,
                num_levels: self.number_of_challenge_levels(),
            });
        }
        Ok(upper_challenge_origin_heights)
    }

    fn leaf_height_at_challenge_level(
        &self,
        challenge_level: u64,
    ) -> Result<Height, ProviderError> {
        self.challenge_leaf_heights.get(challenge_level as usize).copied().ok_or(
            ProviderError::LevelOutOfRange {
                level: challenge_level,
                num_levels: self.number_of_challenge_levels(),
            },
        )
    }

    fn number_of_challenge_levels(&self) -> u64 {
        self.challenge_leaf_heights.len() as u64
    }
}

/// A request's challenge level is the number of enclosing levels it names.
fn deepest_requested_challenge_level(requested_heights: &[Height]) -> u64 {
    requested_heights.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use async_trait::async_trait;
    use mockall::{mock, predicate};
    use rebut_protocol::{Batch, GlobalState};
    use std::sync::Arc;

    mock!(
        pub Messages {}

        #[async_trait]
        impl L2MessageStateCollector for Messages {
            async fn l2_message_states_up_to(
                &self,
                from_state: GlobalState,
                batch_limit: Batch,
                to_height: Option<Height>,
            ) -> Result<Vec<B256>, ProviderError>;
        }
    );

    mock!(
        pub Machines {}

        #[async_trait]
        impl MachineHashCollector for Machines {
            async fn collect_machine_hashes(
                &self,
                cfg: &HashCollectorConfig,
            ) -> Result<Vec<B256>, ProviderError>;
        }
    );

    mock!(
        pub Proofs {}

        #[async_trait]
        impl ProofCollector for Proofs {
            async fn collect_proof(
                &self,
                assertion_metadata: &AssociatedAssertionMetadata,
                block_challenge_height: Height,
                machine_index: OpcodeIndex,
            ) -> Result<Vec<u8>, ProviderError>;
        }
    );

    mock!(
        pub Execution {}

        #[async_trait]
        impl ExecutionProvider for Execution {
            async fn execution_state_after_previous_state(
                &self,
                max_inbox_count: u64,
                previous_global_state: GlobalState,
            ) -> Result<rebut_protocol::ExecutionState, ProviderError>;
        }
    );

    const LEAF_HEIGHTS: [u64; 3] = [32, 16, 8];

    fn leaves(n: u64) -> Vec<B256> {
        (0..n).map(|i| keccak256(i.to_be_bytes())).collect()
    }

    fn provider_with(
        messages: MockMessages,
        machines: MockMachines,
        proofs: MockProofs,
    ) -> HistoryCommitmentProvider {
        HistoryCommitmentProvider::new(
            Arc::new(messages),
            Arc::new(machines),
            Arc::new(proofs),
            Arc::new(MockExecution::new()),
            LEAF_HEIGHTS.map(Height).to_vec(),
        )
    }

    fn request(origin_heights: Vec<Height>, up_to: Option<Height>) -> HistoryCommitmentRequest {
        HistoryCommitmentRequest {
            assertion_metadata: AssociatedAssertionMetadata {
                batch_limit: Batch(2),
                ..Default::default()
            },
            upper_challenge_origin_heights: origin_heights,
            from_height: Height(0),
            up_to_height: up_to,
        }
    }

    #[tokio::test]
    async fn empty_origin_heights_dispatch_to_block_level() {
        let mut messages = MockMessages::new();
        messages
            .expect_l2_message_states_up_to()
            .with(
                predicate::always(),
                predicate::eq(Batch(2)),
                predicate::eq(Some(Height(7))),
            )
            .once()
            .returning(|_, _, _| Ok(leaves(8)));
        let mut machines = MockMachines::new();
        machines.expect_collect_machine_hashes().never();

        let provider = provider_with(messages, machines, MockProofs::new());
        let commitment =
            provider.history_commitment(&request(vec![], Some(Height(7)))).await.unwrap();
        assert_eq!(commitment.height, 7);
    }

    #[tokio::test]
    async fn one_origin_height_dispatches_to_big_step_level() {
        let mut messages = MockMessages::new();
        messages.expect_l2_message_states_up_to().never();
        let mut machines = MockMachines::new();
        machines
            .expect_collect_machine_hashes()
            .withf(|cfg: &HashCollectorConfig| {
                cfg.block_challenge_height == Height(5) &&
                    cfg.step_heights.is_empty() &&
                    // Big-step leaves are 8 opcodes apart: the small-step leaf height.
                    cfg.step_size == StepSize(8) &&
                    cfg.machine_start_index == OpcodeIndex(0) &&
                    cfg.num_desired_hashes == 17
            })
            .once()
            .returning(|_| Ok(leaves(17)));

        let provider = provider_with(messages, machines, MockProofs::new());
        let commitment =
            provider.history_commitment(&request(vec![Height(5)], None)).await.unwrap();
        assert_eq!(commitment.height, 16);
    }

    #[tokio::test]
    async fn two_origin_heights_dispatch_to_small_step_level() {
        let mut machines = MockMachines::new();
        machines
            .expect_collect_machine_hashes()
            .withf(|cfg: &HashCollectorConfig| {
                cfg.block_challenge_height == Height(5) &&
                    cfg.step_heights == vec![Height(3)] &&
                    cfg.step_size == StepSize(1) &&
                    // Big-step 3 spans opcodes [24, 32).
                    cfg.machine_start_index == OpcodeIndex(24) &&
                    cfg.num_desired_hashes == 9
            })
            .once()
            .returning(|_| Ok(leaves(9)));

        let provider = provider_with(MockMessages::new(), machines, MockProofs::new());
        let commitment = provider
            .history_commitment(&request(vec![Height(5), Height(3)], None))
            .await
            .unwrap();
        assert_eq!(commitment.height, 8);
    }

    #[tokio::test]
    async fn too_many_origin_heights_are_rejected() {
        let provider =
            provider_with(MockMessages::new(), MockMachines::new(), MockProofs::new());
        let err = provider
            .history_commitment(&request(
                vec![Height(1), Height(1), Height(1)],
                Some(Height(1)),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::LevelOutOfRange { level: 3, num_levels: 3 });
    }

    #[tokio::test]
    async fn heights_above_the_level_maximum_are_rejected() {
        let mut machines = MockMachines::new();
        machines.expect_collect_machine_hashes().never();
        let provider = provider_with(MockMessages::new(), machines, MockProofs::new());
        let err = provider
            .history_commitment(&request(vec![Height(5)], Some(Height(17))))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::HeightAboveLevelMax { end: 17, max: 16 });
    }

    #[tokio::test]
    async fn empty_leaf_ranges_surface_invalid_leaf_count() {
        let mut messages = MockMessages::new();
        messages.expect_l2_message_states_up_to().returning(|_, _, _| Ok(Vec::new()));
        let provider = provider_with(messages, MockMachines::new(), MockProofs::new());
        let err =
            provider.history_commitment(&request(vec![], Some(Height(3)))).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Commitment(rebut_history::CommitmentError::EmptyLeaves)
        );
    }

    #[tokio::test]
    async fn catching_up_passes_through() {
        let mut messages = MockMessages::new();
        messages
            .expect_l2_message_states_up_to()
            .returning(|_, _, _| Err(ProviderError::ChainCatchingUp { batch_count: 9 }));
        let provider = provider_with(messages, MockMachines::new(), MockProofs::new());
        let err =
            provider.history_commitment(&request(vec![], Some(Height(3)))).await.unwrap_err();
        assert_eq!(err, ProviderError::ChainCatchingUp { batch_count: 9 });
    }

    #[tokio::test]
    async fn prefix_proof_round_trips_through_the_verifier() {
        let mut messages = MockMessages::new();
        messages.expect_l2_message_states_up_to().returning(|_, _, _| Ok(leaves(9)));
        let provider = provider_with(messages, MockMachines::new(), MockProofs::new());

        let packed =
            provider.prefix_proof(&request(vec![], Some(Height(8))), Height(2)).await.unwrap();
        let (pre_expansion, proof) = <(Vec<B256>, Vec<B256>)>::abi_decode(&packed).unwrap();
        verify_prefix_proof(&PrefixProofInputs {
            pre_root: compute_root(&leaves(9)[..3], 3).unwrap(),
            pre_size: 3,
            post_root: compute_root(&leaves(9), 9).unwrap(),
            post_size: 9,
            pre_expansion: &pre_expansion,
            prefix_proof: &proof,
        })
        .unwrap();
    }

    #[tokio::test]
    async fn degenerate_prefix_proof_at_upper_bound_is_allowed() {
        let mut messages = MockMessages::new();
        messages.expect_l2_message_states_up_to().returning(|_, _, _| Ok(leaves(9)));
        let provider = provider_with(messages, MockMachines::new(), MockProofs::new());
        provider.prefix_proof(&request(vec![], Some(Height(8))), Height(8)).await.unwrap();
    }

    #[tokio::test]
    async fn one_step_proof_data_carries_boundary_leaves() {
        let small_leaves = leaves(9);
        let expected_before = small_leaves[4];
        let expected_after = small_leaves[5];

        let mut machines = MockMachines::new();
        let hashes = small_leaves.clone();
        machines.expect_collect_machine_hashes().returning(move |cfg| {
            Ok(hashes[..cfg.num_desired_hashes as usize].to_vec())
        });
        let mut proofs = MockProofs::new();
        proofs
            .expect_collect_proof()
            .with(
                predicate::always(),
                predicate::eq(Height(5)),
                // Big-step 3 starts at opcode 24; small-step 4 inside it.
                predicate::eq(OpcodeIndex(28)),
            )
            .once()
            .returning(|_, _, _| Ok(vec![0xab]));

        let provider = provider_with(MockMessages::new(), machines, proofs);
        let (data, before_proof, after_proof) = provider
            .one_step_proof_data(
                &AssociatedAssertionMetadata::default(),
                &[Height(5), Height(3)],
                Height(4),
            )
            .await
            .unwrap();
        assert_eq!(data.before_hash, expected_before);
        assert_eq!(data.after_hash, expected_after);
        assert_eq!(data.proof, vec![0xab]);
        assert!(!before_proof.is_empty());
        assert!(!after_proof.is_empty());
    }

    #[tokio::test]
    async fn agreement_requires_matching_root() {
        let mut messages = MockMessages::new();
        messages
            .expect_l2_message_states_up_to()
            .returning(|_, _, to| Ok(leaves(to.map_or(8, |h| h.0 + 1))));
        let provider = provider_with(messages, MockMachines::new(), MockProofs::new());

        let local = compute_root(&leaves(8)[..6], 6).unwrap();
        let req = request(vec![], None);
        assert!(
            provider
                .agrees_with_history_commitment(ChallengeLevel::BLOCK, &req, 5, local)
                .await
                .unwrap()
        );
        assert!(
            !provider
                .agrees_with_history_commitment(ChallengeLevel::BLOCK, &req, 5, B256::ZERO)
                .await
                .unwrap()
        );
    }
}
