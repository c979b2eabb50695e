//! An in-memory dispute chain.
//!
//! [`MockDisputeChain`] stands in for the rollup and challenge contracts in
//! tests. It is not a stub: bisections are checked with the real prefix proof
//! verifier, one-step proofs are checked against boundary-leaf inclusion
//! proofs and a caller-supplied execution oracle, and rivalry is derived from
//! mutual ids the same way the contracts derive it. A dishonest party loses
//! against this chain for the same reason it would lose on the real one.
//!
//! Differences from the contracts, chosen to keep tests focused on the
//! engine: edge creation is idempotent (re-creating an existing edge returns
//! its id instead of reverting), sub-challenge anchoring to the claim edge's
//! boundary leaves is not re-verified, and timer-based confirmation does not
//! exist — edges confirm by one-step proof only.

use alloy_primitives::B256;
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use rebut_history::{HistoryCommitment, verify_leaf_inclusion};
use rebut_prefix::{PrefixProofInputs, bisection_point, verify_prefix_proof};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    AssertionCreatedInfo, AssertionHash, ChainError, ChallengeConfig, ChallengeLevel, DisputeChain,
    EdgeId, EdgeSnapshot, EdgeStatus, ExecutionState, OneStepData,
};

/// Executes the single machine step committed to by a one-step proof payload
/// and returns the canonical post-state hash. This is the mock's stand-in for
/// the on-chain one-step prover: the arbiter of what execution actually does.
pub trait OneStepOracle: Send + Sync {
    /// Runs the step described by `proof`.
    fn execute(&self, proof: &[u8]) -> Result<B256, ChainError>;
}

#[derive(Debug, Default)]
struct ChainState {
    assertions: HashMap<AssertionHash, AssertionCreatedInfo>,
    order: Vec<AssertionHash>,
    latest_confirmed: AssertionHash,
    edges: HashMap<EdgeId, EdgeSnapshot>,
    rivals: HashMap<B256, Vec<EdgeId>>,
    inbox_count: u64,
    block_number: u64,
}

/// See the module docs.
pub struct MockDisputeChain {
    config: ChallengeConfig,
    oracle: Arc<dyn OneStepOracle>,
    state: Mutex<ChainState>,
}

impl core::fmt::Debug for MockDisputeChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MockDisputeChain").field("config", &self.config).finish_non_exhaustive()
    }
}

impl MockDisputeChain {
    /// Creates a chain with a confirmed genesis assertion at `genesis_state`
    /// and `inbox_count` batches in the inbox.
    pub fn new(
        config: ChallengeConfig,
        oracle: Arc<dyn OneStepOracle>,
        genesis_state: ExecutionState,
        inbox_count: u64,
    ) -> Self {
        let genesis = AssertionCreatedInfo {
            after_state: genesis_state,
            inbox_max_count: 1,
            wasm_module_root: config.wasm_module_root,
            ..Default::default()
        };
        let genesis = AssertionCreatedInfo { assertion_hash: genesis.compute_hash(), ..genesis };
        let mut state = ChainState {
            latest_confirmed: genesis.assertion_hash,
            inbox_count,
            block_number: 1,
            ..Default::default()
        };
        state.order.push(genesis.assertion_hash);
        state.assertions.insert(genesis.assertion_hash, genesis);
        Self { config, oracle, state: Mutex::new(state) }
    }

    /// Makes more inbox batches visible to posters.
    pub fn set_inbox_count(&self, count: u64) {
        self.state.lock().unwrap().inbox_count = count;
    }

    /// All edges currently known, in no particular order. Test inspection
    /// only.
    pub fn edges(&self) -> Vec<EdgeSnapshot> {
        self.state.lock().unwrap().edges.values().cloned().collect()
    }

    fn leaf_height(&self, level: ChallengeLevel) -> Result<u64, ChainError> {
        self.config
            .leaf_heights
            .get(level.0 as usize)
            .copied()
            .ok_or(ChainError::InvalidMove("no such challenge level"))
    }

    fn deepest_level(&self) -> ChallengeLevel {
        ChallengeLevel(self.config.leaf_heights.len() as u8 - 1)
    }

    /// Decodes the abi-packed `(bytes32[], bytes32[])` proof tuple and runs
    /// the verifier, exactly as the contract would.
    fn check_prefix_proof(
        pre_root: B256,
        pre_size: u64,
        post_root: B256,
        post_size: u64,
        packed_proof: &[u8],
    ) -> Result<(), ChainError> {
        let (pre_expansion, proof) = <(Vec<B256>, Vec<B256>)>::abi_decode(packed_proof)
            .map_err(|_| ChainError::InvalidMove("malformed prefix proof encoding"))?;
        verify_prefix_proof(&PrefixProofInputs {
            pre_root,
            pre_size,
            post_root,
            post_size,
            pre_expansion: &pre_expansion,
            prefix_proof: &proof,
        })?;
        Ok(())
    }

    /// Inserts an edge if its id is new, and returns the id either way.
    fn get_or_create_edge(state: &mut ChainState, snapshot: EdgeSnapshot) -> EdgeId {
        let id = snapshot.compute_id();
        let snapshot = EdgeSnapshot { id, ..snapshot };
        if state.edges.contains_key(&id) {
            return id;
        }
        state.rivals.entry(snapshot.mutual_id()).or_default().push(id);
        state.edges.insert(id, snapshot);
        id
    }

    fn rivaled(state: &ChainState, edge: &EdgeSnapshot) -> bool {
        state.rivals.get(&edge.mutual_id()).is_some_and(|ids| ids.len() > 1)
    }
}

#[async_trait]
impl DisputeChain for MockDisputeChain {
    fn challenge_config(&self) -> &ChallengeConfig {
        &self.config
    }

    async fn latest_confirmed(&self) -> Result<AssertionCreatedInfo, ChainError> {
        let state = self.state.lock().unwrap();
        state
            .assertions
            .get(&state.latest_confirmed)
            .cloned()
            .ok_or(ChainError::NotFound("assertion"))
    }

    async fn assertions_after(
        &self,
        assertion: AssertionHash,
    ) -> Result<Vec<AssertionCreatedInfo>, ChainError> {
        let state = self.state.lock().unwrap();
        let from = state
            .order
            .iter()
            .position(|hash| *hash == assertion)
            .ok_or(ChainError::NotFound("assertion"))?;
        Ok(state.order[from + 1..].iter().map(|hash| state.assertions[hash].clone()).collect())
    }

    async fn read_assertion(
        &self,
        assertion: AssertionHash,
    ) -> Result<AssertionCreatedInfo, ChainError> {
        self.state
            .lock()
            .unwrap()
            .assertions
            .get(&assertion)
            .cloned()
            .ok_or(ChainError::NotFound("assertion"))
    }

    async fn current_inbox_count(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().inbox_count)
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn post_assertion(
        &self,
        parent: AssertionHash,
        after_state: ExecutionState,
        inbox_max_count: u64,
    ) -> Result<AssertionCreatedInfo, ChainError> {
        let mut state = self.state.lock().unwrap();
        let parent_info =
            state.assertions.get(&parent).cloned().ok_or(ChainError::NotFound("assertion"))?;
        if inbox_max_count == 0 || inbox_max_count > state.inbox_count {
            return Err(ChainError::BadSequencerInboxMessage);
        }
        let info = AssertionCreatedInfo {
            assertion_hash: AssertionHash::default(),
            parent_assertion_hash: parent,
            before_state: parent_info.after_state,
            after_state,
            inbox_max_count,
            wasm_module_root: self.config.wasm_module_root,
            creation_block: state.block_number,
        };
        let info = AssertionCreatedInfo { assertion_hash: info.compute_hash(), ..info };
        if state.assertions.contains_key(&info.assertion_hash) {
            return Err(ChainError::AlreadyExists);
        }
        state.block_number += 1;
        state.order.push(info.assertion_hash);
        state.assertions.insert(info.assertion_hash, info.clone());
        Ok(info)
    }

    async fn create_block_challenge_edge(
        &self,
        assertion: AssertionHash,
        start_commitment: HistoryCommitment,
        end_commitment: HistoryCommitment,
        prefix_proof: Vec<u8>,
    ) -> Result<EdgeId, ChainError> {
        let leaf_height = self.leaf_height(ChallengeLevel::BLOCK)?;
        let mut state = self.state.lock().unwrap();
        let info =
            state.assertions.get(&assertion).cloned().ok_or(ChainError::NotFound("assertion"))?;
        let siblings = state
            .assertions
            .values()
            .filter(|a| a.parent_assertion_hash == info.parent_assertion_hash)
            .count();
        if siblings < 2 {
            return Err(ChainError::InvalidMove("assertion is unrivaled"));
        }
        if start_commitment.height != 0 || end_commitment.height != leaf_height {
            return Err(ChainError::InvalidMove("commitment heights do not span the level"));
        }
        if end_commitment.merkle != info.after_state.end_history_root {
            return Err(ChainError::InvalidMove("end commitment does not match the claim"));
        }
        Self::check_prefix_proof(
            start_commitment.merkle,
            1,
            end_commitment.merkle,
            leaf_height + 1,
            &prefix_proof,
        )?;
        let snapshot = EdgeSnapshot {
            level: ChallengeLevel::BLOCK,
            origin_id: info.parent_assertion_hash.0,
            start_height: 0,
            start_commitment: start_commitment.merkle,
            end_height: leaf_height,
            end_commitment: end_commitment.merkle,
            ..Default::default()
        };
        Ok(Self::get_or_create_edge(&mut state, snapshot))
    }

    async fn create_subchallenge_edge(
        &self,
        claim: EdgeId,
        start_commitment: HistoryCommitment,
        end_commitment: HistoryCommitment,
        prefix_proof: Vec<u8>,
    ) -> Result<EdgeId, ChainError> {
        let mut state = self.state.lock().unwrap();
        let claim_edge =
            state.edges.get(&claim).cloned().ok_or(ChainError::NotFound("edge"))?;
        if claim_edge.length() != 1 || !Self::rivaled(&state, &claim_edge) {
            return Err(ChainError::InvalidMove("claim is not at a one-step fork"));
        }
        let level = claim_edge.level.next();
        let leaf_height = self.leaf_height(level)?;
        if start_commitment.height != 0 || end_commitment.height != leaf_height {
            return Err(ChainError::InvalidMove("commitment heights do not span the level"));
        }
        Self::check_prefix_proof(
            start_commitment.merkle,
            1,
            end_commitment.merkle,
            leaf_height + 1,
            &prefix_proof,
        )?;
        let mut origin_heights = claim_edge.origin_heights.clone();
        origin_heights.push(claim_edge.start_height);
        let snapshot = EdgeSnapshot {
            level,
            origin_id: claim_edge.mutual_id(),
            start_height: 0,
            start_commitment: start_commitment.merkle,
            end_height: leaf_height,
            end_commitment: end_commitment.merkle,
            origin_heights,
            ..Default::default()
        };
        Ok(Self::get_or_create_edge(&mut state, snapshot))
    }

    async fn bisect_edge(
        &self,
        edge: EdgeId,
        bisection_root: B256,
        prefix_proof: Vec<u8>,
    ) -> Result<(EdgeId, EdgeId), ChainError> {
        let mut state = self.state.lock().unwrap();
        let snapshot = state.edges.get(&edge).cloned().ok_or(ChainError::NotFound("edge"))?;
        if snapshot.children.is_some() {
            return Err(ChainError::InvalidMove("edge already bisected"));
        }
        if !Self::rivaled(&state, &snapshot) {
            return Err(ChainError::InvalidMove("cannot bisect an unrivaled edge"));
        }
        let mid = bisection_point(snapshot.start_height, snapshot.end_height)
            .map_err(|_| ChainError::InvalidMove("edge is not bisectable"))?;
        Self::check_prefix_proof(
            bisection_root,
            mid + 1,
            snapshot.end_commitment,
            snapshot.end_height + 1,
            &prefix_proof,
        )?;
        let lower = EdgeSnapshot {
            id: EdgeId::default(),
            end_height: mid,
            end_commitment: bisection_root,
            ..snapshot.clone()
        };
        let upper = EdgeSnapshot {
            id: EdgeId::default(),
            start_height: mid,
            start_commitment: bisection_root,
            ..snapshot.clone()
        };
        let lower_id = Self::get_or_create_edge(&mut state, lower);
        let upper_id = Self::get_or_create_edge(&mut state, upper);
        if let Some(stored) = state.edges.get_mut(&edge) {
            stored.children = Some((lower_id, upper_id));
        }
        Ok((lower_id, upper_id))
    }

    async fn confirm_edge_by_one_step_proof(
        &self,
        edge: EdgeId,
        data: OneStepData,
        before_proof: Vec<B256>,
        after_proof: Vec<B256>,
    ) -> Result<(), ChainError> {
        let snapshot = {
            let state = self.state.lock().unwrap();
            state.edges.get(&edge).cloned().ok_or(ChainError::NotFound("edge"))?
        };
        if snapshot.level != self.deepest_level() || snapshot.length() != 1 {
            return Err(ChainError::InvalidMove("edge is not a deepest-level single step"));
        }
        if !verify_leaf_inclusion(
            snapshot.start_commitment,
            snapshot.start_height,
            data.before_hash,
            &before_proof,
        ) {
            return Err(ChainError::InvalidInclusionProof);
        }
        let canonical_after = self.oracle.execute(&data.proof)?;
        if canonical_after != data.after_hash {
            return Err(ChainError::SameOspEnd);
        }
        if !verify_leaf_inclusion(
            snapshot.end_commitment,
            snapshot.end_height,
            data.after_hash,
            &after_proof,
        ) {
            return Err(ChainError::SameOspEnd);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(stored) = state.edges.get_mut(&edge) {
            stored.status = EdgeStatus::Confirmed;
        }
        Ok(())
    }

    async fn edge(&self, edge: EdgeId) -> Result<EdgeSnapshot, ChainError> {
        self.state
            .lock()
            .unwrap()
            .edges
            .get(&edge)
            .cloned()
            .ok_or(ChainError::NotFound("edge"))
    }

    async fn has_rival(&self, edge: EdgeId) -> Result<bool, ChainError> {
        let state = self.state.lock().unwrap();
        let snapshot = state.edges.get(&edge).ok_or(ChainError::NotFound("edge"))?;
        Ok(Self::rivaled(&state, snapshot))
    }

    async fn has_length_one_rival(&self, edge: EdgeId) -> Result<bool, ChainError> {
        let state = self.state.lock().unwrap();
        let snapshot = state.edges.get(&edge).ok_or(ChainError::NotFound("edge"))?;
        Ok(snapshot.length() == 1 && Self::rivaled(&state, snapshot))
    }
}
