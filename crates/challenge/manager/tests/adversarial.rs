//! Two-party dispute simulation: an honest and a dishonest challenge manager
//! bisect each other down to a one-step proof against an in-memory dispute
//! chain that enforces the contract rules.
//!
//! The dishonest party runs the same state manager behind a decorator that
//! flips a bit in every leaf hash from a known block height (and, inside the
//! disputed block, from a known machine step). Bisection must converge on
//! exactly that divergence point, the honest party's one-step proof must
//! confirm, and the dishonest party's final move must fail with a
//! recognized loss.

use alloy_primitives::{B256, keccak256};
use async_trait::async_trait;
use rebut_challenge::{ChallengeManager, Poster};
use rebut_protocol::{
    Batch, ChainError, ChallengeConfig, ChallengeLevel, DisputeChain, EdgeStatus, ExecutionState,
    GlobalState, Height, MachineStatus, MockDisputeChain, OneStepOracle,
};
use rebut_provider::{
    ExecutionProvider, HashCollectorConfig, HistoryCommitmentProvider, L2MessageStateCollector,
    MachineHashCollector, ProofCollector, ProviderError,
};
use rebut_state::{
    ExecutionBackend, ExecutionResult, InboxTracker, Machine, MachineFactory, StateManager,
    StateManagerConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const BLOCK_LEAF_HEIGHT: u64 = 8;
const BIG_STEP_LEAF_HEIGHT: u64 = 4;
const SMALL_STEP_LEAF_HEIGHT: u64 = 4;
const OPCODES_PER_BLOCK: u64 = BIG_STEP_LEAF_HEIGHT * SMALL_STEP_LEAF_HEIGHT;

/// The block height at which the dishonest party's states diverge.
const DIVERGENCE_HEIGHT: u64 = 3;
/// The machine step, within the disputed block, where its trace diverges.
const DIVERGENCE_STEP: u64 = 6;

/// A deterministic two-batch chain world shared by every component: message
/// results, machine traces, and the one-step oracle all derive from the same
/// functions, so honest commitments are consistent across all three
/// challenge levels.
struct World {
    batch_ends: Vec<u64>,
}

impl World {
    fn new() -> Arc<Self> {
        Arc::new(Self { batch_ends: vec![3, 6] })
    }

    fn result(count: u64) -> ExecutionResult {
        ExecutionResult {
            block_hash: keccak256([b"block".as_slice(), &count.to_be_bytes()].concat()),
            send_root: keccak256([b"send".as_slice(), &count.to_be_bytes()].concat()),
        }
    }

    fn global_state_at(&self, count: u64) -> GlobalState {
        let mut batch = 0u64;
        let mut prev_end = 0u64;
        for end in &self.batch_ends {
            if count >= *end {
                batch += 1;
                prev_end = *end;
            } else {
                break;
            }
        }
        let result = if count > 0 { Self::result(count) } else { ExecutionResult::default() };
        GlobalState {
            block_hash: result.block_hash,
            send_root: result.send_root,
            batch,
            pos_in_batch: count - prev_end,
        }
    }

    /// The canonical machine hash at `position` within `message`'s
    /// execution. Block boundaries anchor to the block-level leaves: the
    /// machine at step 0 is the finished machine of the previous state, the
    /// machine at the final step is the finished machine of the next.
    fn machine_hash(&self, message: u64, position: u64) -> B256 {
        if position == 0 {
            self.global_state_at(message).machine_finished_hash()
        } else if position >= OPCODES_PER_BLOCK {
            self.global_state_at(message + 1).machine_finished_hash()
        } else {
            keccak256(
                [b"machine".as_slice(), &message.to_be_bytes(), &position.to_be_bytes()]
                    .concat(),
            )
        }
    }
}

#[async_trait]
impl InboxTracker for World {
    async fn batch_message_count(&self, batch: u64) -> Result<Option<u64>, ProviderError> {
        Ok(self.batch_ends.get(batch as usize).copied())
    }

    async fn batch_containing_message(&self, message_count: u64) -> Result<u64, ProviderError> {
        for (batch, end) in self.batch_ends.iter().enumerate() {
            if message_count <= *end {
                return Ok(batch as u64);
            }
        }
        Err(ProviderError::ChainCatchingUp { batch_count: self.batch_ends.len() as u64 })
    }
}

#[async_trait]
impl ExecutionBackend for World {
    async fn result_at_count(&self, count: u64) -> Result<ExecutionResult, ProviderError> {
        Ok(Self::result(count))
    }

    async fn last_validated(&self) -> Result<Option<GlobalState>, ProviderError> {
        Ok(Some(self.global_state_at(*self.batch_ends.last().unwrap())))
    }
}

struct WorldMachine {
    world: Arc<World>,
    message: u64,
    position: u64,
}

impl Machine for WorldMachine {
    fn step(&mut self, n: u64) -> Result<(), ProviderError> {
        self.position = (self.position + n).min(OPCODES_PER_BLOCK);
        Ok(())
    }

    fn hash(&self) -> B256 {
        self.world.machine_hash(self.message, self.position)
    }

    fn status(&self) -> MachineStatus {
        if self.position < OPCODES_PER_BLOCK {
            MachineStatus::Running
        } else {
            MachineStatus::Finished
        }
    }

    fn serialize_proof(&self) -> Vec<u8> {
        [self.message.to_be_bytes(), self.position.to_be_bytes()].concat()
    }
}

struct WorldMachines(Arc<World>);

#[async_trait]
impl MachineFactory for WorldMachines {
    async fn machine_at(&self, message_count: u64) -> Result<Box<dyn Machine>, ProviderError> {
        Ok(Box::new(WorldMachine { world: self.0.clone(), message: message_count, position: 0 }))
    }

    async fn finished_machine_proof(
        &self,
        state: &GlobalState,
    ) -> Result<Vec<u8>, ProviderError> {
        Ok(state.hash().to_vec())
    }
}

/// The mock chain's stand-in for the on-chain one-step prover: re-executes
/// the step a proof payload describes and returns the canonical post-state.
struct WorldOracle(Arc<World>);

impl OneStepOracle for WorldOracle {
    fn execute(&self, proof: &[u8]) -> Result<B256, ChainError> {
        match proof.len() {
            16 => {
                let message = u64::from_be_bytes(proof[..8].try_into().unwrap());
                let position = u64::from_be_bytes(proof[8..].try_into().unwrap());
                Ok(self.0.machine_hash(message, position + 1))
            }
            // A finished machine: stepping does not change its state.
            32 => Ok(keccak256([b"Machine finished:".as_slice(), proof].concat())),
            _ => Err(ChainError::InvalidMove("malformed one-step proof")),
        }
    }
}

fn flip(hash: B256) -> B256 {
    let mut flipped = hash;
    flipped.0[0] ^= 1;
    flipped
}

/// Decorates an honest state manager, flipping a bit in every block-level
/// leaf from [`DIVERGENCE_HEIGHT`] and every machine hash from
/// [`DIVERGENCE_STEP`] within the first divergent block. Everything else
/// delegates to the honest inner provider, so the dishonest party agrees
/// with the honest one exactly up to the divergence point.
struct DivergentStateManager {
    inner: Arc<StateManager>,
}

#[async_trait]
impl L2MessageStateCollector for DivergentStateManager {
    async fn l2_message_states_up_to(
        &self,
        from_state: GlobalState,
        batch_limit: Batch,
        to_height: Option<Height>,
    ) -> Result<Vec<B256>, ProviderError> {
        let mut hashes =
            self.inner.l2_message_states_up_to(from_state, batch_limit, to_height).await?;
        for (height, hash) in hashes.iter_mut().enumerate() {
            if height as u64 >= DIVERGENCE_HEIGHT {
                *hash = flip(*hash);
            }
        }
        Ok(hashes)
    }
}

#[async_trait]
impl MachineHashCollector for DivergentStateManager {
    async fn collect_machine_hashes(
        &self,
        cfg: &HashCollectorConfig,
    ) -> Result<Vec<B256>, ProviderError> {
        let mut hashes = self.inner.collect_machine_hashes(cfg).await?;
        let disputed_block = DIVERGENCE_HEIGHT - 1;
        if cfg.block_challenge_height.0 < disputed_block {
            return Ok(hashes);
        }
        let divergence_position =
            if cfg.block_challenge_height.0 == disputed_block { DIVERGENCE_STEP } else { 0 };
        for (index, hash) in hashes.iter_mut().enumerate() {
            let position = cfg.machine_start_index.0 + index as u64 * cfg.step_size.0;
            if position >= divergence_position {
                *hash = flip(*hash);
            }
        }
        Ok(hashes)
    }
}

#[async_trait]
impl ProofCollector for DivergentStateManager {
    async fn collect_proof(
        &self,
        assertion_metadata: &rebut_provider::AssociatedAssertionMetadata,
        block_challenge_height: Height,
        machine_index: rebut_protocol::OpcodeIndex,
    ) -> Result<Vec<u8>, ProviderError> {
        self.inner.collect_proof(assertion_metadata, block_challenge_height, machine_index).await
    }
}

#[async_trait]
impl ExecutionProvider for DivergentStateManager {
    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: GlobalState,
    ) -> Result<ExecutionState, ProviderError> {
        let state = self
            .inner
            .execution_state_after_previous_state(max_inbox_count, previous_global_state)
            .await?;
        // Recommit over this party's (divergent) block leaves so the claimed
        // history root matches the challenge moves it will make.
        let leaves = self
            .l2_message_states_up_to(
                previous_global_state,
                Batch(state.global_state.batch),
                Some(Height(BLOCK_LEAF_HEIGHT)),
            )
            .await?;
        let commitment =
            rebut_history::HistoryCommitment::new(&leaves, BLOCK_LEAF_HEIGHT + 1)?;
        Ok(ExecutionState { end_history_root: commitment.merkle, ..state })
    }
}

fn challenge_config() -> ChallengeConfig {
    ChallengeConfig {
        leaf_heights: vec![BLOCK_LEAF_HEIGHT, BIG_STEP_LEAF_HEIGHT, SMALL_STEP_LEAF_HEIGHT],
        wasm_module_root: B256::with_last_byte(0xaa),
    }
}

fn state_manager(world: &Arc<World>) -> Arc<StateManager> {
    Arc::new(StateManager::new(
        world.clone(),
        world.clone(),
        Arc::new(WorldMachines(world.clone())),
        StateManagerConfig {
            block_challenge_leaf_height: Height(BLOCK_LEAF_HEIGHT),
            wasm_module_root: challenge_config().wasm_module_root,
            cache_capacity: 32,
        },
        CancellationToken::new(),
    ))
}

fn provider_for(manager: Arc<StateManager>) -> Arc<HistoryCommitmentProvider> {
    Arc::new(HistoryCommitmentProvider::new(
        manager.clone(),
        manager.clone(),
        manager.clone(),
        manager,
        vec![Height(BLOCK_LEAF_HEIGHT), Height(BIG_STEP_LEAF_HEIGHT), Height(SMALL_STEP_LEAF_HEIGHT)],
    ))
}

fn divergent_provider_for(manager: Arc<StateManager>) -> Arc<HistoryCommitmentProvider> {
    let divergent = Arc::new(DivergentStateManager { inner: manager });
    Arc::new(HistoryCommitmentProvider::new(
        divergent.clone(),
        divergent.clone(),
        divergent.clone(),
        divergent,
        vec![Height(BLOCK_LEAF_HEIGHT), Height(BIG_STEP_LEAF_HEIGHT), Height(SMALL_STEP_LEAF_HEIGHT)],
    ))
}

#[tokio::test]
async fn dispute_converges_to_honest_one_step_proof() {
    let world = World::new();
    let chain = Arc::new(MockDisputeChain::new(
        challenge_config(),
        Arc::new(WorldOracle(world.clone())),
        ExecutionState {
            global_state: GlobalState::default(),
            machine_status: MachineStatus::Finished,
            end_history_root: B256::ZERO,
        },
        2,
    ));

    let honest_provider = provider_for(state_manager(&world));
    let evil_provider = divergent_provider_for(state_manager(&world));

    let honest_poster = Poster::new(chain.clone(), honest_provider.clone(), "honest", 0);
    let evil_poster = Poster::new(chain.clone(), evil_provider.clone(), "evil", 0);

    let honest_assertion =
        honest_poster.post_assertion().await.unwrap().expect("honest assertion posted");
    let evil_assertion =
        evil_poster.post_assertion().await.unwrap().expect("evil assertion posted");
    assert_eq!(
        honest_assertion.parent_assertion_hash,
        evil_assertion.parent_assertion_hash,
        "rival assertions share a parent"
    );
    assert_ne!(honest_assertion.assertion_hash, evil_assertion.assertion_hash);
    assert_eq!(
        honest_assertion.after_state.global_state,
        evil_assertion.after_state.global_state,
        "the dispute is about history, not the end state"
    );

    // Re-posting before confirmation is a no-op.
    assert!(honest_poster.post_assertion().await.unwrap().is_none());

    let mut honest = ChallengeManager::new(chain.clone(), honest_provider, "honest");
    let mut evil = ChallengeManager::new(chain.clone(), evil_provider, "evil");

    let mut ticks = 0;
    while honest.confirmed_edges() == 0 && ticks < 64 {
        honest.tick().await;
        evil.tick().await;
        ticks += 1;
    }

    assert!(
        honest.confirmed_edges() > 0,
        "honest one-step proof not confirmed within {ticks} ticks"
    );
    assert_eq!(evil.challenges_lost(), 1, "dishonest final move must fail fatally");
    assert_eq!(evil.confirmed_edges(), 0);

    // The confirmed edge is a deepest-level single step at the divergence
    // point found by bisection.
    let deepest = ChallengeLevel(2);
    let confirmed: Vec<_> = chain
        .edges()
        .into_iter()
        .filter(|edge| edge.status == EdgeStatus::Confirmed)
        .collect();
    assert_eq!(confirmed.len(), 1);
    let edge = &confirmed[0];
    assert_eq!(edge.level, deepest);
    assert_eq!(edge.length(), 1);
    // Origin heights walk down the levels: block fork at DIVERGENCE_HEIGHT-1,
    // then the big step containing DIVERGENCE_STEP.
    assert_eq!(edge.origin_heights, vec![
        DIVERGENCE_HEIGHT - 1,
        DIVERGENCE_STEP / SMALL_STEP_LEAF_HEIGHT
    ]);
    // The confirmed step is the transition into the first divergent hash.
    assert_eq!(edge.start_height, DIVERGENCE_STEP % SMALL_STEP_LEAF_HEIGHT - 1);

    // Convergence took at most log2(leaf height) bisections per level plus
    // the level transitions.
    assert!(ticks < 40, "took {ticks} ticks");
}

#[tokio::test]
async fn stack_lifecycle_posts_and_stops_cleanly() {
    use rebut_challenge::ChallengeStackBuilder;
    use std::time::Duration;

    let world = World::new();
    let chain = Arc::new(MockDisputeChain::new(
        challenge_config(),
        Arc::new(WorldOracle(world.clone())),
        ExecutionState::default(),
        2,
    ));
    let provider = provider_for(state_manager(&world));
    let genesis = chain.latest_confirmed().await.unwrap();

    let mut stack = ChallengeStackBuilder::new(chain.clone(), provider)
        .name("honest")
        .polling_interval(Duration::from_millis(5))
        .posting_interval(Duration::from_millis(5))
        .confirmation_interval(Duration::from_millis(5))
        .minimum_gap_to_parent(Duration::ZERO)
        .build();
    stack.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    stack.stop_and_wait().await;

    let posted = chain.assertions_after(genesis.assertion_hash).await.unwrap();
    assert_eq!(posted.len(), 1, "the posting loop posts once and then no-ops");
}

#[tokio::test]
async fn unrivaled_assertions_spawn_no_challenges() {
    let world = World::new();
    let chain = Arc::new(MockDisputeChain::new(
        challenge_config(),
        Arc::new(WorldOracle(world.clone())),
        ExecutionState::default(),
        2,
    ));
    let provider = provider_for(state_manager(&world));
    let poster = Poster::new(chain.clone(), provider.clone(), "honest", 0);
    poster.post_assertion().await.unwrap().expect("assertion posted");

    let mut manager = ChallengeManager::new(chain.clone(), provider, "honest");
    manager.tick().await;
    manager.tick().await;
    assert!(chain.edges().is_empty(), "no challenge edges for an unrivaled assertion");
}
