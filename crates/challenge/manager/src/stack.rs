//! The challenge stack: lifecycle wiring for the poster and challenge
//! manager loops.

use rebut_protocol::DisputeChain;
use rebut_provider::HistoryCommitmentProvider;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{ChallengeManager, Poster};

/// Builds a [`ChallengeStack`].
///
/// The intervals trade L1 gas and rpc load against responsiveness; none of
/// them affect correctness. Defaults mirror a conservative mainnet
/// deployment.
pub struct ChallengeStackBuilder {
    chain: Arc<dyn DisputeChain>,
    provider: Arc<HistoryCommitmentProvider>,
    validator_name: String,
    polling_interval: Duration,
    posting_interval: Duration,
    confirmation_interval: Duration,
    average_block_time: Duration,
    minimum_gap_to_parent: Duration,
    posting_enabled: bool,
}

impl core::fmt::Debug for ChallengeStackBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChallengeStackBuilder")
            .field("validator_name", &self.validator_name)
            .field("polling_interval", &self.polling_interval)
            .field("posting_interval", &self.posting_interval)
            .finish_non_exhaustive()
    }
}

impl ChallengeStackBuilder {
    /// Starts a builder with default timings.
    pub fn new(chain: Arc<dyn DisputeChain>, provider: Arc<HistoryCommitmentProvider>) -> Self {
        Self {
            chain,
            provider,
            validator_name: "unnamed-challenge-stack".to_string(),
            polling_interval: Duration::from_secs(60),
            posting_interval: Duration::from_secs(60 * 60),
            confirmation_interval: Duration::from_secs(10),
            average_block_time: Duration::from_secs(12),
            minimum_gap_to_parent: Duration::from_secs(10 * 60),
            posting_enabled: true,
        }
    }

    /// Names the validator in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.validator_name = name.into();
        self
    }

    /// How often on-chain challenge state is polled and trackers act.
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// How often a new assertion post is attempted.
    pub fn posting_interval(mut self, interval: Duration) -> Self {
        self.posting_interval = interval;
        self
    }

    /// How often confirmations are re-checked.
    pub fn confirmation_interval(mut self, interval: Duration) -> Self {
        self.confirmation_interval = interval;
        self
    }

    /// The parent chain's expected block time.
    pub fn average_block_time(mut self, interval: Duration) -> Self {
        self.average_block_time = interval;
        self
    }

    /// Minimum age of the parent assertion before a child is posted.
    pub fn minimum_gap_to_parent(mut self, interval: Duration) -> Self {
        self.minimum_gap_to_parent = interval;
        self
    }

    /// Disables the posting loop; the stack only watches and challenges.
    pub fn without_posting(mut self) -> Self {
        self.posting_enabled = false;
        self
    }

    /// Builds the stack. Nothing runs until [`ChallengeStack::start`].
    pub fn build(self) -> ChallengeStack {
        let name: Arc<str> = Arc::from(self.validator_name.as_str());
        let minimum_gap_blocks = self.minimum_gap_to_parent.as_secs() /
            self.average_block_time.as_secs().max(1);
        ChallengeStack {
            poster: Poster::new(
                self.chain.clone(),
                self.provider.clone(),
                name.clone(),
                minimum_gap_blocks,
            ),
            manager: Some(ChallengeManager::new(
                self.chain.clone(),
                self.provider,
                name.clone(),
            )),
            chain: self.chain,
            validator_name: name,
            polling_interval: self.polling_interval,
            posting_interval: self.posting_interval,
            confirmation_interval: self.confirmation_interval,
            posting_enabled: self.posting_enabled,
            cancellation: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }
}

/// The long-lived background engine: one posting loop and one
/// polling/challenge loop, cancellable as a unit. All chain mutation flows
/// through these two loops; the only shared state behind them is the state
/// manager's trace cache.
pub struct ChallengeStack {
    poster: Poster,
    manager: Option<ChallengeManager>,
    chain: Arc<dyn DisputeChain>,
    validator_name: Arc<str>,
    polling_interval: Duration,
    posting_interval: Duration,
    confirmation_interval: Duration,
    posting_enabled: bool,
    cancellation: CancellationToken,
    tasks: JoinSet<()>,
}

impl core::fmt::Debug for ChallengeStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChallengeStack")
            .field("validator_name", &self.validator_name)
            .field("polling_interval", &self.polling_interval)
            .field("posting_interval", &self.posting_interval)
            .finish_non_exhaustive()
    }
}

impl ChallengeStack {
    /// The cancellation token shared with collaborators so in-flight proof
    /// computation aborts with the stack.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Spawns the background loops. Idempotent per stack: the manager loop
    /// can only be started once.
    pub fn start(&mut self) {
        let Some(mut manager) = self.manager.take() else {
            warn!(
                target: "challenge::stack",
                validator = %self.validator_name,
                "Stack already started"
            );
            return;
        };
        info!(
            target: "challenge::stack",
            validator = %self.validator_name,
            "Starting challenge stack"
        );

        let cancellation = self.cancellation.clone();
        let polling_interval = self.polling_interval;
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(polling_interval);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => manager.tick().await,
                }
            }
        });

        // Confirmation watcher: reports the latest confirmed assertion's
        // creation block as a gauge.
        let chain = self.chain.clone();
        let cancellation = self.cancellation.clone();
        let confirmation_interval = self.confirmation_interval;
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(confirmation_interval);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Ok(confirmed) = chain.latest_confirmed().await {
                            metrics::gauge!("latest_confirmed_assertion_block")
                                .set(confirmed.creation_block as f64);
                        }
                    }
                }
            }
        });

        if self.posting_enabled {
            let poster = self.poster.clone();
            let cancellation = self.cancellation.clone();
            let posting_interval = self.posting_interval;
            let name = self.validator_name.clone();
            self.tasks.spawn(async move {
                let mut ticker = tokio::time::interval(posting_interval);
                loop {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = poster.post_assertion().await {
                                warn!(
                                    target: "challenge::stack",
                                    validator = %name,
                                    %err,
                                    "Assertion post failed, retrying on next tick"
                                );
                            }
                        }
                    }
                }
            });
        }
    }

    /// Cancels both loops and waits for them to finish.
    pub async fn stop_and_wait(mut self) {
        self.cancellation.cancel();
        while self.tasks.join_next().await.is_some() {}
        info!(
            target: "challenge::stack",
            validator = %self.validator_name,
            "Challenge stack stopped"
        );
    }
}
