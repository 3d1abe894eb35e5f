use futures::{stream, FutureExt, StreamExt};
use std::{collections::BTreeMap, future::Future, panic::AssertUnwindSafe};
use tracing::error;

use crate::{
    error::Result,
    types::{FailureReason, SubmissionOutcome, WorkKey},
};

use super::progress::ProgressManager;

/// Outcomes produced by one (wallet, network) job.
pub type JobResults = Vec<(WorkKey, SubmissionOutcome)>;

/// Fans jobs out over wallets and networks with two bounded pools.
pub struct ExecutionManager {
    wallet_concurrency: usize,
    network_concurrency: usize,
    progress: ProgressManager,
}

impl ExecutionManager {
    pub fn new(wallet_concurrency: usize, network_concurrency: usize) -> Self {
        Self {
            wallet_concurrency: wallet_concurrency.max(1),
            network_concurrency: network_concurrency.max(1),
            progress: ProgressManager::new(),
        }
    }

    pub fn progress(&self) -> &ProgressManager {
        &self.progress
    }

    /// Runs `job` for every (wallet, network) pair. At most
    /// `wallet_concurrency` wallets are active at once, each with at most
    /// `network_concurrency` networks in flight.
    ///
    /// A job that errors, panics or returns nothing is recorded under
    /// `fallback(wallet, network)`, so every pair shows up in the result.
    pub async fn fan_out<'a, W, N, K, F, Fut>(
        &self,
        wallets: &'a [W],
        networks: &'a [N],
        fallback: K,
        job: F,
    ) -> BTreeMap<WorkKey, SubmissionOutcome>
    where
        K: Fn(&W, &N) -> WorkKey,
        F: Fn(&'a W, &'a N) -> Fut,
        Fut: Future<Output = Result<JobResults>>,
    {
        self.progress.start(wallets.len() * networks.len()).await;
        let fallback = &fallback;
        let job = &job;
        let progress = &self.progress;
        let network_concurrency = self.network_concurrency;

        let per_wallet: Vec<Vec<JobResults>> = stream::iter(wallets)
            .map(|wallet| async move {
                stream::iter(networks)
                    .map(move |network| async move {
                        let results =
                            Self::run_job(fallback(wallet, network), job(wallet, network)).await;
                        progress.record(&results).await;
                        results
                    })
                    .buffer_unordered(network_concurrency)
                    .collect::<Vec<JobResults>>()
                    .await
            })
            .buffer_unordered(self.wallet_concurrency)
            .collect()
            .await;

        per_wallet.into_iter().flatten().flatten().collect()
    }

    async fn run_job<Fut>(key: WorkKey, job: Fut) -> JobResults
    where
        Fut: Future<Output = Result<JobResults>>,
    {
        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(results)) if !results.is_empty() => results,
            Ok(Ok(_)) => vec![(key, SubmissionOutcome::Skipped("nothing to do".to_string()))],
            Ok(Err(e)) => {
                error!(unit = %key, error = %e, "Job failed");
                vec![(key, SubmissionOutcome::Failed(FailureReason::Error(e.to_string())))]
            }
            Err(_) => {
                error!(unit = %key, "Job panicked");
                vec![(
                    key,
                    SubmissionOutcome::Failed(FailureReason::Error("worker panicked".to_string())),
                )]
            }
        }
    }
}
