use alloy::primitives::Address;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::{info, info_span, warn};

use crate::types::{ExecutionResult, SubmissionOutcome, WorkKey};

/// Running counters for the jobs of one operation.
#[derive(Debug, Clone)]
pub struct ProgressStats {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub successful_units: usize,
    pub failed_units: usize,
    pub skipped_units: usize,
    pub start_time: Instant,
}

impl ProgressStats {
    pub fn new(total_jobs: usize) -> Self {
        Self {
            total_jobs,
            completed_jobs: 0,
            successful_units: 0,
            failed_units: 0,
            skipped_units: 0,
            start_time: Instant::now(),
        }
    }

    /// Share of attempted units that succeeded. Skipped units are not attempts.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.successful_units + self.failed_units;
        if attempted == 0 {
            return 0.0;
        }
        self.successful_units as f64 / attempted as f64 * 100.0
    }

    pub fn jobs_per_minute(&self) -> f64 {
        let minutes = self.start_time.elapsed().as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        self.completed_jobs as f64 / minutes
    }

    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        if self.completed_jobs == 0 {
            return None;
        }
        let per_job = self.start_time.elapsed().as_secs_f64() / self.completed_jobs as f64;
        let remaining = self.total_jobs.saturating_sub(self.completed_jobs);
        Some(Duration::from_secs_f64(per_job * remaining as f64))
    }
}

/// Manages progress tracking and reporting
pub struct ProgressManager {
    progress: Arc<RwLock<ProgressStats>>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            progress: Arc::new(RwLock::new(ProgressStats::new(0))),
        }
    }

    /// Resets the counters for a run of `total_jobs` jobs.
    pub async fn start(&self, total_jobs: usize) {
        *self.progress.write().await = ProgressStats::new(total_jobs);
    }

    /// Counts one finished job and logs the running totals.
    pub async fn record(&self, results: &[(WorkKey, SubmissionOutcome)]) {
        let mut progress = self.progress.write().await;
        progress.completed_jobs += 1;
        for (_, outcome) in results {
            match outcome {
                o if o.is_success() => progress.successful_units += 1,
                SubmissionOutcome::Skipped(_) => progress.skipped_units += 1,
                _ => progress.failed_units += 1,
            }
        }

        let percent = if progress.total_jobs == 0 {
            100.0
        } else {
            progress.completed_jobs as f64 / progress.total_jobs as f64 * 100.0
        };
        let time_remaining = progress
            .estimated_time_remaining()
            .map(|d| humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
            .unwrap_or_else(|| "calculating...".to_string());

        info!(
            completed = progress.completed_jobs,
            total = progress.total_jobs,
            progress_percent = format!("{:.1}%", percent),
            success_rate = format!("{:.1}%", progress.success_rate()),
            jobs_per_minute = format!("{:.1}", progress.jobs_per_minute()),
            time_remaining,
            "Progress update"
        );
    }

    pub async fn snapshot(&self) -> ProgressStats {
        self.progress.read().await.clone()
    }

    pub async fn completed(&self) -> usize {
        self.progress.read().await.completed_jobs
    }

    /// Logs the run summary: every unit, each wallet's overall status and
    /// per-chain success counts.
    pub fn print_statistics(&self, execution_result: &ExecutionResult, accounts: &[Address]) {
        let stats_span =
            info_span!("execution_statistics", operation = %execution_result.operation);
        let _guard = stats_span.enter();

        for (key, outcome) in &execution_result.results {
            match outcome {
                SubmissionOutcome::Failed(_) => {
                    warn!(unit = %key, chain = %key.chain, "{}", outcome)
                }
                _ => info!(unit = %key, chain = %key.chain, "{}", outcome),
            }
        }

        for account in accounts {
            info!(
                address = %account,
                status = %execution_result.account_status(*account),
                "Wallet status"
            );
        }

        for (chain, successes) in execution_result.successes_by_chain() {
            info!(chain = %chain, successes, "Chain summary");
        }

        info!(
            started_at = %execution_result.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            duration = %humantime::format_duration(Duration::from_secs(
                execution_result.time_elapsed.as_secs()
            )),
            successful = execution_result.successful_count(),
            failed = execution_result.failed_count(),
            skipped = execution_result.skipped_count(),
            "Execution completed"
        );
    }
}
