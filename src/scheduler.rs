//! Batched job scheduler.
//!
//! Iterations run in consecutive batches of at most `max_concurrency` jobs.
//! A batch must fully settle before the next one starts, so no more than
//! `max_concurrency` sessions are ever in flight. The first failure ends the
//! run: the rest of its batch is dropped and no further batch is started.

use futures::future::try_join_all;
use std::future::Future;
use tracing::{debug, info};

use crate::error::ReplayError;
use crate::stats::{AggregateStats, JobResult};

/// Run `total` jobs, `max_concurrency` at a time, and fold their results.
///
/// `job` is called with the iteration index to create each job. Jobs in a
/// batch are polled concurrently on the caller's task.
pub async fn run<F, Fut>(
    total: usize,
    max_concurrency: usize,
    mut job: F,
) -> Result<AggregateStats, ReplayError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<JobResult, ReplayError>>,
{
    if max_concurrency == 0 {
        return Err(ReplayError::Config(
            "max concurrency must be at least 1".to_string(),
        ));
    }

    let mut stats = AggregateStats::default();
    let mut next = 0;
    let mut batch_index = 0;

    while next < total {
        let end = (next + max_concurrency).min(total);
        debug!(batch = batch_index, first = next, size = end - next, "Starting batch");

        let results = try_join_all((next..end).map(&mut job)).await?;
        stats = stats + AggregateStats::from_results(&results);

        debug!(batch = batch_index, "Batch settled");
        next = end;
        batch_index += 1;
    }

    info!(iterations = total, batches = batch_index, "All jobs finished");
    Ok(stats)
}
