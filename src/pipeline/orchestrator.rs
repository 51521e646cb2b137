// 全ジョブ実行

use rayon::prelude::*;
use tracing::warn;

use crate::pipeline::job_runner::{JobConfig, JobResult, run_job};

/// Run multiple jobs in parallel, collecting results in input order.
/// One job failure does NOT prevent other jobs from running.
///
/// `parallel_workers = 0` uses the rayon default pool.
pub fn run_all_jobs(
    jobs: &[JobConfig],
    parallel_workers: usize,
) -> Vec<crate::error::Result<JobResult>> {
    if parallel_workers == 0 {
        return jobs.par_iter().map(run_job).collect();
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(parallel_workers)
        .build()
    {
        Ok(pool) => pool.install(|| jobs.par_iter().map(run_job).collect()),
        Err(e) => {
            warn!(error = %e, "worker pool unavailable, using the default pool");
            jobs.par_iter().map(run_job).collect()
        }
    }
}
