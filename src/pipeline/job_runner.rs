// ジョブ単位: PDF読込 -> (キャッシュ) -> 文書パイプライン -> 結果JSON出力

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::cache::hash::compute_cache_key;
use crate::cache::store::CacheStore;
use crate::config::merged::AnalysisConfig;
use crate::pipeline::document_runner::{AnalysisResult, analyze_document};
use crate::rules::PreflightProfile;

/// Configuration for a single job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub input_path: PathBuf,
    /// JSON output of the full result. `None` keeps it in memory only.
    pub output_path: Option<PathBuf>,
    /// Where the analysis was triggered from, for logging.
    pub source: String,
    pub profile: PreflightProfile,
    pub config: AnalysisConfig,
    pub cache_dir: Option<PathBuf>,
}

/// Result of processing a single job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub result: AnalysisResult,
    pub from_cache: bool,
}

/// Run a single preflight job.
///
/// Cache failures are logged and never fail the job.
pub fn run_job(job: &JobConfig) -> crate::error::Result<JobResult> {
    let bytes = std::fs::read(&job.input_path)?;
    let name = job
        .input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.input_path.display().to_string());

    let cache = job.cache_dir.as_ref().map(CacheStore::new);
    let cache_key = match &cache {
        Some(_) => match compute_cache_key(&bytes, &job.profile.name, &job.config) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "cache key unavailable");
                None
            }
        },
        None => None,
    };

    let cached = match (&cache, &cache_key) {
        (Some(store), Some(key)) => match store.retrieve::<AnalysisResult>(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "cache entry ignored");
                None
            }
        },
        _ => None,
    };

    let from_cache = cached.is_some();
    let result = match cached {
        Some(result) => result,
        None => {
            let result = analyze_document(&bytes, &name, &job.profile, &job.config)?;
            if let (Some(store), Some(key)) = (&cache, &cache_key) {
                if !result.is_cacheable() {
                    debug!("ink analysis unavailable; result not cached");
                } else if let Err(e) = store.store(key, &result) {
                    warn!(error = %e, "cache store failed");
                }
            }
            result
        }
    };

    if let Some(output) = &job.output_path {
        let json = serde_json::to_vec_pretty(&result).map_err(std::io::Error::from)?;
        std::fs::write(output, json)?;
    }

    info!(
        input = %job.input_path.display(),
        source = %job.source,
        verdict = ?result.verdict,
        from_cache,
        "job finished"
    );

    Ok(JobResult {
        input_path: job.input_path.clone(),
        output_path: job.output_path.clone(),
        result,
        from_cache,
    })
}
