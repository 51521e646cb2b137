use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pdf_preflight::config::job::JobFile;
use pdf_preflight::config::merged::InvocationContext;
use pdf_preflight::config::{self};
use pdf_preflight::pipeline::job_runner::JobConfig;
use pdf_preflight::pipeline::orchestrator::run_all_jobs;
use pdf_preflight::rules::{ProfileCatalog, Severity};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: pdf_preflight <jobs.yaml>...");
        eprintln!("  Preflight PDF files according to job specifications.");
        return if args.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        eprintln!("pdf_preflight {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Every job file, profile and setting is validated before any PDF is opened.
    let mut job_configs: Vec<JobConfig> = Vec::new();
    let mut parallel_workers = 0;

    for job_file_arg in &args {
        let job_file_path = Path::new(job_file_arg);

        let settings = match config::load_settings_for_job(job_file_path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("ERROR: Failed to load settings for {job_file_arg}: {e}");
                return ExitCode::FAILURE;
            }
        };
        parallel_workers = parallel_workers.max(settings.parallel_workers);

        let catalog = match ProfileCatalog::load(settings.profiles_path.as_deref()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("ERROR: Failed to load profiles for {job_file_arg}: {e}");
                return ExitCode::FAILURE;
            }
        };

        let yaml_content = match std::fs::read_to_string(job_file_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("ERROR: Failed to read job file {job_file_arg}: {e}");
                return ExitCode::FAILURE;
            }
        };

        let job_file = match JobFile::from_yaml(&yaml_content) {
            Ok(jf) => jf,
            Err(e) => {
                eprintln!("ERROR: Failed to parse job file {job_file_arg}: {e}");
                return ExitCode::FAILURE;
            }
        };

        let job_dir = job_file_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        for job in &job_file.jobs {
            let context = InvocationContext::from_job(job);
            let analysis_config = context.resolve(&settings);

            let profile = match catalog.get(&analysis_config.profile) {
                Ok(p) => p.clone(),
                Err(e) => {
                    eprintln!("ERROR: {}: {e}", job.input);
                    return ExitCode::FAILURE;
                }
            };

            job_configs.push(JobConfig {
                input_path: resolve_path(&job_dir, &job.input),
                output_path: job.output.as_deref().map(|o| resolve_path(&job_dir, o)),
                source: context.source_label(),
                profile,
                config: analysis_config,
                cache_dir: settings.cache_dir.clone(),
            });
        }
    }

    let results = run_all_jobs(&job_configs, parallel_workers);

    // One JSON summary line per job on stdout.
    let mut has_error = false;
    for (job, result) in job_configs.iter().zip(&results) {
        let summary = match result {
            Ok(job_result) => {
                let findings = &job_result.result.findings;
                let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
                serde_json::json!({
                    "input": job_result.input_path.display().to_string(),
                    "output": job_result.output_path.as_ref().map(|p| p.display().to_string()),
                    "profile": job_result.result.profile,
                    "verdict": job_result.result.verdict,
                    "errors": count(Severity::Error),
                    "warnings": count(Severity::Warning),
                    "info": count(Severity::Info),
                    "degraded_pages": job_result.result.degraded_pages(),
                    "cached": job_result.from_cache,
                })
            }
            Err(e) => {
                has_error = true;
                eprintln!("ERROR: {}: {e}", job.input_path.display());
                serde_json::json!({
                    "input": job.input_path.display().to_string(),
                    "error": e.to_string(),
                })
            }
        };
        println!("{summary}");
    }

    if has_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Resolve a potentially relative path against a base directory.
/// If the path is already absolute, return it as-is.
fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
