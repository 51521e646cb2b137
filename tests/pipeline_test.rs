// パイプライン統合テスト: 文書パイプライン、ジョブ実行、キャッシュ、並列実行

mod common;

use std::path::PathBuf;

use lopdf::{Object, dictionary};

use common::{TestPage, build_pdf, full_page_fill, overprint_resources, overprinted_rect};
use pdf_preflight::config::merged::AnalysisConfig;
use pdf_preflight::error::PreflightError;
use pdf_preflight::pipeline::document_runner::{AnalysisResult, analyze_document};
use pdf_preflight::pipeline::job_runner::{JobConfig, run_job};
use pdf_preflight::pipeline::orchestrator::run_all_jobs;
use pdf_preflight::quality::ink::InkStatus;
use pdf_preflight::rules::{CheckType, PreflightProfile, ProfileCatalog, Verdict};
use tempfile::tempdir;

fn offset() -> PreflightProfile {
    ProfileCatalog::builtin().get("offset").unwrap().clone()
}

fn job(input: PathBuf, output: Option<PathBuf>, cache_dir: Option<PathBuf>) -> JobConfig {
    JobConfig {
        input_path: input,
        output_path: output,
        source: "interactive".to_string(),
        profile: offset(),
        config: AnalysisConfig::default(),
        cache_dir,
    }
}

fn white_overprint_pdf() -> Vec<u8> {
    build_pdf(vec![
        TestPage::new("").with_bleed(3.0),
        TestPage::new(&overprinted_rect(0.0, 0.0, 0.0, 0.0))
            .with_bleed(3.0)
            .with_resources(overprint_resources()),
    ])
}

// ============================================================
// 1. 文書パイプライン
// ============================================================

#[test]
fn test_analyze_document_identity_and_pages() {
    let bytes = white_overprint_pdf();
    let result = analyze_document(&bytes, "flyer.pdf", &offset(), &AnalysisConfig::default())
        .expect("analysis succeeds");

    assert_eq!(result.document.name, "flyer.pdf");
    assert_eq!(result.document.size_bytes, bytes.len() as u64);
    assert_eq!(result.document.sha256.len(), 64);
    assert_eq!(result.document.page_count, 2);
    assert_eq!(result.document.pdf_version, "1.6");
    assert_eq!(result.profile, "offset");
    assert_eq!(result.pages.len(), 2);
    for (i, page) in result.pages.iter().enumerate() {
        assert_eq!(page.record.page_number, i as u32 + 1);
        assert_eq!(page.quality.page_number, i as u32 + 1);
    }
    assert!(result.degraded_pages().is_empty());
}

#[test]
fn test_analyze_document_white_overprint_fails() {
    let result = analyze_document(
        &white_overprint_pdf(),
        "flyer.pdf",
        &offset(),
        &AnalysisConfig::default(),
    )
    .unwrap();

    assert_eq!(result.verdict, Verdict::Fail);
    let white: Vec<_> = result
        .findings
        .iter()
        .filter(|f| f.check_type == CheckType::OverprintWhite)
        .collect();
    assert_eq!(white.len(), 1);
    assert_eq!(white[0].page_numbers, vec![2]);
    // インク量分析は既定で無効 → スキップとして記録
    assert!(result.ink.is_none());
    assert!(
        result
            .skipped_rules
            .iter()
            .any(|s| s.check_type == CheckType::InkCoverageMax)
    );
}

#[test]
fn test_analyze_document_with_ink() {
    let bytes = build_pdf(vec![
        TestPage::new(&full_page_fill(1.0, 1.0, 1.0, 1.0)).with_bleed(3.0),
    ]);
    let mut config = AnalysisConfig::default();
    config.ink_analysis_enabled = true;
    config.ink.dpi = 36;
    let result = analyze_document(&bytes, "dark.pdf", &offset(), &config).unwrap();

    let ink = result.ink.as_ref().expect("ink measured");
    assert_eq!(ink.dpi, 36);
    assert!(
        result
            .findings
            .iter()
            .any(|f| f.check_type == CheckType::InkCoverageMax)
    );
    assert_eq!(result.verdict, Verdict::Fail);
}

#[test]
fn test_analyze_document_caveats_carry_page_number() {
    let bytes = build_pdf(vec![
        TestPage::new("").with_bleed(3.0),
        TestPage::new("").with_bleed(3.0).with_resources(dictionary! {
            "ColorSpace" => dictionary! {
                "CS0" => Object::Array(vec!["FancySpace".into()]),
            },
        }),
    ]);
    let result = analyze_document(&bytes, "odd.pdf", &offset(), &AnalysisConfig::default()).unwrap();
    assert_eq!(result.degraded_pages(), vec![2]);
    assert!(result.caveats.iter().all(|c| c.starts_with("page 2: ")));
    assert!(!result.caveats.is_empty());
}

#[test]
fn test_analyze_document_malformed() {
    let err = analyze_document(b"%PDF-1.4 garbage", "bad.pdf", &offset(), &AnalysisConfig::default())
        .unwrap_err();
    assert!(
        matches!(err, PreflightError::MalformedDocumentError(_)),
        "got: {err:?}"
    );
    assert!(!err.is_recoverable());
}

#[test]
fn test_analyze_document_result_serializes() {
    let result = analyze_document(
        &white_overprint_pdf(),
        "flyer.pdf",
        &offset(),
        &AnalysisConfig::default(),
    )
    .unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["verdict"], "fail");
    assert_eq!(json["findings"][0]["check_type"], "overprint_white");
    assert_eq!(json["findings"][0]["severity"], "error");
    assert!(json["ink"].is_null());
}

// ============================================================
// 2. ジョブ実行
// ============================================================

#[test]
fn test_run_job_writes_output() {
    let dir = tempdir().expect("create temp dir");
    let input = dir.path().join("flyer.pdf");
    let output = dir.path().join("flyer.json");
    std::fs::write(&input, white_overprint_pdf()).unwrap();

    let result = run_job(&job(input.clone(), Some(output.clone()), None)).expect("job runs");
    assert_eq!(result.input_path, input);
    assert!(!result.from_cache);
    assert_eq!(result.result.verdict, Verdict::Fail);

    let written: AnalysisResult =
        serde_json::from_slice(&std::fs::read(&output).unwrap()).expect("result JSON");
    assert_eq!(written.verdict, Verdict::Fail);
    assert_eq!(written.document.name, "flyer.pdf");
    assert_eq!(written.findings.len(), result.result.findings.len());
}

#[test]
fn test_run_job_cache_hit() {
    let dir = tempdir().expect("create temp dir");
    let cache_dir = dir.path().join("cache");
    let input = dir.path().join("flyer.pdf");
    std::fs::write(&input, white_overprint_pdf()).unwrap();
    let config = job(input, None, Some(cache_dir.clone()));

    let first = run_job(&config).unwrap();
    assert!(!first.from_cache);
    let entries = std::fs::read_dir(&cache_dir).unwrap().count();
    assert_eq!(entries, 1);

    let second = run_job(&config).unwrap();
    assert!(second.from_cache);
    assert_eq!(second.result.verdict, first.result.verdict);
    assert_eq!(second.result.document, first.result.document);
    assert_eq!(second.result.findings.len(), first.result.findings.len());
}

/// 設定が変われば別のキャッシュエントリになる。
#[test]
fn test_run_job_cache_miss_on_config_change() {
    let dir = tempdir().expect("create temp dir");
    let cache_dir = dir.path().join("cache");
    let input = dir.path().join("flyer.pdf");
    std::fs::write(&input, white_overprint_pdf()).unwrap();

    run_job(&job(input.clone(), None, Some(cache_dir.clone()))).unwrap();
    let mut changed = job(input, None, Some(cache_dir.clone()));
    changed.config.overprint.k_only_as_normal = false;
    let result = run_job(&changed).unwrap();
    assert!(!result.from_cache);
    assert_eq!(std::fs::read_dir(&cache_dir).unwrap().count(), 2);
}

/// インク量が測れなかった結果はキャッシュしない（次回は測り直す）。
#[test]
fn test_run_job_does_not_cache_unavailable_ink() {
    let dir = tempdir().expect("create temp dir");
    let cache_dir = dir.path().join("cache");
    let input = dir.path().join("dark.pdf");
    std::fs::write(
        &input,
        build_pdf(vec![
            TestPage::new(&full_page_fill(1.0, 1.0, 1.0, 1.0)).with_bleed(3.0),
        ]),
    )
    .unwrap();
    let mut config = job(input, None, Some(cache_dir.clone()));
    config.config.ink_analysis_enabled = true;
    config.config.ink.dpi = 36;
    // 時間切れで測定不能にする
    config.config.ink.timeout_secs = 0;

    let first = run_job(&config).unwrap();
    assert!(!first.from_cache);
    let ink = first.result.ink.as_ref().expect("ink attempted");
    assert!(matches!(ink.status, InkStatus::Unavailable { .. }));
    let cached = std::fs::read_dir(&cache_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(cached, 0);

    let second = run_job(&config).unwrap();
    assert!(!second.from_cache);
}

/// 壊れたキャッシュエントリはジョブを失敗させない。
#[test]
fn test_run_job_ignores_corrupt_cache() {
    let dir = tempdir().expect("create temp dir");
    let cache_dir = dir.path().join("cache");
    let input = dir.path().join("flyer.pdf");
    std::fs::write(&input, white_overprint_pdf()).unwrap();
    let config = job(input, None, Some(cache_dir.clone()));

    run_job(&config).unwrap();
    for entry in std::fs::read_dir(&cache_dir).unwrap() {
        std::fs::write(entry.unwrap().path(), b"{broken").unwrap();
    }
    let result = run_job(&config).expect("job still runs");
    assert!(!result.from_cache);
    assert_eq!(result.result.verdict, Verdict::Fail);
}

#[test]
fn test_run_job_missing_input() {
    let dir = tempdir().expect("create temp dir");
    let err = run_job(&job(dir.path().join("absent.pdf"), None, None)).unwrap_err();
    assert!(matches!(err, PreflightError::IoError(_)), "got: {err:?}");
}

/// 結果を書き出せない場合はI/Oエラー（キャッシュエラーではない）。
#[test]
fn test_run_job_output_failure_is_io_error() {
    let dir = tempdir().expect("create temp dir");
    let input = dir.path().join("flyer.pdf");
    std::fs::write(&input, white_overprint_pdf()).unwrap();
    // 出力先がディレクトリ
    let err = run_job(&job(input, Some(dir.path().to_path_buf()), None)).unwrap_err();
    assert!(matches!(err, PreflightError::IoError(_)), "got: {err:?}");
}

// ============================================================
// 3. 並列実行
// ============================================================

#[test]
fn test_run_all_jobs_preserves_order_and_isolates_failures() {
    let dir = tempdir().expect("create temp dir");
    let mut jobs = Vec::new();
    for i in 0..4 {
        let input = dir.path().join(format!("doc{i}.pdf"));
        let bytes = if i == 2 {
            b"broken".to_vec()
        } else if i % 2 == 0 {
            white_overprint_pdf()
        } else {
            build_pdf(vec![TestPage::new("").with_bleed(3.0)])
        };
        std::fs::write(&input, bytes).unwrap();
        jobs.push(job(input, None, None));
    }

    let results = run_all_jobs(&jobs, 2);
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().result.verdict, Verdict::Fail);
    assert_eq!(results[1].as_ref().unwrap().result.verdict, Verdict::Pass);
    assert!(results[2].is_err());
    assert_eq!(results[3].as_ref().unwrap().result.verdict, Verdict::Pass);
    for (job, result) in jobs.iter().zip(&results) {
        if let Ok(r) = result {
            assert_eq!(r.input_path, job.input_path);
        }
    }
}

#[test]
fn test_run_all_jobs_default_pool() {
    let dir = tempdir().expect("create temp dir");
    let input = dir.path().join("one.pdf");
    std::fs::write(&input, build_pdf(vec![TestPage::new("").with_bleed(3.0)])).unwrap();
    let results = run_all_jobs(&[job(input, None, None)], 0);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
}

#[test]
fn test_run_all_jobs_empty() {
    assert!(run_all_jobs(&[], 4).is_empty());
}
