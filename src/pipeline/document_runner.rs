// 1文書分のパイプライン: 構造解析 -> 品質検査 -> ルール評価

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::cache::hash::fingerprint;
use crate::config::merged::AnalysisConfig;
use crate::pdf::reader::PdfReader;
use crate::quality::ink::{InkCoverageResult, InkStatus};
use crate::quality::{PageQuality, check_all};
use crate::rules::{Finding, PreflightProfile, SkippedRule, Verdict, evaluate, skipped_rules, verdict};
use crate::structure::{PageRecord, SpotColor, analyze_structure};

/// Who the document is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentIdentity {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub page_count: u32,
    pub pdf_version: String,
}

/// Structural record and quality signals of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub record: PageRecord,
    pub quality: PageQuality,
}

/// Aggregate outcome of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub document: DocumentIdentity,
    pub profile: String,
    pub config: AnalysisConfig,
    pub pages: Vec<PageAnalysis>,
    pub spot_colors: Vec<SpotColor>,
    pub ink: Option<InkCoverageResult>,
    pub findings: Vec<Finding>,
    pub skipped_rules: Vec<SkippedRule>,
    /// Structural caveats, prefixed with their page.
    pub caveats: Vec<String>,
    pub verdict: Verdict,
}

impl AnalysisResult {
    pub fn degraded_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| p.quality.degraded)
            .map(|p| p.quality.page_number)
            .collect()
    }

    /// Results whose ink measurement was abandoned depend on wall-clock time
    /// and must not be replayed from the cache.
    pub fn is_cacheable(&self) -> bool {
        !matches!(
            self.ink.as_ref().map(|i| &i.status),
            Some(InkStatus::Unavailable { .. })
        )
    }
}

/// Run the whole pipeline over one document's bytes.
///
/// Fails only when the document cannot be opened (`MalformedDocumentError`);
/// every other problem is recorded in the result.
#[instrument(skip_all, fields(document = name, profile = %profile.name))]
pub fn analyze_document(
    bytes: &[u8],
    name: &str,
    profile: &PreflightProfile,
    config: &AnalysisConfig,
) -> crate::error::Result<AnalysisResult> {
    let started = Instant::now();
    let reader = PdfReader::from_bytes(bytes)?;

    let structure = analyze_structure(&reader, config);
    let quality = check_all(&reader, bytes, structure, None, config);
    let findings = evaluate(profile, &quality);
    let skipped = skipped_rules(profile, &quality);
    let verdict = verdict(&findings);

    let document = DocumentIdentity {
        name: name.to_string(),
        size_bytes: bytes.len() as u64,
        sha256: fingerprint(bytes),
        page_count: reader.page_count(),
        pdf_version: reader.version().to_string(),
    };

    let crate::quality::QualityResult {
        config,
        structure,
        pages: qualities,
        ink,
    } = quality;

    let caveats = structure
        .pages
        .iter()
        .flat_map(|p| {
            p.caveats
                .iter()
                .map(move |c| format!("page {}: {c}", p.page_number))
        })
        .collect();

    let pages = qualities
        .into_iter()
        .map(|q| {
            let record = structure.page(q.page_number).cloned().unwrap_or_else(|| {
                PageRecord::missing(q.page_number, config.missing_bleed_policy())
            });
            PageAnalysis { record, quality: q }
        })
        .collect();

    info!(
        findings = findings.len(),
        skipped = skipped.len(),
        verdict = ?verdict,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "document analyzed"
    );

    Ok(AnalysisResult {
        document,
        profile: profile.name.clone(),
        config,
        pages,
        spot_colors: structure.spot_colors,
        ink,
        findings,
        skipped_rules: skipped,
        caveats,
        verdict,
    })
}
