//! Quality Checker.
//!
//! Turns the analyzer's page records into print-quality signals. Geometry is
//! only read from the records, never recomputed.

pub mod ink;
pub mod overprint;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::merged::AnalysisConfig;
use crate::pdf::geometry::{BleedMargins, points_to_mm};
use crate::pdf::reader::PdfReader;
use crate::render::{Deadline, rasterizer_for};
use crate::structure::StructuralReport;
use ink::{InkCoverageResult, measure_ink_coverage};
use overprint::OverprintRecord;

/// Bleed values of one page, as computed by the analyzer, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BleedCheck {
    pub has_bleed: bool,
    pub min_bleed_mm: f64,
    pub margins_mm: Option<BleedMargins>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageQuality {
    pub page_number: u32,
    /// The page record was partial or missing.
    pub degraded: bool,
    /// Left out of numeric comparisons (bleed, ink, page size).
    pub numeric_excluded: bool,
    pub bleed: BleedCheck,
    pub overprint: OverprintRecord,
}

/// Everything the rule engine reads.
#[derive(Debug, Clone)]
pub struct QualityResult {
    pub config: AnalysisConfig,
    pub structure: StructuralReport,
    pub pages: Vec<PageQuality>,
    /// `None` when ink analysis was not enabled for this run.
    pub ink: Option<InkCoverageResult>,
}

impl QualityResult {
    pub fn ink_analysis_ran(&self) -> bool {
        self.ink.is_some()
    }
}

/// Derive quality signals for every page of the document.
///
/// `ink_analysis_enabled = None` falls back to the configured default.
/// Ink analysis never runs when the `ink_coverage` check is switched off.
#[instrument(skip_all, fields(pages = reader.page_count()))]
pub fn check_all(
    reader: &PdfReader,
    bytes: &[u8],
    structure: StructuralReport,
    ink_analysis_enabled: Option<bool>,
    config: &AnalysisConfig,
) -> QualityResult {
    let run_ink = ink_analysis_enabled.unwrap_or(config.ink_analysis_enabled)
        && config.checks.ink_coverage;

    let pages: Vec<PageQuality> = (1..=reader.page_count())
        .map(|page_number| match structure.page(page_number) {
            Some(record) => {
                let geometry = &record.geometry;
                PageQuality {
                    page_number,
                    degraded: record.degraded,
                    numeric_excluded: record.geometry_unavailable,
                    bleed: BleedCheck {
                        has_bleed: geometry.has_bleed(),
                        min_bleed_mm: geometry.min_bleed_mm(),
                        margins_mm: geometry.bleed_margins().map(|m| BleedMargins {
                            left: points_to_mm(m.left),
                            bottom: points_to_mm(m.bottom),
                            right: points_to_mm(m.right),
                            top: points_to_mm(m.top),
                        }),
                    },
                    overprint: OverprintRecord::from_flags(
                        &record.overprint_flags,
                        &config.overprint,
                    ),
                }
            }
            None => PageQuality {
                page_number,
                degraded: true,
                numeric_excluded: true,
                bleed: BleedCheck {
                    has_bleed: false,
                    min_bleed_mm: 0.0,
                    margins_mm: None,
                },
                overprint: OverprintRecord::default(),
            },
        })
        .collect();

    let ink = run_ink.then(|| {
        let deadline = Deadline::after(config.ink_timeout());
        match rasterizer_for(config.ink.rasterizer, reader, bytes) {
            Ok(rasterizer) => {
                measure_ink_coverage(rasterizer.as_ref(), &structure.pages, &config.ink, deadline)
            }
            Err(e) => InkCoverageResult::unavailable(
                &config.ink,
                "none",
                &structure.pages,
                e.to_string(),
                0,
            ),
        }
    });

    let problematic = pages
        .iter()
        .filter(|p| p.overprint.has_problematic_overprint)
        .count();
    info!(problematic_overprint_pages = problematic, ink = run_ink, "quality checked");

    QualityResult {
        config: config.clone(),
        structure,
        pages,
        ink,
    }
}
