use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::settings::InkSettings;
use crate::error::PreflightError;
use crate::render::{Deadline, PageRasterizer};
use crate::structure::PageRecord;

/// Max-ink metric of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageInkMetric {
    /// Highest C+M+Y+K total over the page's pixels, percent (0..=400).
    /// `unpainted_objects` counts painting operations the rasterizer left
    /// out, so a non-zero value means the number may be low.
    Measured {
        max_total_percent: f64,
        #[serde(default)]
        unpainted_objects: usize,
    },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInk {
    pub page_number: u32,
    pub metric: PageInkMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InkStatus {
    Complete,
    /// The whole measurement was abandoned (timeout, no rasterizer). No page
    /// carries a number in this state.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InkCoverageResult {
    pub dpi: u32,
    pub rasterizer: String,
    pub warning_threshold: f64,
    pub max_threshold: f64,
    pub status: InkStatus,
    pub pages: Vec<PageInk>,
    pub elapsed_ms: u64,
}

impl InkCoverageResult {
    /// Abandoned result: every page marked unavailable with the same reason.
    pub fn unavailable(
        settings: &InkSettings,
        rasterizer: &str,
        pages: &[PageRecord],
        reason: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        let reason = reason.into();
        InkCoverageResult {
            dpi: settings.dpi,
            rasterizer: rasterizer.to_string(),
            warning_threshold: settings.warning_threshold,
            max_threshold: settings.max_threshold,
            status: InkStatus::Unavailable {
                reason: reason.clone(),
            },
            pages: pages
                .iter()
                .map(|p| PageInk {
                    page_number: p.page_number,
                    metric: PageInkMetric::Unavailable {
                        reason: reason.clone(),
                    },
                })
                .collect(),
            elapsed_ms,
        }
    }

    /// Measured max ink of a page, if the measurement completed.
    pub fn page_max(&self, page_number: u32) -> Option<f64> {
        if self.status != InkStatus::Complete {
            return None;
        }
        self.pages
            .iter()
            .find(|p| p.page_number == page_number)
            .and_then(|p| match p.metric {
                PageInkMetric::Measured {
                    max_total_percent, ..
                } => Some(max_total_percent),
                PageInkMetric::Unavailable { .. } => None,
            })
    }
}

/// Rasterize every page and record its max total ink.
///
/// All pages share one deadline. When it expires the partial numbers are
/// discarded and the result is [`InkStatus::Unavailable`].
pub fn measure_ink_coverage(
    rasterizer: &dyn PageRasterizer,
    pages: &[PageRecord],
    settings: &InkSettings,
    deadline: Deadline,
) -> InkCoverageResult {
    let started = Instant::now();
    let mut measured = Vec::with_capacity(pages.len());

    for page in pages {
        if page.geometry_unavailable {
            measured.push(PageInk {
                page_number: page.page_number,
                metric: PageInkMetric::Unavailable {
                    reason: "page geometry unavailable".to_string(),
                },
            });
            continue;
        }

        match rasterizer.rasterize(page, settings.dpi, &deadline) {
            Ok(raster) => {
                let max_total_percent = raster.max_total_ink_percent();
                let unpainted_objects = raster.unpainted_objects();
                debug!(
                    page = page.page_number,
                    max_total_percent,
                    unpainted_objects,
                    "ink measured"
                );
                measured.push(PageInk {
                    page_number: page.page_number,
                    metric: PageInkMetric::Measured {
                        max_total_percent,
                        unpainted_objects,
                    },
                });
            }
            Err(PreflightError::TimeoutError(reason)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(page = page.page_number, elapsed_ms, "ink analysis timed out");
                return InkCoverageResult::unavailable(
                    settings,
                    rasterizer.name(),
                    pages,
                    reason,
                    elapsed_ms,
                );
            }
            Err(e) => {
                warn!(page = page.page_number, error = %e, "page not rasterized");
                measured.push(PageInk {
                    page_number: page.page_number,
                    metric: PageInkMetric::Unavailable {
                        reason: e.to_string(),
                    },
                });
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        pages = pages.len(),
        dpi = settings.dpi,
        rasterizer = rasterizer.name(),
        elapsed_ms,
        "ink coverage measured"
    );
    InkCoverageResult {
        dpi: settings.dpi,
        rasterizer: rasterizer.name().to_string(),
        warning_threshold: settings.warning_threshold,
        max_threshold: settings.max_threshold,
        status: InkStatus::Complete,
        pages: measured,
        elapsed_ms,
    }
}
