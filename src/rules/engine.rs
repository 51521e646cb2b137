use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::profile::{CheckType, PreflightProfile, PreflightRule, Severity, Threshold};
use crate::pdf::color::ColorSpaceFamily;
use crate::quality::QualityResult;
use crate::quality::ink::InkStatus;
use crate::quality::overprint::OverprintClass;

/// Tolerance for threshold comparisons. PDF reals are stored with limited
/// precision, so a value equal to the threshold after conversion passes.
const EPSILON: f64 = 1e-3;

const DEFAULT_BLEED_MM: f64 = 3.0;
const DEFAULT_IMAGE_DPI: f64 = 150.0;
const DEFAULT_PAGE_SIZE_TOLERANCE_MM: f64 = 1.0;
const DEFAULT_MIN_TEXT_SIZE_PT: f64 = 4.0;
/// Encoded bytes per pixel below which a JPEG image counts as heavily
/// compressed.
const DEFAULT_MIN_JPEG_BYTES_PER_PIXEL: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub check_type: CheckType,
    pub rule_name: String,
    pub severity: Severity,
    /// Empty for document-level checks.
    pub page_numbers: Vec<u32>,
    pub message: String,
    /// The worst measured value, for numeric checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<f64>,
    /// Effective threshold (rule value or default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
}

/// A profile rule that produced no evaluation, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub rule_name: String,
    pub check_type: CheckType,
    pub reason: String,
}

/// Evaluate every rule of `profile`, in profile order.
///
/// Only thresholds and labels upstream values; nothing is recomputed.
/// Rules that cannot run are reported by [`skipped_rules`] instead.
pub fn evaluate(profile: &PreflightProfile, quality: &QualityResult) -> Vec<Finding> {
    let mut findings = Vec::new();
    for rule in &profile.rules {
        if skip_reason(rule, quality).is_some() {
            continue;
        }
        let before = findings.len();
        evaluate_rule(rule, quality, &mut findings);
        debug!(
            rule = %rule.name,
            check_type = %rule.check_type,
            findings = findings.len() - before,
            "rule evaluated"
        );
    }
    findings
}

/// Rules of `profile` that [`evaluate`] does not run for this result.
pub fn skipped_rules(profile: &PreflightProfile, quality: &QualityResult) -> Vec<SkippedRule> {
    profile
        .rules
        .iter()
        .filter_map(|rule| {
            skip_reason(rule, quality).map(|reason| SkippedRule {
                rule_name: rule.name.clone(),
                check_type: rule.check_type,
                reason,
            })
        })
        .collect()
}

fn skip_reason(rule: &PreflightRule, quality: &QualityResult) -> Option<String> {
    let config = &quality.config;
    if !rule.check_type.enabled_by(&config.checks) {
        return Some(format!("check for '{}' is disabled", rule.check_type));
    }
    match rule.check_type {
        CheckType::InkCoverageMax | CheckType::InkCoverageWarning => match &quality.ink {
            None => Some("ink analysis not enabled".to_string()),
            Some(ink) => match &ink.status {
                InkStatus::Complete => None,
                InkStatus::Unavailable { reason } => {
                    Some(format!("ink coverage unavailable: {reason}"))
                }
            },
        },
        CheckType::OverprintWhite if !config.overprint.check_white_overprint => {
            Some("white overprint check disabled".to_string())
        }
        CheckType::OverprintLightColor if !config.overprint.warn_light_colors => {
            Some("light color overprint warnings disabled".to_string())
        }
        _ => None,
    }
}

fn evaluate_rule(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    match rule.check_type {
        CheckType::BleedMargin => bleed_margin(rule, quality, out),
        CheckType::InkCoverageMax => {
            let default = quality.ink.as_ref().map(|i| i.max_threshold);
            ink_coverage(rule, quality, default, out)
        }
        CheckType::InkCoverageWarning => {
            let default = quality.ink.as_ref().map(|i| i.warning_threshold);
            ink_coverage(rule, quality, default, out)
        }
        CheckType::OverprintWhite => {
            // a white object vanishes under overprint: always an error
            for page in &quality.pages {
                let count = page.overprint.count(OverprintClass::White);
                if count > 0 {
                    out.push(finding(
                        rule,
                        Severity::Error,
                        vec![page.page_number],
                        format!(
                            "page {}: {count} white object(s) set to overprint will disappear in print",
                            page.page_number
                        ),
                        Some(count as f64),
                        None,
                    ));
                }
            }
        }
        CheckType::OverprintKOnly => {
            let severity = if quality.config.overprint.k_only_as_normal {
                Severity::Info
            } else {
                rule.severity
            };
            overprint_class(rule, quality, OverprintClass::KOnly, severity, "black-only", out)
        }
        CheckType::OverprintLightColor => overprint_class(
            rule,
            quality,
            OverprintClass::LightColor,
            rule.severity,
            "light color",
            out,
        ),
        CheckType::OverprintOther => overprint_class(
            rule,
            quality,
            OverprintClass::Other,
            rule.severity,
            "other (needs review)",
            out,
        ),
        CheckType::OverprintImage => overprint_image(rule, quality, out),
        CheckType::ColorMode => color_mode(rule, quality, out),
        CheckType::TransparencyPresent => {
            let pages: Vec<u32> = quality
                .structure
                .pages
                .iter()
                .filter(|r| r.color.has_transparency)
                .map(|r| r.page_number)
                .collect();
            if !pages.is_empty() {
                out.push(finding(
                    rule,
                    rule.severity,
                    pages.clone(),
                    format!(
                        "transparency used on {} page(s); flattening may be required",
                        pages.len()
                    ),
                    None,
                    None,
                ));
            }
        }
        CheckType::SpotColorCount => spot_color_count(rule, quality, out),
        CheckType::FontEmbedded => font_embedded(rule, quality, out),
        CheckType::ImageResolution => image_resolution(rule, quality, out),
        CheckType::ImageCompression => image_compression(rule, quality, out),
        CheckType::PageSizeConsistent => page_size_consistent(rule, quality, out),
        CheckType::TextSizeMin => text_size_min(rule, quality, out),
    }
}

fn finding(
    rule: &PreflightRule,
    severity: Severity,
    page_numbers: Vec<u32>,
    message: String,
    measured: Option<f64>,
    threshold: Option<f64>,
) -> Finding {
    Finding {
        check_type: rule.check_type,
        rule_name: rule.name.clone(),
        severity,
        page_numbers,
        message,
        measured,
        threshold: match (threshold, &rule.threshold) {
            (Some(n), _) => Some(Threshold::Number(n)),
            (None, t) => t.clone(),
        },
    }
}

fn number_or(rule: &PreflightRule, default: f64) -> f64 {
    rule.threshold
        .as_ref()
        .and_then(Threshold::as_number)
        .unwrap_or(default)
}

/// Pages that may take part in numeric comparisons.
fn numeric_pages(quality: &QualityResult) -> impl Iterator<Item = &crate::quality::PageQuality> {
    quality.pages.iter().filter(|p| !p.numeric_excluded)
}

fn fold_min(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
}

fn fold_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}

fn bleed_margin(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let threshold = number_or(rule, DEFAULT_BLEED_MM);
    let below: Vec<_> = numeric_pages(quality)
        .filter(|p| p.bleed.min_bleed_mm < threshold - EPSILON)
        .collect();
    if below.is_empty() {
        return;
    }
    let missing = below.iter().filter(|p| !p.bleed.has_bleed).count();
    let worst = fold_min(below.iter().map(|p| p.bleed.min_bleed_mm));
    let mut message = format!(
        "{} page(s) with bleed below {threshold:.1} mm (minimum {:.2} mm)",
        below.len(),
        worst.unwrap_or(0.0)
    );
    if missing > 0 {
        message.push_str(&format!("; {missing} page(s) have no bleed box"));
    }
    out.push(finding(
        rule,
        rule.severity,
        below.iter().map(|p| p.page_number).collect(),
        message,
        worst,
        Some(threshold),
    ));
}

fn ink_coverage(
    rule: &PreflightRule,
    quality: &QualityResult,
    default: Option<f64>,
    out: &mut Vec<Finding>,
) {
    let Some(ink) = &quality.ink else {
        return;
    };
    let threshold = number_or(rule, default.unwrap_or(ink.max_threshold));
    let over: Vec<(u32, f64)> = numeric_pages(quality)
        .filter_map(|p| ink.page_max(p.page_number).map(|v| (p.page_number, v)))
        .filter(|(_, v)| *v > threshold + EPSILON)
        .collect();
    if over.is_empty() {
        return;
    }
    let worst = fold_max(over.iter().map(|(_, v)| *v));
    out.push(finding(
        rule,
        rule.severity,
        over.iter().map(|(n, _)| *n).collect(),
        format!(
            "total ink exceeds {threshold:.0}% on {} page(s) (maximum {:.1}% at {} dpi)",
            over.len(),
            worst.unwrap_or(0.0),
            ink.dpi
        ),
        worst,
        Some(threshold),
    ));
}

fn overprint_class(
    rule: &PreflightRule,
    quality: &QualityResult,
    class: OverprintClass,
    severity: Severity,
    label: &str,
    out: &mut Vec<Finding>,
) {
    let mut total = 0;
    let mut pages = Vec::new();
    for page in &quality.pages {
        // overprinted images are reported by `overprint_image`
        let count = page.overprint.count_vector(class);
        if count > 0 {
            total += count;
            pages.push(page.page_number);
        }
    }
    if total == 0 {
        return;
    }
    out.push(finding(
        rule,
        severity,
        pages.clone(),
        format!(
            "{total} {label} overprint occurrence(s) on {} page(s)",
            pages.len()
        ),
        Some(total as f64),
        None,
    ));
}

fn overprint_image(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let mut total = 0;
    let mut pages = Vec::new();
    for page in &quality.pages {
        let count = page.overprint.count_images();
        if count > 0 {
            total += count;
            pages.push(page.page_number);
        }
    }
    if total == 0 {
        return;
    }
    out.push(finding(
        rule,
        rule.severity,
        pages.clone(),
        format!(
            "{total} image(s) set to overprint on {} page(s); image overprint prints unpredictably",
            pages.len()
        ),
        Some(total as f64),
        None,
    ));
}

fn color_mode(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let mode = rule
        .threshold
        .as_ref()
        .and_then(Threshold::as_text)
        .unwrap_or("cmyk");
    let disallowed: &[ColorSpaceFamily] = match mode {
        "grayscale" => &[ColorSpaceFamily::Rgb, ColorSpaceFamily::Cmyk],
        _ => &[ColorSpaceFamily::Rgb],
    };

    let mut found = BTreeSet::<&ColorSpaceFamily>::new();
    let mut pages = Vec::new();
    for record in &quality.structure.pages {
        let hits: Vec<&ColorSpaceFamily> = record
            .color
            .color_spaces
            .iter()
            .filter(|f| disallowed.contains(f))
            .collect();
        if !hits.is_empty() {
            found.extend(hits);
            pages.push(record.page_number);
        }
    }
    if pages.is_empty() {
        return;
    }
    let names: Vec<String> = found
        .iter()
        .map(|f| format!("{f:?}").to_uppercase())
        .collect();
    out.push(finding(
        rule,
        rule.severity,
        pages.clone(),
        format!(
            "{} color used on {} page(s) of a {mode} document",
            names.join("/"),
            pages.len()
        ),
        None,
        None,
    ));
}

fn spot_color_count(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let spots = &quality.structure.spot_colors;
    let allowed = number_or(rule, 0.0);
    if (spots.len() as f64) <= allowed + EPSILON {
        return;
    }
    let pages: BTreeSet<u32> = spots.iter().flat_map(|s| s.pages.iter().copied()).collect();
    let names: Vec<&str> = spots.iter().map(|s| s.name.as_str()).collect();
    let pantone = spots.iter().filter(|s| s.is_pantone).count();
    out.push(finding(
        rule,
        rule.severity,
        pages.into_iter().collect(),
        format!(
            "{} spot color(s) used, {allowed:.0} allowed ({}); {pantone} PANTONE",
            spots.len(),
            names.join(", ")
        ),
        Some(spots.len() as f64),
        Some(allowed),
    ));
}

fn font_embedded(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let mut fonts = BTreeSet::new();
    let mut pages = Vec::new();
    for record in &quality.structure.pages {
        let missing: Vec<&str> = record
            .fonts
            .iter()
            .filter(|f| f.is_missing_embedding())
            .map(|f| f.base_font.as_str())
            .collect();
        if !missing.is_empty() {
            fonts.extend(missing);
            pages.push(record.page_number);
        }
    }
    if pages.is_empty() {
        return;
    }
    out.push(finding(
        rule,
        rule.severity,
        pages,
        format!(
            "fonts not embedded: {}",
            fonts.into_iter().collect::<Vec<_>>().join(", ")
        ),
        None,
        None,
    ));
}

fn image_resolution(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let threshold = number_or(rule, DEFAULT_IMAGE_DPI);
    let mut low = 0;
    let mut worst: Option<f64> = None;
    let mut pages = Vec::new();
    for record in &quality.structure.pages {
        let page_low: Vec<f64> = record
            .images
            .iter()
            .filter_map(|i| i.effective_ppi)
            .filter(|ppi| *ppi < threshold - EPSILON)
            .collect();
        if !page_low.is_empty() {
            low += page_low.len();
            worst = fold_min(worst.into_iter().chain(page_low));
            pages.push(record.page_number);
        }
    }
    if pages.is_empty() {
        return;
    }
    out.push(finding(
        rule,
        rule.severity,
        pages.clone(),
        format!(
            "{low} image placement(s) below {threshold:.0} dpi on {} page(s) (lowest {:.0} dpi)",
            pages.len(),
            worst.unwrap_or(0.0)
        ),
        worst,
        Some(threshold),
    ));
}

fn image_compression(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let threshold = number_or(rule, DEFAULT_MIN_JPEG_BYTES_PER_PIXEL);
    let mut count = 0;
    let mut worst: Option<f64> = None;
    let mut pages = Vec::new();
    for record in &quality.structure.pages {
        let page_hits: Vec<f64> = record
            .images
            .iter()
            .filter(|i| i.is_jpeg())
            .filter_map(|i| i.bytes_per_pixel())
            .filter(|ratio| *ratio < threshold - EPSILON)
            .collect();
        if !page_hits.is_empty() {
            count += page_hits.len();
            worst = fold_min(worst.into_iter().chain(page_hits));
            pages.push(record.page_number);
        }
    }
    if pages.is_empty() {
        return;
    }
    out.push(finding(
        rule,
        rule.severity,
        pages.clone(),
        format!(
            "{count} JPEG image(s) heavily compressed on {} page(s) (lowest {:.3} bytes/pixel)",
            pages.len(),
            worst.unwrap_or(0.0)
        ),
        worst,
        Some(threshold),
    ));
}

fn text_size_min(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let threshold = number_or(rule, DEFAULT_MIN_TEXT_SIZE_PT);
    let small: Vec<(u32, f64)> = quality
        .structure
        .pages
        .iter()
        .filter_map(|r| r.text.min_size_pt.map(|size| (r.page_number, size)))
        .filter(|(_, size)| *size < threshold - EPSILON)
        .collect();
    if small.is_empty() {
        return;
    }
    let worst = fold_min(small.iter().map(|(_, size)| *size));
    out.push(finding(
        rule,
        rule.severity,
        small.iter().map(|(n, _)| *n).collect(),
        format!(
            "small text below {threshold:.1} pt on {} page(s) (smallest {:.1} pt)",
            small.len(),
            worst.unwrap_or(0.0)
        ),
        worst,
        Some(threshold),
    ));
}

fn page_size_consistent(rule: &PreflightRule, quality: &QualityResult, out: &mut Vec<Finding>) {
    let tolerance = number_or(rule, DEFAULT_PAGE_SIZE_TOLERANCE_MM);
    let sizes: Vec<(u32, (f64, f64))> = numeric_pages(quality)
        .filter_map(|p| quality.structure.page(p.page_number))
        .map(|r| (r.page_number, r.geometry.trim_size_mm()))
        .collect();
    if sizes.len() < 2 {
        return;
    }

    let same = |a: (f64, f64), b: (f64, f64)| {
        (a.0 - b.0).abs() <= tolerance + EPSILON && (a.1 - b.1).abs() <= tolerance + EPSILON
    };
    // most common size; ties go to the earliest page
    let mut reference = sizes[0].1;
    let mut best = 0;
    for (_, size) in &sizes {
        let count = sizes.iter().filter(|(_, s)| same(*s, *size)).count();
        if count > best {
            best = count;
            reference = *size;
        }
    }

    let off: Vec<u32> = sizes
        .iter()
        .filter(|(_, s)| !same(*s, reference))
        .map(|(n, _)| *n)
        .collect();
    if off.is_empty() {
        return;
    }
    out.push(finding(
        rule,
        rule.severity,
        off.clone(),
        format!(
            "{} page(s) differ from the common trim size {:.1} x {:.1} mm",
            off.len(),
            reference.0,
            reference.1
        ),
        None,
        Some(tolerance),
    ));
}
