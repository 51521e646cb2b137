use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::settings::CheckToggles;
use crate::error::PreflightError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    BleedMargin,
    InkCoverageMax,
    InkCoverageWarning,
    OverprintWhite,
    OverprintKOnly,
    OverprintLightColor,
    OverprintOther,
    OverprintImage,
    ColorMode,
    TransparencyPresent,
    SpotColorCount,
    FontEmbedded,
    ImageResolution,
    ImageCompression,
    PageSizeConsistent,
    TextSizeMin,
}

/// What a rule's `threshold` must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    /// Optional number; a default applies when omitted.
    Number,
    /// Required text, one of the listed values.
    Text(&'static [&'static str]),
    /// No threshold allowed.
    None,
}

impl CheckType {
    pub const ALL: [CheckType; 16] = [
        CheckType::BleedMargin,
        CheckType::InkCoverageMax,
        CheckType::InkCoverageWarning,
        CheckType::OverprintWhite,
        CheckType::OverprintKOnly,
        CheckType::OverprintLightColor,
        CheckType::OverprintOther,
        CheckType::OverprintImage,
        CheckType::ColorMode,
        CheckType::TransparencyPresent,
        CheckType::SpotColorCount,
        CheckType::FontEmbedded,
        CheckType::ImageResolution,
        CheckType::ImageCompression,
        CheckType::PageSizeConsistent,
        CheckType::TextSizeMin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::BleedMargin => "bleed_margin",
            CheckType::InkCoverageMax => "ink_coverage_max",
            CheckType::InkCoverageWarning => "ink_coverage_warning",
            CheckType::OverprintWhite => "overprint_white",
            CheckType::OverprintKOnly => "overprint_k_only",
            CheckType::OverprintLightColor => "overprint_light_color",
            CheckType::OverprintOther => "overprint_other",
            CheckType::OverprintImage => "overprint_image",
            CheckType::ColorMode => "color_mode",
            CheckType::TransparencyPresent => "transparency_present",
            CheckType::SpotColorCount => "spot_color_count",
            CheckType::FontEmbedded => "font_embedded",
            CheckType::ImageResolution => "image_resolution",
            CheckType::ImageCompression => "image_compression",
            CheckType::PageSizeConsistent => "page_size_consistent",
            CheckType::TextSizeMin => "text_size_min",
        }
    }

    pub fn parse(s: &str) -> Option<CheckType> {
        CheckType::ALL.into_iter().find(|c| c.as_str() == s)
    }

    pub fn threshold_kind(&self) -> ThresholdKind {
        match self {
            CheckType::BleedMargin
            | CheckType::InkCoverageMax
            | CheckType::InkCoverageWarning
            | CheckType::SpotColorCount
            | CheckType::ImageResolution
            | CheckType::ImageCompression
            | CheckType::PageSizeConsistent
            | CheckType::TextSizeMin => ThresholdKind::Number,
            CheckType::ColorMode => ThresholdKind::Text(&["cmyk", "grayscale"]),
            CheckType::OverprintWhite
            | CheckType::OverprintKOnly
            | CheckType::OverprintLightColor
            | CheckType::OverprintOther
            | CheckType::OverprintImage
            | CheckType::TransparencyPresent
            | CheckType::FontEmbedded => ThresholdKind::None,
        }
    }

    /// The global check toggle this rule belongs to. `color_mode` has no
    /// toggle of its own.
    pub fn enabled_by(&self, checks: &CheckToggles) -> bool {
        match self {
            CheckType::BleedMargin => checks.bleed,
            CheckType::InkCoverageMax | CheckType::InkCoverageWarning => checks.ink_coverage,
            CheckType::OverprintWhite
            | CheckType::OverprintKOnly
            | CheckType::OverprintLightColor
            | CheckType::OverprintOther
            | CheckType::OverprintImage => checks.overprint,
            CheckType::ColorMode => true,
            CheckType::TransparencyPresent => checks.transparency,
            CheckType::SpotColorCount => checks.spot_colors,
            CheckType::FontEmbedded => checks.fonts,
            CheckType::ImageResolution | CheckType::ImageCompression => checks.images,
            CheckType::PageSizeConsistent => checks.page_size,
            CheckType::TextSizeMin => checks.text_size,
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Number(f64),
    Text(String),
}

impl Threshold {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Threshold::Number(n) => Some(*n),
            Threshold::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Threshold::Text(s) => Some(s),
            Threshold::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightRule {
    pub name: String,
    pub check_type: CheckType,
    pub threshold: Option<Threshold>,
    pub severity: Severity,
}

/// Named, ordered rule set. No two rules share a `check_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightProfile {
    pub name: String,
    pub rules: Vec<PreflightRule>,
}

impl PreflightProfile {
    /// Build and validate a profile.
    pub fn new(name: impl Into<String>, rules: Vec<PreflightRule>) -> crate::error::Result<Self> {
        let profile = PreflightProfile {
            name: name.into(),
            rules,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(PreflightError::config("profile name cannot be empty"));
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.check_type) {
                return Err(PreflightError::config(format!(
                    "profile '{}': duplicate check_type '{}' (rule '{}')",
                    self.name, rule.check_type, rule.name
                )));
            }
            validate_threshold(&self.name, rule)?;
        }
        Ok(())
    }

    pub fn rule(&self, check_type: CheckType) -> Option<&PreflightRule> {
        self.rules.iter().find(|r| r.check_type == check_type)
    }
}

fn validate_threshold(profile: &str, rule: &PreflightRule) -> crate::error::Result<()> {
    let bad = |msg: String| {
        Err(PreflightError::config(format!(
            "profile '{profile}', rule '{}' ({}): {msg}",
            rule.name, rule.check_type
        )))
    };
    match (rule.check_type.threshold_kind(), &rule.threshold) {
        (ThresholdKind::Number, None) | (ThresholdKind::None, None) => Ok(()),
        (ThresholdKind::Number, Some(Threshold::Number(n))) => {
            if n.is_finite() && *n >= 0.0 {
                Ok(())
            } else {
                bad(format!("threshold must be a non-negative number, got {n}"))
            }
        }
        (ThresholdKind::Number, Some(Threshold::Text(t))) => {
            bad(format!("threshold must be a number, got \"{t}\""))
        }
        (ThresholdKind::Text(allowed), Some(Threshold::Text(t))) => {
            if allowed.contains(&t.as_str()) {
                Ok(())
            } else {
                bad(format!("threshold must be one of {allowed:?}, got \"{t}\""))
            }
        }
        (ThresholdKind::Text(allowed), _) => {
            bad(format!("threshold must be one of {allowed:?}"))
        }
        (ThresholdKind::None, Some(_)) => bad("takes no threshold".to_string()),
    }
}

/// The profiles available to one process run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCatalog {
    profiles: Vec<PreflightProfile>,
}

impl ProfileCatalog {
    /// Built-in `offset` and `digital` profiles.
    pub fn builtin() -> Self {
        ProfileCatalog {
            profiles: vec![offset_profile(), digital_profile()],
        }
    }

    /// Built-ins plus the profiles of a JSON file. File entries replace
    /// built-ins with the same name.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let mut catalog = Self::builtin();
        if let Some(path) = path {
            let json = std::fs::read_to_string(path).map_err(|e| {
                PreflightError::config(format!(
                    "cannot read profiles file {}: {e}",
                    path.display()
                ))
            })?;
            for profile in parse_profiles_json(&json)? {
                catalog.insert(profile);
            }
        }
        debug!(profiles = ?catalog.names(), "profile catalog loaded");
        Ok(catalog)
    }

    pub fn insert(&mut self, profile: PreflightProfile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
    }

    pub fn get(&self, name: &str) -> crate::error::Result<&PreflightProfile> {
        self.profiles.iter().find(|p| p.name == name).ok_or_else(|| {
            PreflightError::config(format!(
                "unknown preflight profile '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    check_type: String,
    #[serde(default)]
    threshold: Option<Threshold>,
    severity: String,
}

/// Parse `{ profile: { rule_name: {check_type, threshold, severity} } }`.
///
/// Rule order follows the file.
pub fn parse_profiles_json(json: &str) -> crate::error::Result<Vec<PreflightProfile>> {
    let root: Map<String, Value> = serde_json::from_str(json)?;
    let mut profiles = Vec::with_capacity(root.len());

    for (profile_name, rules_value) in root {
        let Value::Object(rules_map) = rules_value else {
            return Err(PreflightError::config(format!(
                "profile '{profile_name}' must be an object of rules"
            )));
        };

        let mut rules = Vec::with_capacity(rules_map.len());
        for (rule_name, rule_value) in rules_map {
            let raw: RawRule = serde_json::from_value(rule_value).map_err(|e| {
                PreflightError::config(format!(
                    "profile '{profile_name}', rule '{rule_name}': {e}"
                ))
            })?;
            let check_type = CheckType::parse(&raw.check_type).ok_or_else(|| {
                PreflightError::config(format!(
                    "profile '{profile_name}', rule '{rule_name}': unknown check_type '{}'",
                    raw.check_type
                ))
            })?;
            let severity = Severity::parse(&raw.severity).ok_or_else(|| {
                PreflightError::config(format!(
                    "profile '{profile_name}', rule '{rule_name}': unknown severity '{}'",
                    raw.severity
                ))
            })?;
            rules.push(PreflightRule {
                name: rule_name,
                check_type,
                threshold: raw.threshold,
                severity,
            });
        }
        profiles.push(PreflightProfile::new(profile_name, rules)?);
    }
    Ok(profiles)
}

fn rule(name: &str, check_type: CheckType, threshold: Option<Threshold>, severity: Severity) -> PreflightRule {
    PreflightRule {
        name: name.to_string(),
        check_type,
        threshold,
        severity,
    }
}

fn offset_profile() -> PreflightProfile {
    use CheckType::*;
    use Severity::*;
    let n = |v: f64| Some(Threshold::Number(v));
    PreflightProfile {
        name: "offset".to_string(),
        rules: vec![
            rule("min_bleed", BleedMargin, n(3.0), Error),
            // ink thresholds come from settings (ink.max_threshold / warning_threshold)
            rule("ink_limit", InkCoverageMax, None, Error),
            rule("ink_warning", InkCoverageWarning, None, Warning),
            rule("white_overprint", OverprintWhite, None, Error),
            rule("k_only_overprint", OverprintKOnly, None, Info),
            rule("light_color_overprint", OverprintLightColor, None, Warning),
            rule("other_overprint", OverprintOther, None, Warning),
            rule("image_overprint", OverprintImage, None, Error),
            rule("cmyk_only", ColorMode, Some(Threshold::Text("cmyk".to_string())), Warning),
            rule("spot_colors", SpotColorCount, n(2.0), Warning),
            rule("transparency", TransparencyPresent, None, Warning),
            rule("fonts_embedded", FontEmbedded, None, Error),
            rule("image_resolution", ImageResolution, n(150.0), Warning),
            rule("image_compression", ImageCompression, n(0.5), Warning),
            rule("page_size", PageSizeConsistent, n(1.0), Warning),
            rule("min_text_size", TextSizeMin, n(4.0), Warning),
        ],
    }
}

fn digital_profile() -> PreflightProfile {
    use CheckType::*;
    use Severity::*;
    let n = |v: f64| Some(Threshold::Number(v));
    PreflightProfile {
        name: "digital".to_string(),
        rules: vec![
            rule("min_bleed", BleedMargin, n(1.0), Warning),
            rule("ink_limit", InkCoverageMax, None, Warning),
            rule("white_overprint", OverprintWhite, None, Error),
            rule("image_overprint", OverprintImage, None, Error),
            rule("spot_colors", SpotColorCount, n(0.0), Warning),
            rule("transparency", TransparencyPresent, None, Info),
            rule("fonts_embedded", FontEmbedded, None, Error),
            rule("image_resolution", ImageResolution, n(100.0), Warning),
            rule("min_text_size", TextSizeMin, n(4.0), Warning),
        ],
    }
}
