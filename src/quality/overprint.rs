use serde::{Deserialize, Serialize};

use crate::config::settings::OverprintSettings;
use crate::pdf::color::Cmyk;
use crate::structure::{OverprintFlag, OverprintObjectKind};

/// Tolerance for the light-color sum comparison (percent points).
const SUM_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverprintClass {
    /// All four components zero: the object vanishes when overprinted.
    White,
    /// Only black ink.
    KOnly,
    /// C+M+Y+K at or below the light-color threshold.
    LightColor,
    /// Anything else, including colors that could not be resolved.
    Other,
}

/// Classify one overprinted color. Checks run in priority order, so every
/// color lands in exactly one class.
///
/// `light_color_threshold` is a sum over the 0..=100 per-channel scale.
pub fn classify_overprint(color: Option<&Cmyk>, light_color_threshold: f64) -> OverprintClass {
    let Some(color) = color else {
        return OverprintClass::Other;
    };
    let [c, m, y, k] = color.percentages();
    if c == 0.0 && m == 0.0 && y == 0.0 && k == 0.0 {
        OverprintClass::White
    } else if c == 0.0 && m == 0.0 && y == 0.0 {
        OverprintClass::KOnly
    } else if color.total_percent() <= light_color_threshold + SUM_EPSILON {
        OverprintClass::LightColor
    } else {
        OverprintClass::Other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedOverprint {
    pub class: OverprintClass,
    #[serde(flatten)]
    pub flag: OverprintFlag,
}

/// Classified overprint occurrences of one page, in content order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverprintRecord {
    pub occurrences: Vec<ClassifiedOverprint>,
    pub has_problematic_overprint: bool,
}

impl OverprintRecord {
    pub fn from_flags(flags: &[OverprintFlag], settings: &OverprintSettings) -> Self {
        let occurrences: Vec<ClassifiedOverprint> = flags
            .iter()
            .map(|flag| ClassifiedOverprint {
                class: classify_overprint(flag.color.as_ref(), settings.light_color_threshold),
                flag: flag.clone(),
            })
            .collect();

        // overprinted sampled images are problematic whatever their class
        let has_problematic_overprint = occurrences.iter().any(|o| {
            o.flag.object_kind == OverprintObjectKind::Image
                || match o.class {
                    OverprintClass::White => settings.check_white_overprint,
                    OverprintClass::KOnly => !settings.k_only_as_normal,
                    _ => false,
                }
        });

        OverprintRecord {
            occurrences,
            has_problematic_overprint,
        }
    }

    pub fn count(&self, class: OverprintClass) -> usize {
        self.occurrences.iter().filter(|o| o.class == class).count()
    }

    /// Occurrences of `class` painted by vector objects (paths, text,
    /// shadings, stencil masks).
    pub fn count_vector(&self, class: OverprintClass) -> usize {
        self.occurrences
            .iter()
            .filter(|o| o.class == class && o.flag.object_kind == OverprintObjectKind::Vector)
            .count()
    }

    /// Overprinted sampled images.
    pub fn count_images(&self) -> usize {
        self.occurrences
            .iter()
            .filter(|o| o.flag.object_kind == OverprintObjectKind::Image)
            .count()
    }
}
