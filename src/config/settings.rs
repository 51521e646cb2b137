use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// プロセス全体のデフォルト設定（settings.yaml）。
///
/// 起動時に一度だけ読み込み、以降は不変のスナップショットとして扱う。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub parallel_workers: usize,
    pub default_profile: String,
    pub profiles_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// ジョブ/フォルダで指定がない場合の「インク量分析を行うか」の既定値。
    pub ink_analysis_enabled: bool,
    pub checks: CheckToggles,
    pub bleed: BleedSettings,
    pub ink: InkSettings,
    pub overprint: OverprintSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            parallel_workers: 0,
            default_profile: "offset".to_string(),
            profiles_path: None,
            cache_dir: None,
            ink_analysis_enabled: false,
            checks: CheckToggles::default(),
            bleed: BleedSettings::default(),
            ink: InkSettings::default(),
            overprint: OverprintSettings::default(),
        }
    }
}

/// 検査項目ごとのON/OFF。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckToggles {
    pub transparency: bool,
    pub overprint: bool,
    pub bleed: bool,
    pub spot_colors: bool,
    pub ink_coverage: bool,
    pub fonts: bool,
    pub images: bool,
    pub page_size: bool,
    /// 最小文字サイズの検査。
    pub text_size: bool,
}

impl Default for CheckToggles {
    fn default() -> Self {
        CheckToggles {
            transparency: true,
            overprint: true,
            bleed: true,
            spot_colors: true,
            ink_coverage: true,
            fonts: true,
            images: true,
            page_size: true,
            text_size: true,
        }
    }
}

/// BleedBoxが存在しないページのマージン表現。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingBleedPolicy {
    /// 4辺とも0として記録する。
    #[default]
    Zero,
    /// マージンを未定義(None)として記録する。min_bleedは0。
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BleedSettings {
    pub missing_bleed: MissingBleedPolicy,
}

/// インク量計算に使うラスタライザ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterizerKind {
    #[default]
    Builtin,
    Pdfium,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InkSettings {
    pub dpi: u32,
    pub timeout_secs: u64,
    pub warning_threshold: f64,
    pub max_threshold: f64,
    pub rasterizer: RasterizerKind,
}

impl Default for InkSettings {
    fn default() -> Self {
        InkSettings {
            dpi: 150,
            timeout_secs: 30,
            warning_threshold: 280.0,
            max_threshold: 300.0,
            rasterizer: RasterizerKind::Builtin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverprintSettings {
    pub check_white_overprint: bool,
    pub k_only_as_normal: bool,
    pub warn_light_colors: bool,
    /// C+M+Y+K の合計（各チャンネル0〜100）がこの値以下なら light_color。
    pub light_color_threshold: f64,
}

impl Default for OverprintSettings {
    fn default() -> Self {
        OverprintSettings {
            check_white_overprint: true,
            k_only_as_normal: true,
            warn_light_colors: true,
            light_color_threshold: 20.0,
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        let settings: Settings = serde_yml::from_str(yaml).map_err(|e| {
            crate::error::PreflightError::config(format!("Failed to parse settings YAML: {e}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_yaml(&content)?;

        // profiles_path / cache_dir は settings.yaml からの相対パスとして解決する
        if let Some(dir) = path.parent() {
            settings.profiles_path = settings.profiles_path.map(|p| resolve_relative(dir, p));
            settings.cache_dir = settings.cache_dir.map(|p| resolve_relative(dir, p));
        }
        Ok(settings)
    }

    /// 値域チェック。
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.ink.dpi == 0 || self.ink.dpi > 1200 {
            return Err(crate::error::PreflightError::config(format!(
                "ink.dpi must be between 1 and 1200, got {}",
                self.ink.dpi
            )));
        }
        if self.ink.timeout_secs == 0 {
            return Err(crate::error::PreflightError::config(
                "ink.timeout_secs must be positive",
            ));
        }
        for (key, value) in [
            ("ink.warning_threshold", self.ink.warning_threshold),
            ("ink.max_threshold", self.ink.max_threshold),
        ] {
            if !(0.0..=400.0).contains(&value) {
                return Err(crate::error::PreflightError::config(format!(
                    "{key} must be between 0 and 400, got {value}"
                )));
            }
        }
        if !(0.0..=400.0).contains(&self.overprint.light_color_threshold) {
            return Err(crate::error::PreflightError::config(format!(
                "overprint.light_color_threshold must be between 0 and 400, got {}",
                self.overprint.light_color_threshold
            )));
        }
        if self.ink.rasterizer == RasterizerKind::Pdfium && !cfg!(feature = "pdfium") {
            return Err(crate::error::PreflightError::config(
                "ink.rasterizer: pdfium requires building with the `pdfium` feature",
            ));
        }
        if self.default_profile.trim().is_empty() {
            return Err(crate::error::PreflightError::config(
                "default_profile cannot be empty",
            ));
        }
        Ok(())
    }
}

fn resolve_relative(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
