use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::job::Job;
use super::settings::{
    BleedSettings, CheckToggles, InkSettings, MissingBleedPolicy, OverprintSettings, Settings,
};

/// 呼び出し単位の上書き設定。`None` はプロセス既定値を使う。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationSettings {
    pub profile: Option<String>,
    pub include_ink_analysis: Option<bool>,
    pub ink_dpi: Option<u32>,
    pub ink_timeout_secs: Option<u64>,
}

/// 解析がどこから起動されたか。呼び出し境界で一度だけ解決する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationContext {
    FolderWatch {
        path: PathBuf,
        settings: InvocationSettings,
    },
    InteractiveDrop {
        settings: InvocationSettings,
    },
}

impl InvocationContext {
    pub fn from_job(job: &Job) -> Self {
        let settings = InvocationSettings {
            profile: job.profile.clone(),
            include_ink_analysis: job.include_ink_analysis,
            ink_dpi: job.ink_dpi,
            ink_timeout_secs: job.ink_timeout_secs,
        };
        match &job.folder {
            Some(folder) => InvocationContext::FolderWatch {
                path: PathBuf::from(folder),
                settings,
            },
            None => InvocationContext::InteractiveDrop { settings },
        }
    }

    pub fn settings(&self) -> &InvocationSettings {
        match self {
            InvocationContext::FolderWatch { settings, .. }
            | InvocationContext::InteractiveDrop { settings } => settings,
        }
    }

    pub fn source_label(&self) -> String {
        match self {
            InvocationContext::FolderWatch { path, .. } => {
                format!("folder:{}", path.display())
            }
            InvocationContext::InteractiveDrop { .. } => "interactive".to_string(),
        }
    }

    /// プロセス設定と呼び出し単位の上書きを合成し、不変のスナップショットを作る。
    pub fn resolve(&self, settings: &Settings) -> AnalysisConfig {
        let overrides = self.settings();
        let mut ink = settings.ink;
        if let Some(dpi) = overrides.ink_dpi {
            ink.dpi = dpi;
        }
        if let Some(secs) = overrides.ink_timeout_secs {
            ink.timeout_secs = secs;
        }

        // checks.ink_coverage がOFFなら、呼び出し側の指定に関わらず分析しない
        let requested = overrides
            .include_ink_analysis
            .unwrap_or(settings.ink_analysis_enabled);

        AnalysisConfig {
            profile: overrides
                .profile
                .clone()
                .unwrap_or_else(|| settings.default_profile.clone()),
            ink_analysis_enabled: requested && settings.checks.ink_coverage,
            checks: settings.checks,
            bleed: settings.bleed,
            ink,
            overprint: settings.overprint,
        }
    }
}

/// 1回の解析で参照する設定のすべて。解析中は変更されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub profile: String,
    pub ink_analysis_enabled: bool,
    pub checks: CheckToggles,
    pub bleed: BleedSettings,
    pub ink: InkSettings,
    pub overprint: OverprintSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        InvocationContext::InteractiveDrop {
            settings: InvocationSettings::default(),
        }
        .resolve(&Settings::default())
    }
}

impl AnalysisConfig {
    pub fn missing_bleed_policy(&self) -> MissingBleedPolicy {
        self.bleed.missing_bleed
    }

    pub fn ink_timeout(&self) -> Duration {
        Duration::from_secs(self.ink.timeout_secs)
    }
}
