use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    pub jobs: Vec<Job>,
}

/// 1ドキュメント分の解析ジョブ。
///
/// `folder` が指定されていれば監視フォルダ経由の起動、
/// なければ対話的なドロップとして扱う（[`crate::config::merged::InvocationContext`]）。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    pub input: String,
    pub output: Option<String>,
    pub profile: Option<String>,
    pub folder: Option<String>,
    pub include_ink_analysis: Option<bool>,
    pub ink_dpi: Option<u32>,
    pub ink_timeout_secs: Option<u64>,
}

impl JobFile {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        let job_file: JobFile = serde_yml::from_str(yaml)?;
        if job_file.jobs.is_empty() {
            return Err(crate::error::PreflightError::config(
                "Job file must contain at least one job",
            ));
        }
        for job in &job_file.jobs {
            job.validate()?;
        }
        Ok(job_file)
    }
}

impl Job {
    fn validate(&self) -> crate::error::Result<()> {
        if self.input.trim().is_empty() {
            return Err(crate::error::PreflightError::config(
                "Job input path cannot be empty",
            ));
        }
        if let Some(dpi) = self.ink_dpi
            && (dpi == 0 || dpi > 1200)
        {
            return Err(crate::error::PreflightError::config(format!(
                "ink_dpi must be between 1 and 1200, got {dpi}"
            )));
        }
        if self.ink_timeout_secs == Some(0) {
            return Err(crate::error::PreflightError::config(
                "ink_timeout_secs must be positive",
            ));
        }
        if let Some(profile) = &self.profile
            && profile.trim().is_empty()
        {
            return Err(crate::error::PreflightError::config(
                "Job profile name cannot be empty",
            ));
        }
        Ok(())
    }
}
