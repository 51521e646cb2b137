use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreflightError {
    /// The document cannot be opened or parsed at all (fatal).
    #[error("Malformed document: {0}")]
    MalformedDocumentError(String),

    /// A page or feature could not be interpreted (recoverable).
    #[error("Unsupported feature: {0}")]
    UnsupportedFeatureError(String),

    /// Invalid settings, job files or profile definitions (fatal, pre-execution).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The ink analysis budget expired (recoverable, ink analysis only).
    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Render error: {0}")]
    RenderError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PreflightError {
    /// 致命的でない（ページ/メトリック単位で劣化させて続行できる）エラーか。
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFeatureError(_) | Self::TimeoutError(_) | Self::RenderError(_)
        )
    }
}

/// Generates factory methods for [`PreflightError`] variants that wrap a `String`.
macro_rules! error_constructors {
    ($(
        $(#[doc = $doc:expr])*
        $method:ident => $variant:ident
    ),* $(,)?) => {
        impl PreflightError {
            $(
                $(#[doc = $doc])*
                pub fn $method(msg: impl Into<String>) -> Self {
                    Self::$variant(msg.into())
                }
            )*
        }
    };
}

error_constructors! {
    /// Create a malformed document error.
    malformed => MalformedDocumentError,
    /// Create an unsupported feature error.
    unsupported => UnsupportedFeatureError,
    /// Create a configuration error.
    config => ConfigurationError,
    /// Create a timeout error.
    timeout => TimeoutError,
    /// Create a render error.
    render => RenderError,
    /// Create a cache error.
    cache => CacheError,
}

impl From<lopdf::Error> for PreflightError {
    fn from(e: lopdf::Error) -> Self {
        Self::MalformedDocumentError(e.to_string())
    }
}

impl From<serde_json::Error> for PreflightError {
    fn from(e: serde_json::Error) -> Self {
        Self::ConfigurationError(e.to_string())
    }
}

impl From<serde_yml::Error> for PreflightError {
    fn from(e: serde_yml::Error) -> Self {
        Self::ConfigurationError(e.to_string())
    }
}

#[cfg(feature = "pdfium")]
impl From<pdfium_render::prelude::PdfiumError> for PreflightError {
    fn from(e: pdfium_render::prelude::PdfiumError) -> Self {
        Self::RenderError(e.to_string())
    }
}

impl From<image::ImageError> for PreflightError {
    fn from(e: image::ImageError) -> Self {
        Self::UnsupportedFeatureError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PreflightError>;
