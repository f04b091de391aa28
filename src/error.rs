use thiserror::Error;

/// Failures surfaced by the converter. None of them end the session; each
/// maps to a notice and leaves the form in an actionable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConverterError {
    /// Rejected locally before any network call.
    #[error("{0}")]
    Validation(String),

    /// Model catalog could not be fetched; recovered with the built-in list.
    #[error("Failed to load models: {0}")]
    CatalogFetch(String),

    /// Backend reported a failure or the request never completed.
    #[error("{0}")]
    Conversion(String),

    /// Auxiliary backend calls (history, status probe).
    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Failed to copy to clipboard: {0}")]
    Clipboard(String),

    #[error("Failed to download JSON: {0}")]
    Download(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConverterError>;
