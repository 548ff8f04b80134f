//! Error types for sign extraction

use signscan_pdf::PdfEngineError;

/// Errors that end processing of a document or page
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("PDF engine error: {0}")]
    Pdf(#[from] PdfEngineError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type SignResult<T> = Result<T, SignError>;
