use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning a source file into a `Document`.
/// All of them abort a run before any chunking happens.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read file: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF parsing error in {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("EPUB parsing error in {path}: {message}")]
    Epub { path: PathBuf, message: String },

    #[error("Document loader task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerConfigError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}
