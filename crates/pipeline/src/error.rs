use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error(transparent)]
    Chunking(#[from] ingest::ChunkerConfigError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid pipeline graph: {0}")]
    Graph(String),

    #[error(transparent)]
    Load(#[from] ingest::LoadError),

    #[error(transparent)]
    Schema(#[from] extract::SchemaError),

    #[error(transparent)]
    Extraction(extract::ExtractionError),

    #[error(transparent)]
    Store(#[from] index::StoreError),

    #[error(transparent)]
    Vector(#[from] index::VectorError),

    #[error("run cancelled")]
    Cancelled,
}

impl From<extract::ExtractionError> for PipelineError {
    fn from(err: extract::ExtractionError) -> Self {
        match err {
            extract::ExtractionError::Cancelled => Self::Cancelled,
            other => Self::Extraction(other),
        }
    }
}
