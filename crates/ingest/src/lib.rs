pub mod chunk;
pub mod chunker;
pub mod document;
pub mod error;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{ChunkIter, Chunker, ChunkerConfig};
pub use document::{Chapter, Document, DocumentMetadata, DocumentType};
pub use error::{ChunkerConfigError, LoadError};
pub use reader::FileReader;

use sha2::{Digest, Sha256};

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
