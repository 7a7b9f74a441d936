use crate::chunk::Chunk;
use crate::document::Document;
use crate::error::ChunkerConfigError;
use serde::{Deserialize, Serialize};

/// Chunk sizes are measured in characters, not bytes or tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChunkerConfig")]
pub struct ChunkerConfig {
    chunk_size: usize,
    overlap: usize,
}

#[derive(Deserialize)]
struct RawChunkerConfig {
    chunk_size: usize,
    overlap: usize,
}

impl TryFrom<RawChunkerConfig> for ChunkerConfig {
    type Error = ChunkerConfigError;

    fn try_from(raw: RawChunkerConfig) -> Result<Self, Self::Error> {
        Self::new(raw.chunk_size, raw.overlap)
    }
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkerConfigError> {
        if chunk_size == 0 {
            return Err(ChunkerConfigError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkerConfigError::OverlapTooLarge { size: chunk_size, overlap });
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            overlap: 200,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Lazily walk the document. Each call starts over from the first chunk.
    pub fn chunks<'a>(&self, document: &'a Document) -> ChunkIter<'a> {
        ChunkIter::new(document, self.config)
    }

    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        self.chunks(document).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    document: &'a Document,
    config: ChunkerConfig,
    // Byte offset of every char, plus the text length as a sentinel
    boundaries: Vec<usize>,
    next_index: usize,
    done: bool,
}

impl<'a> ChunkIter<'a> {
    fn new(document: &'a Document, config: ChunkerConfig) -> Self {
        let mut boundaries: Vec<usize> = document.text.char_indices().map(|(b, _)| b).collect();
        boundaries.push(document.text.len());

        Self {
            document,
            config,
            done: boundaries.len() == 1,
            boundaries,
            next_index: 0,
        }
    }

    fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let total = self.char_len();
        let start = self.next_index * self.config.stride();
        let end = (start + self.config.chunk_size).min(total);

        let text = &self.document.text[self.boundaries[start]..self.boundaries[end]];
        let chunk = Chunk::new(
            self.document.doc_id.clone(),
            self.next_index,
            text.to_string(),
            self.document.source.clone(),
            (start, end),
        );

        self.next_index += 1;
        self.done = end == total;

        Some(chunk)
    }
}
