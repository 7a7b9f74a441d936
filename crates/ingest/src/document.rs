use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Epub,
    Pdf,
    Markdown,
    Text,
}

impl DocumentType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            "md" | "markdown" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Pdf => "pdf",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: Option<String>,
    pub doc_type: DocumentType,
}

/// A titled section of the document text, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub seq: usize,
    /// Character position of the chapter's first character in `Document::text`
    pub start: usize,
}

/// A loaded source document. Built once by the reader and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub chapters: Vec<Chapter>,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>, metadata: DocumentMetadata) -> Self {
        let source = source.into();
        Self {
            doc_id: crate::generate_doc_id(&source),
            source,
            text: text.into(),
            metadata,
            chapters: Vec::new(),
        }
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}
