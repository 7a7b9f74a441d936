use crate::document::{Chapter, Document, DocumentMetadata, DocumentType};
use crate::error::LoadError;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::{debug, info};

static SKIPPED_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|head|nav|footer)\b[^>]*>.*?</(script|style|head|nav|footer)\s*>")
        .expect("valid block regex")
});
static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<Document, LoadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let doc_type = DocumentType::from_extension(extension)
            .ok_or_else(|| LoadError::UnsupportedFormat(extension.to_string()))?;

        let document = match doc_type {
            DocumentType::Text | DocumentType::Markdown => {
                let content = fs::read_to_string(path)
                    .await
                    .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
                let title = first_heading(&content).unwrap_or_else(|| file_title(path));
                Document::new(
                    path.to_string_lossy(),
                    content,
                    DocumentMetadata { title, author: None, doc_type },
                )
            }
            DocumentType::Pdf => {
                let bytes = fs::read(path)
                    .await
                    .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
                let owned = path.to_path_buf();
                let text = tokio::task::spawn_blocking(move || {
                    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| LoadError::Pdf {
                        path: owned,
                        message: e.to_string(),
                    })
                })
                .await
                .map_err(|e| LoadError::Task(e.to_string()))??;
                Document::new(
                    path.to_string_lossy(),
                    text,
                    DocumentMetadata { title: file_title(path), author: None, doc_type },
                )
            }
            DocumentType::Epub => {
                let owned = path.to_path_buf();
                tokio::task::spawn_blocking(move || read_epub(&owned))
                    .await
                    .map_err(|e| LoadError::Task(e.to_string()))??
            }
        };

        info!(
            doc_id = %document.doc_id,
            title = %document.metadata.title,
            chars = document.char_count(),
            chapters = document.chapters.len(),
            "Loaded document"
        );

        Ok(document)
    }
}

fn read_epub(path: &Path) -> Result<Document, LoadError> {
    let epub_err = |message: String| LoadError::Epub { path: path.to_path_buf(), message };

    let mut book = epub::doc::EpubDoc::new(path).map_err(|e| epub_err(e.to_string()))?;

    let title = book.mdata("title").unwrap_or_else(|| file_title(path));
    let author = book.mdata("creator");

    let mut toc_titles = HashMap::new();
    flatten_toc(&book.toc, &mut toc_titles);

    let spine: Vec<String> = book.spine.clone();
    let mut text = String::new();
    let mut chapters = Vec::new();
    let mut position = 0usize;

    for (idx, id) in spine.iter().enumerate() {
        let resource_path = book.resources.get(id).map(|(p, _)| p.clone());
        let Some((html, _mime)) = book.get_resource_str(id) else {
            debug!(resource = %id, "Skipping unreadable spine item");
            continue;
        };

        let cleaned = clean_html(&html);
        if cleaned.is_empty() {
            continue;
        }

        if !text.is_empty() {
            text.push_str("\n\n");
            position += 2;
        }

        let chapter_title = resource_path
            .and_then(|p| toc_titles.get(&p).cloned())
            .unwrap_or_else(|| format!("Section {}", idx + 1));

        chapters.push(Chapter {
            title: chapter_title,
            seq: chapters.len() + 1,
            start: position,
        });

        position += cleaned.chars().count();
        text.push_str(&cleaned);
    }

    if text.is_empty() {
        return Err(epub_err("no readable content in spine".to_string()));
    }

    Ok(Document::new(
        path.to_string_lossy(),
        text,
        DocumentMetadata { title, author, doc_type: DocumentType::Epub },
    )
    .with_chapters(chapters))
}

fn flatten_toc(points: &[epub::doc::NavPoint], out: &mut HashMap<PathBuf, String>) {
    for point in points {
        let content = point.content.to_string_lossy();
        let target = content.split('#').next().unwrap_or_default();
        out.entry(PathBuf::from(target))
            .or_insert_with(|| point.label.trim().to_string());
        flatten_toc(&point.children, out);
    }
}

/// Strip markup from an XHTML chapter, keeping only readable text
pub fn clean_html(html: &str) -> String {
    let without_blocks = SKIPPED_BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn first_heading(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("# "))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
