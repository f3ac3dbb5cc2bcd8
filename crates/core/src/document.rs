use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};

/// A loaded document: an ordered sequence of page texts. Immutable once
/// constructed; the pipeline consumes it whole at build time.
#[derive(Debug, Clone)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub pages: Vec<String>,
    pub checksum: Option<String>,
}

impl Document {
    /// Wraps the output of an external loader. Page order is preserved.
    pub fn from_pages(title: impl Into<String>, pages: Vec<String>) -> Self {
        let title = title.into();
        Self {
            document_id: digest_str(&title),
            title,
            pages,
            checksum: None,
        }
    }
}

/// Reads a plain-text document from disk. Form feed characters separate
/// pages; a file without form feeds is a single page. Loader failures
/// are reported opaquely as `DocumentLoad`.
pub fn load_text_document(path: &Path) -> Result<Document> {
    let bytes = fs::read(path)
        .map_err(|error| PipelineError::DocumentLoad(format!("{}: {error}", path.display())))?;
    let text = String::from_utf8(bytes.clone())
        .map_err(|error| PipelineError::DocumentLoad(format!("{}: {error}", path.display())))?;

    let title = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            PipelineError::DocumentLoad(format!("path missing filename: {}", path.display()))
        })?
        .to_string();

    let pages = text
        .split('\u{000C}')
        .filter(|page| !page.trim().is_empty())
        .map(|page| page.to_string())
        .collect::<Vec<_>>();

    if pages.is_empty() {
        return Err(PipelineError::DocumentLoad(format!(
            "document has no readable page text: {}",
            path.display()
        )));
    }

    Ok(Document {
        document_id: digest_str(&path.to_string_lossy()),
        title,
        pages,
        checksum: Some(digest_bytes(&bytes)),
    })
}

fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn digest_str(text: &str) -> String {
    digest_bytes(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn form_feeds_split_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.txt");
        let mut file = fs::File::create(&path)?;
        file.write_all("First page\u{000C}Second page\u{000C}  \u{000C}Third page".as_bytes())?;

        let document = load_text_document(&path)?;
        assert_eq!(document.title, "manual.txt");
        assert_eq!(document.pages.len(), 3);
        assert_eq!(document.pages[1], "Second page");
        assert!(document.checksum.is_some());
        Ok(())
    }

    #[test]
    fn missing_file_is_a_load_failure() {
        let result = load_text_document(Path::new("/nonexistent/manual.txt"));
        assert!(matches!(result, Err(PipelineError::DocumentLoad(_))));
    }

    #[test]
    fn blank_file_is_a_load_failure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.txt");
        fs::write(&path, "   \n\u{000C}  ")?;

        let result = load_text_document(&path);
        assert!(matches!(result, Err(PipelineError::DocumentLoad(_))));
        Ok(())
    }

    #[test]
    fn from_pages_preserves_order() {
        let document =
            Document::from_pages("notes", vec!["one".to_string(), "two".to_string()]);
        assert_eq!(document.pages, vec!["one", "two"]);
        assert!(document.checksum.is_none());
    }
}
