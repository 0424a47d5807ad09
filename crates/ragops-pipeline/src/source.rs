//! Document sources for the discover step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ragops_types::Document;
use tracing::debug;

use crate::error::PipelineError;

/// Supplies the documents of a dataset.
pub trait DocumentSource: Send + Sync {
    /// Load every document of `dataset`, in a stable order.
    ///
    /// An empty dataset is an error.
    fn load(&self, dataset: &str) -> Result<Vec<Document>, PipelineError>;
}

fn no_docs(root: &Path, dataset: &str) -> PipelineError {
    PipelineError::Source(format!(
        "No docs found in {} (dataset={})",
        root.display(),
        dataset
    ))
}

/// Reads `*.md` files from a directory.
///
/// Uses `root/<dataset>` when that directory exists, otherwise `root`.
/// Files are read in file-name order; `doc_id` is the file stem.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dataset_root(&self, dataset: &str) -> PathBuf {
        let nested = self.root.join(dataset);
        if !dataset.is_empty() && nested.is_dir() {
            nested
        } else {
            self.root.clone()
        }
    }
}

impl DocumentSource for DirectorySource {
    fn load(&self, dataset: &str) -> Result<Vec<Document>, PipelineError> {
        let root = self.dataset_root(dataset);
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(_) => return Err(no_docs(&root, dataset)),
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::Source(format!("failed to read {}: {}", path.display(), e))
            })?;
            let doc_id = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            docs.push(Document {
                doc_id,
                path: path.to_string_lossy().to_string(),
                text,
            });
        }

        if docs.is_empty() {
            return Err(no_docs(&root, dataset));
        }
        debug!(root = %root.display(), dataset = %dataset, count = docs.len(), "Loaded documents");
        Ok(docs)
    }
}

/// In-memory documents, per dataset.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    datasets: HashMap<String, Vec<Document>>,
    fallback: Vec<Document>,
}

impl StaticSource {
    /// A source returning `docs` for every dataset.
    pub fn new(docs: Vec<Document>) -> Self {
        Self {
            datasets: HashMap::new(),
            fallback: docs,
        }
    }

    /// Build documents from `(doc_id, text)` pairs.
    pub fn from_texts<I, K, V>(texts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let docs = texts
            .into_iter()
            .map(|(id, text)| {
                let doc_id = id.into();
                Document {
                    path: format!("memory://{}.md", doc_id),
                    doc_id,
                    text: text.into(),
                }
            })
            .collect();
        Self::new(docs)
    }

    /// Serve `docs` for `dataset` instead of the fallback set.
    pub fn with_dataset(mut self, dataset: impl Into<String>, docs: Vec<Document>) -> Self {
        self.datasets.insert(dataset.into(), docs);
        self
    }
}

impl DocumentSource for StaticSource {
    fn load(&self, dataset: &str) -> Result<Vec<Document>, PipelineError> {
        let docs = self.datasets.get(dataset).unwrap_or(&self.fallback);
        if docs.is_empty() {
            return Err(no_docs(Path::new("memory://"), dataset));
        }
        Ok(docs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_directory_source_reads_sorted_markdown() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.md"), "bravo").unwrap();
        std::fs::write(temp.path().join("a.md"), "alpha").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let docs = DirectorySource::new(temp.path()).load("sample").unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(docs[0].text, "alpha");
    }

    #[test]
    fn test_directory_source_prefers_dataset_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("top.md"), "top").unwrap();
        std::fs::create_dir(temp.path().join("sample")).unwrap();
        std::fs::write(temp.path().join("sample").join("inner.md"), "inner").unwrap();

        let source = DirectorySource::new(temp.path());
        let docs = source.load("sample").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "inner");

        let docs = source.load("other").unwrap();
        assert_eq!(docs[0].doc_id, "top");
    }

    #[test]
    fn test_directory_source_empty() {
        let temp = TempDir::new().unwrap();
        let err = DirectorySource::new(temp.path()).load("sample").unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("No docs found in {} (dataset=sample)", temp.path().display())
        );

        let missing = temp.path().join("missing");
        assert!(DirectorySource::new(missing).load("sample").is_err());
    }

    #[test]
    fn test_static_source() {
        let source = StaticSource::from_texts([("a", "alpha")]).with_dataset("empty", vec![]);
        assert_eq!(source.load("anything").unwrap()[0].doc_id, "a");
        assert!(source.load("empty").is_err());
    }
}
