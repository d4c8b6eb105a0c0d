use crate::extractor::{DocxExtractor, PdfExtractor, TextExtractor};
use crate::{Document, IngestError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// Maps lower-cased file extensions to the extractor that reads them.
#[derive(Clone)]
pub struct DocumentLoader {
    extractors: BTreeMap<String, Arc<dyn TextExtractor>>,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::empty()
            .with_extractor("pdf", PdfExtractor::default())
            .with_extractor("docx", DocxExtractor)
    }
}

impl DocumentLoader {
    pub fn empty() -> Self {
        Self {
            extractors: BTreeMap::new(),
        }
    }

    pub fn with_extractor(mut self, extension: &str, extractor: impl TextExtractor + 'static) -> Self {
        self.extractors
            .insert(extension.to_ascii_lowercase(), Arc::new(extractor));
        self
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.extractor_for(path).is_some()
    }

    fn extractor_for(&self, path: &Path) -> Option<&Arc<dyn TextExtractor>> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extractors.get(&extension)
    }

    /// Extracts every supported path in order. Unsupported paths are skipped;
    /// the first extraction failure aborts the whole batch.
    pub fn load_documents<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<Document>, IngestError> {
        let mut documents = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let Some(extractor) = self.extractor_for(path) else {
                debug!(path = %path.display(), "skipping unsupported file");
                continue;
            };

            let extracted = extractor.extract(path)?;
            debug!(path = %path.display(), documents = extracted.len(), "extracted");
            documents.extend(extracted);
        }

        Ok(documents)
    }

    /// Recursively lists files under `folder` that this loader can read.
    pub fn discover(&self, folder: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for entry in WalkDir::new(folder)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if entry.file_type().is_file() && self.is_supported(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort_unstable();
        files
    }
}

pub fn load_documents<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Document>, IngestError> {
    DocumentLoader::default().load_documents(paths)
}
