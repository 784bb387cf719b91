//! File inventory indexer.
//!
//! Records one document per source file of a working copy in the `files`
//! collection, keyed by `{uri}:{path}`.

use async_trait::async_trait;
use codefleet_core::indexer::{IndexReport, Indexer};
use codefleet_core::store::{DocumentFilter, DocumentStore};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::GitError;

pub const FILES_COLLECTION: &str = "files";

/// Indexes the file list of each working copy.
pub struct FileInventoryIndexer {
    data_dir: PathBuf,
    store: Arc<dyn DocumentStore>,
}

#[derive(Debug)]
struct FileEntry {
    path: String,
    size: u64,
}

impl FileInventoryIndexer {
    pub fn new(data_dir: impl Into<PathBuf>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            data_dir: data_dir.into(),
            store,
        }
    }

    #[async_recursion::async_recursion]
    async fn scan_directory(
        base_path: &Path,
        current_path: &Path,
        files: &mut Vec<FileEntry>,
        skipped: &mut Vec<String>,
    ) -> Result<(), GitError> {
        let mut entries = tokio::fs::read_dir(current_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name_str = file_name.to_string_lossy();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                if file_name_str.starts_with('.')
                    || matches!(
                        file_name_str.as_ref(),
                        "node_modules" | "target" | "vendor" | "__pycache__"
                    )
                {
                    continue;
                }
                Self::scan_directory(base_path, &path, files, skipped).await?;
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(base_path)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                match entry.metadata().await {
                    Ok(meta) => files.push(FileEntry {
                        path: relative,
                        size: meta.len(),
                    }),
                    Err(e) => skipped.push(format!("{relative}: {e}")),
                }
            }
        }

        Ok(())
    }
}

/// Language guess from the file extension.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?;
    let lang = match ext.to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "rb" => "ruby",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "sh" => "shell",
        _ => return None,
    };
    Some(lang)
}

#[async_trait]
impl Indexer for FileInventoryIndexer {
    fn name(&self) -> &str {
        "file-inventory"
    }

    async fn run(&self, uri: &str, revision: &str) -> codefleet_core::Result<IndexReport> {
        let root = self.data_dir.join(uri);
        if !root.exists() {
            return Err(GitError::MissingWorkingCopy(uri.to_string()).into());
        }

        let mut files = Vec::new();
        let mut skipped = Vec::new();
        Self::scan_directory(&root, &root, &mut files, &mut skipped).await?;
        debug!(uri, files = files.len(), "Scanned working copy");

        // Stale entries from an older revision are replaced wholesale.
        self.clear(uri).await?;
        for file in &files {
            let doc = json!({
                "repository_uri": uri,
                "revision": revision,
                "path": file.path,
                "size": file.size,
                "language": detect_language(&file.path),
            });
            self.store
                .put(FILES_COLLECTION, &format!("{uri}:{}", file.path), doc)
                .await?;
        }

        info!(uri, revision, files = files.len(), "Indexed file inventory");
        Ok(IndexReport {
            success: true,
            partial_failures: skipped,
        })
    }

    async fn clear(&self, uri: &str) -> codefleet_core::Result<()> {
        let removed = self
            .store
            .delete_matching(
                FILES_COLLECTION,
                &DocumentFilter::all().eq("repository_uri", uri),
            )
            .await?;
        debug!(uri, removed, "Cleared file inventory");
        Ok(())
    }
}
