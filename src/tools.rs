//! Filesystem inspection tools for the project server.

use crate::ProjectServer;
use crate::resolve::resolve;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the filesystem tools.
///
/// Each variant wraps the underlying I/O failure; the rendered message is
/// what reaches the client in a JSON-RPC error response.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The directory could not be enumerated.
    #[error("Failed to list directory: {0}")]
    ListDirectory(#[source] io::Error),
    /// The file could not be read as UTF-8 text.
    #[error("Failed to read file: {0}")]
    ReadFile(#[source] io::Error),
    /// A directory along the search walk could not be read.
    #[error("Failed to search files: {0}")]
    SearchFiles(#[source] io::Error),
}

/// Parameters for listing a directory.
#[derive(Debug, Default, Deserialize)]
pub struct ListDirectoryParams {
    /// Directory to list, relative to the project root.
    #[serde(default)]
    pub path: String,
}

/// Parameters for reading a file.
#[derive(Debug, Default, Deserialize)]
pub struct ReadFileParams {
    /// File to read, relative to the project root.
    #[serde(default)]
    pub file_path: String,
}

/// Parameters for searching files.
#[derive(Debug, Default, Deserialize)]
pub struct SearchFilesParams {
    /// Case-insensitive substring the file name must contain.
    #[serde(default)]
    pub pattern: String,
    /// Keep only names ending in `"." + file_type`.
    #[serde(default)]
    pub file_type: Option<String>,
}

/// One immediate child of a listed directory.
#[derive(Debug, Serialize)]
pub struct DirectoryEntry {
    /// Base name of the entry.
    pub name: String,
    /// `"directory"` for directories, `"file"` for everything else.
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    /// Path relative to the project root: the queried directory joined with
    /// the entry name.
    pub path: String,
}

/// Full text content of a read file.
#[derive(Debug, Serialize)]
pub struct FileContent {
    /// Raw UTF-8 text.
    pub content: String,
    /// The relative path exactly as the caller gave it.
    pub path: String,
}

/// A file matched by a search.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    /// Base name of the file.
    pub name: String,
    /// Path relative to the project root.
    pub path: String,
}

impl ProjectServer {
    /// List the immediate children of a directory under the project root.
    ///
    /// Entries come back in filesystem enumeration order; no sort is
    /// applied.
    pub async fn list_directory(
        &self,
        params: ListDirectoryParams,
    ) -> Result<Vec<DirectoryEntry>, ToolError> {
        let dir = resolve(&self.root, &params.path);
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(ToolError::ListDirectory)?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(ToolError::ListDirectory)?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let ft = entry
                .file_type()
                .await
                .map_err(ToolError::ListDirectory)?;
            let entry_type = if ft.is_dir() { "directory" } else { "file" };
            let path = Path::new(&params.path)
                .join(&name)
                .to_string_lossy()
                .into_owned();
            entries.push(DirectoryEntry {
                name,
                entry_type,
                path,
            });
        }
        Ok(entries)
    }

    /// Read the complete contents of a file as UTF-8 text.
    ///
    /// The returned `path` echoes the caller's relative path, not the
    /// resolved absolute one. Invalid UTF-8 surfaces as the underlying
    /// decode error.
    pub async fn read_file(&self, params: ReadFileParams) -> Result<FileContent, ToolError> {
        let file = resolve(&self.root, &params.file_path);
        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(ToolError::ReadFile)?;
        Ok(FileContent {
            content,
            path: params.file_path,
        })
    }

    /// Search the whole tree under the project root for matching files.
    ///
    /// Depth-first, children in enumeration order. The filters apply to
    /// regular files only; directories are always recursed into, so an
    /// irrelevant subtree is still fully walked. Any unreadable directory
    /// aborts the search.
    pub async fn search_files(
        &self,
        params: SearchFilesParams,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let pattern = params.pattern.to_lowercase();
        let mut results = Vec::new();
        search_dir(
            &self.root,
            String::new(),
            &pattern,
            params.file_type.as_deref(),
            &mut results,
        )
        .await
        .map_err(ToolError::SearchFiles)?;
        Ok(results)
    }
}

/// Recursively walk one directory level, collecting matching files.
fn search_dir<'a>(
    root: &'a Path,
    dir: String,
    pattern: &'a str,
    file_type: Option<&'a str>,
    results: &'a mut Vec<SearchResult>,
) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut read_dir = tokio::fs::read_dir(root.join(&dir)).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let item_path = Path::new(&dir)
                .join(&name)
                .to_string_lossy()
                .into_owned();
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                search_dir(root, item_path, pattern, file_type, results).await?;
            } else if ft.is_file() {
                if !pattern.is_empty() && !name.to_lowercase().contains(pattern) {
                    continue;
                }
                if let Some(ext) = file_type {
                    if !name.ends_with(&format!(".{ext}")) {
                        continue;
                    }
                }
                results.push(SearchResult {
                    name,
                    path: item_path,
                });
            }
        }
        Ok(())
    })
}
