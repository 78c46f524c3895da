//! Turning ingest sources into upload items.

use std::path::Path;

use reelflow_core::UploadItem;

use crate::error::WorkerError;

/// List the regular files directly inside `dir` as upload items, sorted by
/// name. Hidden files and subdirectories are skipped.
pub async fn scan_dir(dir: &Path) -> Result<Vec<UploadItem>, WorkerError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(WorkerError::io(dir))?;
    let mut items = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(WorkerError::io(dir))? {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(WorkerError::io(&path))?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        items.push(UploadItem::file(name, metadata.len(), path));
    }

    items.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::info!(dir = %dir.display(), count = items.len(), "Ingest directory scanned");
    Ok(items)
}

/// Read remote source links from a text file, one URL per line. Blank lines
/// and lines starting with `#` are ignored.
pub async fn read_sources(path: &Path) -> Result<Vec<UploadItem>, WorkerError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(WorkerError::io(path))?;

    let items: Vec<UploadItem> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|url| UploadItem::remote(source_name(url), url))
        .collect();

    tracing::info!(file = %path.display(), count = items.len(), "Source list read");
    Ok(items)
}

/// Last path segment of a URL, without query or fragment.
pub fn source_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(without_query)
        .to_string()
}
