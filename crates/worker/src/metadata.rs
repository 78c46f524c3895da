//! Metadata records derived from completed uploads.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reelflow_core::types::Timestamp;
use reelflow_core::{ContentRef, HookError, JobId, MediaKind};
use reelflow_pipeline::{CompletedUpload, CompletionHook};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// One library entry describing an ingested asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub job_id: JobId,
    pub name: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    /// Local path, remote URL, or `inline`.
    pub source: String,
    pub remote_ref: Option<String>,
    pub preview_uri: Option<String>,
    pub attempt: u32,
    pub completed_at: Timestamp,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl MetadataRecord {
    pub fn derive(upload: &CompletedUpload) -> Self {
        let item = &upload.item;
        let source = match &item.content {
            ContentRef::File(path) => path.display().to_string(),
            ContentRef::Remote(url) => url.clone(),
            ContentRef::Inline(_) => "inline".to_string(),
        };

        Self {
            job_id: upload.job_id,
            name: item.name.clone(),
            media_kind: item.media_kind(),
            size_bytes: item.size_bytes,
            mime_type: item.mime_type.clone(),
            source,
            remote_ref: upload.receipt.remote_ref.clone(),
            preview_uri: upload.preview_uri.clone(),
            attempt: upload.attempt,
            completed_at: upload.completed_at,
            details: upload.receipt.details.clone(),
        }
    }
}

/// Completion hook that derives a [`MetadataRecord`] per upload, keeps it in
/// memory and optionally appends it to a JSONL file.
#[derive(Debug, Default)]
pub struct MetadataRecordHook {
    out: Option<PathBuf>,
    records: Mutex<Vec<MetadataRecord>>,
    /// Serializes appends so lines never interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl MetadataRecordHook {
    pub fn new(out: Option<PathBuf>) -> Self {
        Self {
            out,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<MetadataRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn append(&self, record: &MetadataRecord) -> Result<(), HookError> {
        let Some(path) = &self.out else {
            return Ok(());
        };

        let mut line = serde_json::to_vec(record)
            .map_err(|e| HookError::new(format!("Failed to encode metadata record: {e}")))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| HookError::new(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(&line)
            .await
            .map_err(|e| HookError::new(format!("Failed to write {}: {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| HookError::new(format!("Failed to flush {}: {e}", path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl CompletionHook for MetadataRecordHook {
    async fn on_completed(&self, upload: &CompletedUpload) -> Result<(), HookError> {
        let record = MetadataRecord::derive(upload);
        self.append(&record).await?;

        tracing::info!(
            job_id = %record.job_id,
            name = %record.name,
            media_kind = record.media_kind.as_str(),
            "Metadata record written",
        );
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reelflow_core::UploadItem;
    use reelflow_pipeline::TransferReceipt;

    use super::*;

    fn upload(item: UploadItem) -> CompletedUpload {
        CompletedUpload {
            job_id: reelflow_core::types::new_job_id(),
            attempt: 1,
            item,
            preview_uri: Some("preview://abc/intro.mp4".into()),
            receipt: TransferReceipt::with_remote_ref("asset-42"),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn record_describes_local_file() {
        let item = UploadItem::file("intro.mp4", 1024, "/srv/ingest/intro.mp4")
            .with_mime_type("video/mp4");
        let record = MetadataRecord::derive(&upload(item));

        assert_eq!(record.media_kind, MediaKind::Video);
        assert_eq!(record.source, "/srv/ingest/intro.mp4");
        assert_eq!(record.remote_ref.as_deref(), Some("asset-42"));
        assert_eq!(record.mime_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn record_keeps_remote_url_as_source() {
        let item = UploadItem::remote("b.png", "https://cdn.example.com/b.png");
        let record = MetadataRecord::derive(&upload(item));
        assert_eq!(record.source, "https://cdn.example.com/b.png");
        assert_eq!(record.media_kind, MediaKind::Image);
    }

    #[tokio::test]
    async fn hook_without_output_keeps_records_in_memory() {
        let hook = MetadataRecordHook::new(None);
        hook.on_completed(&upload(UploadItem::inline("logo.png", vec![1u8; 4])))
            .await
            .unwrap();

        let records = hook.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "inline");
    }
}
