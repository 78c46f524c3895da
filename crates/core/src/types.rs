/// Identifier assigned to a job when it enters the queue.
///
/// UUID v7 so that ids sort by creation time.
pub type JobId = uuid::Uuid;

/// Mint a fresh job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}

/// Timestamp type used throughout the queue.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
