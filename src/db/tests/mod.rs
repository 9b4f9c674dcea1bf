use crate::db::Database;
use crate::types::{NewTask, Payload};
use serde_json::json;
use tempfile::NamedTempFile;

mod items;

/// Fresh database on a throwaway file; keep the file alive for the test's duration
async fn test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Task of kind "test" with one item per label
fn new_task(process_id: &str, labels: &[&str]) -> NewTask {
    labels.iter().fold(
        NewTask::new(process_id, "test")
            .with_user("alice")
            .with_data(Payload::from(json!({"collection": "c-1"}))),
        |task, label| task.with_item(*label, Payload::from(json!({"label": label}))),
    )
}
