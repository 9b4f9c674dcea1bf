//! Runtime state tracking: clean/unclean shutdown detection.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// True when the previous session never reached `set_clean_shutdown()`:
    /// a crash, a kill, or the very first start against an old database.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(CLEAN_SHUTDOWN_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check shutdown state: {}",
                        e
                    )))
                })?;

        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark the session as running
    ///
    /// Called by `TaskEngine::new()` after recovery has run.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_flag(CLEAN_SHUTDOWN_KEY, "false").await
    }

    /// Mark the session as cleanly stopped
    ///
    /// Called by `TaskEngine::shutdown()` once in-flight runs have drained.
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_flag(CLEAN_SHUTDOWN_KEY, "true").await
    }

    async fn set_runtime_flag(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update runtime state {}: {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
