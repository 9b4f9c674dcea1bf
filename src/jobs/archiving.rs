//! Archiving of a submission's root records.
//!
//! One task per submission process. The task payload names the archive
//! collection; each item is one root record (a file, a process, or the bucket
//! of documents not assigned to either). A run opens one session on the
//! archive target, and each item builds a package for its record, imports it,
//! and stores the returned package ID. Imports are not idempotent, so failed
//! tasks are never retried in place and only one archiving task runs at a time.

use crate::engine::{HandlerFactory, ItemContext, ItemHandler, Options, Registry};
use crate::error::{Error, Result};
use crate::types::{Payload, Task, TaskState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Job kind name
pub const JOB_KIND: &str = "archiving";

/// One task and one record at a time; imports are never repeated
pub const OPTIONS: Options = Options {
    concurrent_tasks: 1,
    concurrent_items: 1,
    safe_repeat: false,
};

/// Task payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivingTaskData {
    /// Target collection in the archive
    pub collection_id: String,
}

/// Kind of root record an item archives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootRecordType {
    /// A file with its processes and documents
    File,
    /// A process that belongs to no file
    Process,
    /// Documents that belong to no file or process of the submission
    UnassignedDocuments,
}

/// Item payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveItemData {
    /// Which kind of root record `record_id` names
    pub record_type: RootRecordType,
    /// Record ID; the submission process ID for the unassigned bucket
    pub record_id: String,
}

/// Package ready for import
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivePackage {
    /// Package name shown in the archive
    pub name: String,
    /// Location of the assembled package on disk
    pub path: PathBuf,
}

/// Archive system
#[async_trait]
pub trait ArchiveTarget: Send + Sync {
    /// Open an import session for a collection
    async fn open_session(&self, collection_id: &str) -> Result<Arc<dyn ArchiveSession>>;
}

/// Open import session
#[async_trait]
pub trait ArchiveSession: Send + Sync {
    /// Import one package, returning the archive's package ID
    async fn import(&self, package: &ArchivePackage) -> Result<String>;

    /// Finish the session once the run ends
    async fn close(&self) -> Result<()>;
}

/// Assembles archive packages from stored records
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Build the package for one root record of `process_id`
    async fn build_package(
        &self,
        process_id: &str,
        record: &ArchiveItemData,
    ) -> Result<ArchivePackage>;
}

/// Record metadata and downstream messages
#[async_trait]
pub trait ArchiveRecords: Send + Sync {
    /// Remember which package holds a record
    async fn set_package_id(
        &self,
        process_id: &str,
        record: &ArchiveItemData,
        package_id: &str,
    ) -> Result<()>;

    /// Send the archiving confirmation to the submitting agency
    async fn send_confirmation(&self, process_id: &str) -> Result<()>;

    /// Send the archiving report to the user who started the task
    async fn send_report(&self, process_id: &str, user_id: Option<&str>) -> Result<()>;
}

/// Builds one archiving handler per task run
pub struct ArchivingFactory {
    target: Arc<dyn ArchiveTarget>,
    packages: Arc<dyn PackageBuilder>,
    records: Arc<dyn ArchiveRecords>,
}

impl ArchivingFactory {
    /// Create a factory over the archive and the record store
    pub fn new(
        target: Arc<dyn ArchiveTarget>,
        packages: Arc<dyn PackageBuilder>,
        records: Arc<dyn ArchiveRecords>,
    ) -> Self {
        Self {
            target,
            packages,
            records,
        }
    }
}

#[async_trait]
impl HandlerFactory for ArchivingFactory {
    async fn build(&self, task: &Task) -> Result<Arc<dyn ItemHandler>> {
        let data: ArchivingTaskData = task.data.decode()?;
        let session = self.target.open_session(&data.collection_id).await?;

        tracing::info!(
            task_id = task.id.0,
            collection_id = %data.collection_id,
            "Archive session opened"
        );

        Ok(Arc::new(ArchivingHandler {
            process_id: task.process_id.clone(),
            session,
            packages: Arc::clone(&self.packages),
            records: Arc::clone(&self.records),
        }))
    }
}

struct ArchivingHandler {
    process_id: String,
    session: Arc<dyn ArchiveSession>,
    packages: Arc<dyn PackageBuilder>,
    records: Arc<dyn ArchiveRecords>,
}

#[async_trait]
impl ItemHandler for ArchivingHandler {
    async fn handle_item(&self, ctx: &ItemContext, data: &Payload) -> Result<()> {
        let record: ArchiveItemData = data.decode()?;

        let package = self
            .packages
            .build_package(&self.process_id, &record)
            .await?;
        if ctx.is_cancelled() {
            return Err(Error::Handler("cancelled before import".to_string()));
        }

        let package_id = self.session.import(&package).await?;
        tracing::debug!(
            task_id = ctx.task_id.0,
            record_id = %record.record_id,
            package_id = %package_id,
            "Package imported"
        );

        self.records
            .set_package_id(&self.process_id, &record, &package_id)
            .await
    }

    async fn finish(&self) {
        if let Err(e) = self.session.close().await {
            tracing::warn!(
                process_id = %self.process_id,
                error = %e,
                "Failed to close archive session"
            );
        }
    }

    async fn after_done(&self, task: &Task) -> Result<()> {
        if task.state != TaskState::Done {
            return Ok(());
        }

        self.records.send_confirmation(&task.process_id).await?;
        self.records
            .send_report(&task.process_id, task.user_id.as_deref())
            .await
    }
}

/// Register the archiving job kind
pub fn register(
    registry: &mut Registry,
    target: Arc<dyn ArchiveTarget>,
    packages: Arc<dyn PackageBuilder>,
    records: Arc<dyn ArchiveRecords>,
) -> Result<()> {
    registry.register(
        JOB_KIND,
        Arc::new(ArchivingFactory::new(target, packages, records)),
        OPTIONS,
    )
}
