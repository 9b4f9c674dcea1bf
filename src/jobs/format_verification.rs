//! Format verification of primary documents.
//!
//! One task per submission process, one item per primary document. The item
//! payload is the document's storage filename. Each item uploads the file to
//! the format analysis service and stores the returned report on the document
//! record. Items are independent reads, so failed ones may be retried in place.

use crate::config::FormatVerificationConfig;
use crate::engine::{HandlerFactory, ItemContext, ItemHandler, Options, Registry};
use crate::error::{Error, Result};
use crate::types::{Payload, Task, TaskState};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Job kind name
pub const JOB_KIND: &str = "format-verification";

/// Several submissions verify side by side, three documents at a time each
pub const OPTIONS: Options = Options {
    concurrent_tasks: 10,
    concurrent_items: 3,
    safe_repeat: true,
};

/// Analysis result for one document, stored as returned by the service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationReport(pub serde_json::Value);

/// Access to stored primary documents
#[async_trait]
pub trait PrimaryDocumentStore: Send + Sync {
    /// Read a stored file
    async fn read(&self, filename: &str) -> Result<Vec<u8>>;

    /// Attach an analysis report to the document record
    async fn store_report(
        &self,
        process_id: &str,
        filename: &str,
        report: &VerificationReport,
    ) -> Result<()>;
}

/// Format analysis service
#[async_trait]
pub trait FormatAnalyzer: Send + Sync {
    /// Analyze one file
    async fn analyze(&self, filename: &str, content: Vec<u8>) -> Result<VerificationReport>;
}

/// Process workflow callbacks
#[async_trait]
pub trait VerificationHooks: Send + Sync {
    /// Every document of the process was verified
    async fn verification_done(&self, process_id: &str) -> Result<()>;
}

/// Analyzer backed by an HTTP service taking multipart uploads
pub struct HttpFormatAnalyzer {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpFormatAnalyzer {
    /// Create an analyzer for the configured endpoint
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &FormatVerificationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("records-tasks format verification")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl FormatAnalyzer for HttpFormatAnalyzer {
    async fn analyze(&self, filename: &str, content: Vec<u8>) -> Result<VerificationReport> {
        let form = Form::new().part("file", Part::bytes(content).file_name(filename.to_string()));

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Handler(format!("format analysis of {} timed out", filename))
                } else {
                    Error::Network(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::Handler(format!(
                "format analysis of {} failed: HTTP {}",
                filename,
                response.status()
            )));
        }

        Ok(response.json::<VerificationReport>().await?)
    }
}

/// Builds one verification handler per task run
pub struct FormatVerificationFactory {
    documents: Arc<dyn PrimaryDocumentStore>,
    analyzer: Arc<dyn FormatAnalyzer>,
    hooks: Arc<dyn VerificationHooks>,
}

impl FormatVerificationFactory {
    /// Create a factory over the document store and analyzer
    pub fn new(
        documents: Arc<dyn PrimaryDocumentStore>,
        analyzer: Arc<dyn FormatAnalyzer>,
        hooks: Arc<dyn VerificationHooks>,
    ) -> Self {
        Self {
            documents,
            analyzer,
            hooks,
        }
    }
}

#[async_trait]
impl HandlerFactory for FormatVerificationFactory {
    async fn build(&self, task: &Task) -> Result<Arc<dyn ItemHandler>> {
        Ok(Arc::new(VerificationHandler {
            process_id: task.process_id.clone(),
            documents: Arc::clone(&self.documents),
            analyzer: Arc::clone(&self.analyzer),
            hooks: Arc::clone(&self.hooks),
        }))
    }
}

struct VerificationHandler {
    process_id: String,
    documents: Arc<dyn PrimaryDocumentStore>,
    analyzer: Arc<dyn FormatAnalyzer>,
    hooks: Arc<dyn VerificationHooks>,
}

#[async_trait]
impl ItemHandler for VerificationHandler {
    async fn handle_item(&self, ctx: &ItemContext, data: &Payload) -> Result<()> {
        let filename: String = data.decode()?;

        let content = self.documents.read(&filename).await?;
        if ctx.is_cancelled() {
            return Err(Error::Handler("cancelled".to_string()));
        }

        tracing::debug!(
            task_id = ctx.task_id.0,
            filename = %filename,
            bytes = content.len(),
            "Uploading document for format analysis"
        );
        let report = self.analyzer.analyze(&filename, content).await?;

        self.documents
            .store_report(&self.process_id, &filename, &report)
            .await
    }

    async fn after_done(&self, task: &Task) -> Result<()> {
        if task.state != TaskState::Done {
            return Ok(());
        }
        tracing::info!(process_id = %task.process_id, "Format verification complete");
        self.hooks.verification_done(&task.process_id).await
    }
}

/// Register the format verification job kind
pub fn register(
    registry: &mut Registry,
    documents: Arc<dyn PrimaryDocumentStore>,
    analyzer: Arc<dyn FormatAnalyzer>,
    hooks: Arc<dyn VerificationHooks>,
) -> Result<()> {
    registry.register(
        JOB_KIND,
        Arc::new(FormatVerificationFactory::new(documents, analyzer, hooks)),
        OPTIONS,
    )
}
