//! Handler registry: job kind → factory + concurrency options.
//!
//! Each job kind registers itself once at startup. The engine takes the
//! populated registry by value and shares it immutably from then on.

use crate::error::{Error, Result};
use crate::types::{Payload, Task, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-kind execution policy, fixed at registration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Tasks of this kind allowed to run at once, process-wide
    pub concurrent_tasks: usize,
    /// Items of one task processed at once
    pub concurrent_items: usize,
    /// Whether failed items may be re-run in place by `retry`
    pub safe_repeat: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            concurrent_tasks: 1,
            concurrent_items: 1,
            safe_repeat: false,
        }
    }
}

/// Context handed to every `handle_item` call
#[derive(Clone, Debug)]
pub struct ItemContext {
    /// Task the item belongs to
    pub task_id: TaskId,
    /// Item row ID
    pub item_id: i64,
    /// Item label
    pub label: String,
    /// Tripped when the task is cancelled; handlers may stop early
    pub cancel: CancellationToken,
}

impl ItemContext {
    /// True once the task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Builds a handler bound to one run of one task
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    /// Set up run-scoped resources; an error fails the whole task
    async fn build(&self, task: &Task) -> Result<Arc<dyn ItemHandler>>;
}

/// Processes the items of one task run
#[async_trait]
pub trait ItemHandler: Send + Sync {
    /// Process exactly one item; an error fails only that item
    async fn handle_item(&self, ctx: &ItemContext, data: &Payload) -> Result<()>;

    /// Release run-scoped resources
    ///
    /// Called once per run after every dispatched item has been attempted,
    /// including runs that end paused or cancelled.
    async fn finish(&self) {}

    /// Downstream effects once the task reached `done` or `failed`
    ///
    /// Receives the final task snapshot; implementations check the state
    /// themselves. Errors are logged and never change the stored state.
    async fn after_done(&self, _task: &Task) -> Result<()> {
        Ok(())
    }
}

/// A registered job kind
#[derive(Clone)]
pub struct Registration {
    /// Handler factory
    pub factory: Arc<dyn HandlerFactory>,
    /// Execution policy
    pub options: Options,
}

/// Job kind table
#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Registration>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job kind
    ///
    /// Fails if the kind is already registered or if either concurrency
    /// limit is zero.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: Arc<dyn HandlerFactory>,
        options: Options,
    ) -> Result<()> {
        let kind = kind.into();

        if self.entries.contains_key(&kind) {
            return Err(Error::DuplicateJobKind(kind));
        }
        if options.concurrent_tasks == 0 {
            return Err(Error::Config {
                message: format!("job kind {} must allow at least one concurrent task", kind),
                key: Some("concurrent_tasks".to_string()),
            });
        }
        if options.concurrent_items == 0 {
            return Err(Error::Config {
                message: format!("job kind {} must allow at least one concurrent item", kind),
                key: Some("concurrent_items".to_string()),
            });
        }

        tracing::debug!(
            kind = %kind,
            concurrent_tasks = options.concurrent_tasks,
            concurrent_items = options.concurrent_items,
            safe_repeat = options.safe_repeat,
            "Registered job kind"
        );
        self.entries.insert(kind, Registration { factory, options });
        Ok(())
    }

    /// Look up a job kind
    pub fn get(&self, kind: &str) -> Option<&Registration> {
        self.entries.get(kind)
    }

    /// Look up a job kind that must exist
    ///
    /// # Panics
    ///
    /// Panics if the kind was never registered. Starting a task of an unknown
    /// kind is a wiring mistake in the caller, not a runtime condition.
    #[track_caller]
    pub fn registration(&self, kind: &str) -> &Registration {
        match self.entries.get(kind) {
            Some(registration) => registration,
            None => panic!("job kind {kind:?} is not registered"),
        }
    }

    /// Registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct NoopFactory;

    struct NoopHandler;

    #[async_trait]
    impl HandlerFactory for NoopFactory {
        async fn build(&self, _task: &Task) -> Result<Arc<dyn ItemHandler>> {
            Ok(Arc::new(NoopHandler))
        }
    }

    #[async_trait]
    impl ItemHandler for NoopHandler {
        async fn handle_item(&self, _ctx: &ItemContext, _data: &Payload) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registered_kind_is_found_with_its_options() {
        let mut registry = Registry::new();
        let options = Options {
            concurrent_tasks: 2,
            concurrent_items: 3,
            safe_repeat: true,
        };
        registry
            .register("format-verification", Arc::new(NoopFactory), options)
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("format-verification").unwrap().options,
            options
        );
        assert!(registry.get("archiving").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register("archiving", Arc::new(NoopFactory), Options::default())
            .unwrap();

        let err = registry
            .register("archiving", Arc::new(NoopFactory), Options::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJobKind(kind) if kind == "archiving"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .register(
                "archiving",
                Arc::new(NoopFactory),
                Options {
                    concurrent_items: 0,
                    ..Options::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(key), .. } if key == "concurrent_items"));
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unknown_kind_lookup_panics() {
        let registry = Registry::new();
        let _ = registry.registration("archiving");
    }

    #[test]
    fn default_options_are_serial_and_not_repeatable() {
        let options = Options::default();
        assert_eq!(options.concurrent_tasks, 1);
        assert_eq!(options.concurrent_items, 1);
        assert!(!options.safe_repeat);
    }
}
