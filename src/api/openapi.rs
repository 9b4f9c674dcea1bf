//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the records-tasks REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the records-tasks REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "records-tasks REST API",
        version = "0.1.0",
        description = "Progress views and control actions for persisted record processing tasks",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Tasks
        crate::api::routes::list_tasks,
        crate::api::routes::get_task,
        crate::api::routes::task_action,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::TaskId,
        crate::types::TaskState,
        crate::types::ItemState,
        crate::types::Progress,
        crate::types::Payload,
        crate::types::Task,
        crate::types::TaskItem,
        crate::types::TaskDetail,
        crate::types::TaskAction,
        crate::types::TaskCounts,
        crate::types::Event,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Tasks - Progress of itemized jobs and pause/resume/retry/cancel"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
