use super::*;
use crate::engine::test_helpers::wait_for_state;

fn repeatable() -> Options {
    Options {
        concurrent_tasks: 1,
        concurrent_items: 1,
        safe_repeat: true,
    }
}

#[tokio::test]
async fn test_list_tasks_empty() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let response = test_router(&engine).oneshot(get("/tasks")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!([]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_tasks_filters_by_process_and_state() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let first = engine
        .run(scripted_task(TEST_KIND, &[("a", "ok", false)]))
        .await
        .unwrap();
    let other = engine
        .run(
            crate::types::NewTask::new("process-9", TEST_KIND)
                .with_item("b", test_helpers::item("fail", false)),
        )
        .await
        .unwrap();
    wait_for_state(&engine, first, TaskState::Done).await;
    wait_for_state(&engine, other, TaskState::Failed).await;

    let app = test_router(&engine);

    let response = app
        .clone()
        .oneshot(get("/tasks?process_id=process-9"))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["id"], other.0);
    assert_eq!(json[0]["state"], "failed");
    assert_eq!(json[0]["error"], "b: unsupported format");

    let response = app.clone().oneshot(get("/tasks?state=done")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["id"], first.0);
    assert_eq!(json[0]["progress"]["done"], 1);
    assert_eq!(json[0]["progress"]["total"], 1);
}

#[tokio::test]
async fn test_list_tasks_rejects_unknown_state() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let response = test_router(&engine)
        .oneshot(get("/tasks?state=sleeping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_task_includes_items() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let id = engine
        .run(scripted_task(TEST_KIND, &[("a", "ok", false), ("b", "ok", false)]))
        .await
        .unwrap();
    wait_for_state(&engine, id, TaskState::Done).await;

    let response = test_router(&engine)
        .oneshot(get(&format!("/tasks/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["id"], id.0);
    assert_eq!(json["kind"], TEST_KIND);
    assert_eq!(json["state"], "done");
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["label"], "a");
    assert_eq!(items[1]["state"], "done");
}

#[tokio::test]
async fn test_get_unknown_task_returns_404() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let response = test_router(&engine)
        .oneshot(get("/tasks/999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "task_not_found");
    assert_eq!(json["error"]["details"]["task_id"], 999);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_action_on_running_task() {
    let (engine, recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let id = engine
        .run(scripted_task(TEST_KIND, &[("a", "ok", true), ("b", "ok", false)]))
        .await
        .unwrap();
    recorder.wait_started(1).await;

    let app = test_router(&engine);
    let response = app
        .clone()
        .oneshot(post(&format!("/tasks/{}/actions/pause", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(post(&format!("/tasks/{}/actions/pause", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "already_in_state");

    recorder.release(1);
    wait_for_state(&engine, id, TaskState::Paused).await;

    let response = app
        .oneshot(post(&format!("/tasks/{}/actions/resume", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    wait_for_state(&engine, id, TaskState::Done).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_action_on_done_task_returns_409() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let id = engine
        .run(scripted_task(TEST_KIND, &[("a", "ok", false)]))
        .await
        .unwrap();
    wait_for_state(&engine, id, TaskState::Done).await;

    let response = test_router(&engine)
        .oneshot(post(&format!("/tasks/{}/actions/cancel", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "invalid_state");
    assert_eq!(json["error"]["details"]["current_state"], "done");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_of_unsafe_kind_returns_422() {
    let (engine, _recorder, _temp_dir) = create_test_engine(Options::default()).await;

    let id = engine
        .run(scripted_task(TEST_KIND, &[("a", "fail", false)]))
        .await
        .unwrap();
    wait_for_state(&engine, id, TaskState::Failed).await;

    let response = test_router(&engine)
        .oneshot(post(&format!("/tasks/{}/actions/retry", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "retry_not_safe");
    assert_eq!(json["error"]["details"]["kind"], TEST_KIND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_action_removes_task() {
    let (engine, recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let id = engine
        .run(scripted_task(TEST_KIND, &[("a", "ok", true)]))
        .await
        .unwrap();
    recorder.wait_started(1).await;

    let app = test_router(&engine);
    let response = app
        .clone()
        .oneshot(post(&format!("/tasks/{}/actions/cancel", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/tasks/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    recorder.release(1);
}

#[tokio::test]
async fn test_unknown_action_returns_400() {
    let (engine, _recorder, _temp_dir) = create_test_engine(repeatable()).await;

    let response = test_router(&engine)
        .oneshot(post("/tasks/1/actions/restart"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert!(json["error"]["message"].as_str().unwrap().contains("restart"));
}
