use super::{new_task, test_db};
use crate::types::{ItemState, TaskState};

#[tokio::test]
async fn test_pending_items_excludes_started_items() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a", "b", "c"])).await.unwrap();
    let items = db.get_task_items(id).await.unwrap();

    assert!(db.mark_item_running(items[1].id).await.unwrap());

    let pending: Vec<_> = db
        .pending_items(id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.label)
        .collect();
    assert_eq!(pending, vec!["a", "c"]);
}

#[tokio::test]
async fn test_mark_item_running_requires_pending() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a"])).await.unwrap();
    let item = db.get_task_items(id).await.unwrap().remove(0);

    assert!(db.mark_item_running(item.id).await.unwrap());
    assert!(!db.mark_item_running(item.id).await.unwrap());
}

#[tokio::test]
async fn test_finish_item_increments_progress() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a", "b"])).await.unwrap();
    let items = db.get_task_items(id).await.unwrap();

    db.mark_item_running(items[0].id).await.unwrap();
    let progress = db
        .finish_item(id, items[0].id, ItemState::Done, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((progress.done, progress.total), (1, 2));

    db.mark_item_running(items[1].id).await.unwrap();
    let progress = db
        .finish_item(id, items[1].id, ItemState::Failed, Some("unreadable"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((progress.done, progress.total), (2, 2));

    let items = db.get_task_items(id).await.unwrap();
    assert_eq!(items[0].state, ItemState::Done);
    assert!(items[0].error.is_none());
    assert_eq!(items[1].state, ItemState::Failed);
    assert_eq!(items[1].error.as_deref(), Some("unreadable"));
}

#[tokio::test]
async fn test_finish_item_not_running_changes_nothing() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a"])).await.unwrap();
    let item = db.get_task_items(id).await.unwrap().remove(0);

    // Never marked running
    let progress = db
        .finish_item(id, item.id, ItemState::Done, None)
        .await
        .unwrap();
    assert!(progress.is_none());
    assert_eq!(db.get_task(id).await.unwrap().unwrap().progress.done, 0);
}

#[tokio::test]
async fn test_finish_item_after_task_removed_is_none() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a"])).await.unwrap();
    let item = db.get_task_items(id).await.unwrap().remove(0);
    db.mark_item_running(item.id).await.unwrap();

    db.delete_task(id).await.unwrap();

    assert!(db
        .finish_item(id, item.id, ItemState::Done, None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_requeue_failed_task_resets_items_and_recounts_progress() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a", "b", "c"])).await.unwrap();
    db.transition_task_state(id, TaskState::Pending, TaskState::Running)
        .await
        .unwrap();
    let items = db.get_task_items(id).await.unwrap();

    for (item, state) in items.iter().zip([ItemState::Done, ItemState::Failed, ItemState::Failed]) {
        db.mark_item_running(item.id).await.unwrap();
        db.finish_item(id, item.id, state, (state == ItemState::Failed).then_some("bad"))
            .await
            .unwrap();
    }
    db.set_task_outcome(id, TaskState::Failed, Some("b: bad\nc: bad"))
        .await
        .unwrap();
    assert_eq!(db.get_task(id).await.unwrap().unwrap().progress.done, 3);

    let reset = db.requeue_failed_task(id).await.unwrap();
    assert_eq!(reset, Some(2));

    let detail = db.get_task_detail(id).await.unwrap().unwrap();
    assert_eq!(detail.task.state, TaskState::Pending);
    assert!(detail.task.error.is_none());
    assert_eq!(detail.task.progress.done, 1);
    assert_eq!(detail.task.progress.total, 3);
    assert_eq!(detail.items[0].state, ItemState::Done);
    assert!(detail.items[1..]
        .iter()
        .all(|i| i.state == ItemState::Pending && i.error.is_none()));
}

#[tokio::test]
async fn test_requeue_leaves_task_untouched_when_not_failed() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a"])).await.unwrap();

    assert_eq!(db.requeue_failed_task(id).await.unwrap(), None);
    assert_eq!(db.get_task(id).await.unwrap().unwrap().state, TaskState::Pending);
}

#[tokio::test]
async fn test_requeue_rolls_back_task_state_when_item_reset_fails() {
    let (db, _file) = test_db().await;
    let id = db.insert_task(&new_task("p-1", &["a"])).await.unwrap();
    db.transition_task_state(id, TaskState::Pending, TaskState::Running)
        .await
        .unwrap();
    let item = &db.get_task_items(id).await.unwrap()[0];
    db.mark_item_running(item.id).await.unwrap();
    db.finish_item(id, item.id, ItemState::Failed, Some("bad"))
        .await
        .unwrap();
    db.set_task_outcome(id, TaskState::Failed, Some("a: bad"))
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_item_reset BEFORE UPDATE OF state ON task_items \
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();

    assert!(db.requeue_failed_task(id).await.is_err());

    let detail = db.get_task_detail(id).await.unwrap().unwrap();
    assert_eq!(detail.task.state, TaskState::Failed);
    assert_eq!(detail.task.error.as_deref(), Some("a: bad"));
    assert_eq!(detail.items[0].state, ItemState::Failed);
}
