//! Storage contract tests, run against both the volatile and the persistent backend.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};

use taskqueue::{
    CallableFn, CallableRef, CallableRegistry, Criteria, Invocation, MemoryDocumentStore,
    PersistentStorage, Scheduler, Storage, StorageError, Task, TaskError, TaskId,
    VolatileStorage,
};

fn noop() -> CallableRef {
    CallableFn::arc("noop", |_inv: Invocation| async { Ok::<_, TaskError>(Value::Null) })
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
}

/// A scheduled waiting task: `None` is immediate, `Some(s)` is `base + s` seconds.
fn scheduled(offset: Option<i64>) -> Task {
    let scheduler = match offset {
        None => Scheduler::Immediate,
        Some(s) => Scheduler::at(base() + TimeDelta::seconds(s)),
    };
    let task = Task::builder(noop()).scheduler(scheduler).build();
    assert!(task.schedule());
    task
}

async fn backends() -> Vec<(&'static str, Arc<dyn Storage>)> {
    let (persistent, _report) = PersistentStorage::open(
        Arc::new(MemoryDocumentStore::new()),
        &CallableRegistry::new(),
    )
    .await
    .unwrap();
    vec![
        ("volatile", Arc::new(VolatileStorage::new()) as Arc<dyn Storage>),
        ("persistent", Arc::new(persistent)),
    ]
}

async fn drain(storage: &dyn Storage) -> Vec<TaskId> {
    let mut out = Vec::new();
    while let Some(task) = storage.dequeue_waiting().await.unwrap() {
        out.push(task.id());
    }
    out
}

mod ordering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn earliest_task_is_dequeued_first() {
        for (name, storage) in backends().await {
            let three = scheduled(Some(3));
            let two = scheduled(Some(2));
            let one = scheduled(Some(1));
            for task in [&three, &two, &one] {
                storage.enqueue_waiting(task.clone()).await.unwrap();
            }
            assert_eq!(storage.num_waiting().await, 3, "{name}");
            assert_eq!(storage.peek_waiting().await.map(|t| t.id()), Some(one.id()), "{name}");
            assert_eq!(
                drain(storage.as_ref()).await,
                vec![one.id(), two.id(), three.id()],
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn dequeue_ready_only_returns_due_tasks() {
        for (name, storage) in backends().await {
            let one = scheduled(Some(1));
            let two = scheduled(Some(2));
            let three = scheduled(Some(3));
            for task in [&three, &one, &two] {
                storage.enqueue_waiting(task.clone()).await.unwrap();
            }

            assert!(storage.dequeue_ready(base()).await.unwrap().is_none(), "{name}");
            let cutoff = base() + TimeDelta::milliseconds(2500);
            let first = storage.dequeue_ready(cutoff).await.unwrap().map(|t| t.id());
            let second = storage.dequeue_ready(cutoff).await.unwrap().map(|t| t.id());
            assert_eq!(first, Some(one.id()), "{name}");
            assert_eq!(second, Some(two.id()), "{name}");
            assert!(storage.dequeue_ready(cutoff).await.unwrap().is_none(), "{name}");
            assert_eq!(storage.num_waiting().await, 1, "{name}");
        }
    }

    #[tokio::test]
    async fn immediate_tasks_precede_timed_ones_in_fifo_order() {
        for (name, storage) in backends().await {
            let timed = scheduled(Some(-60));
            let first = scheduled(None);
            let second = scheduled(None);
            for task in [&timed, &first, &second] {
                storage.enqueue_waiting(task.clone()).await.unwrap();
            }
            assert_eq!(
                drain(storage.as_ref()).await,
                vec![first.id(), second.id(), timed.id()],
                "{name}"
            );
        }
    }
}

mod sets {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn tasks_move_between_sets() {
        for (name, storage) in backends().await {
            let task = scheduled(None);
            storage.enqueue_waiting(task.clone()).await.unwrap();
            let popped = storage.dequeue_waiting().await.unwrap().unwrap();
            assert!(popped.ptr_eq(&task), "{name}");

            storage.store_running(task.clone()).await.unwrap();
            assert_eq!(storage.running().await.len(), 1, "{name}");
            assert!(storage.remove_running(&task).await.unwrap(), "{name}");
            assert!(!storage.remove_running(&task).await.unwrap(), "{name}");

            storage.store_complete(task.clone()).await.unwrap();
            storage.store_complete(task.clone()).await.unwrap();
            assert_eq!(storage.complete().await.len(), 1, "{name}");
            assert!(!storage.remove_complete(&task).await.unwrap(), "{name}");
            assert_eq!(storage.all_tasks().await.len(), 1, "{name}");
        }
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        for (name, storage) in backends().await {
            let task = scheduled(Some(1));
            storage.enqueue_waiting(task.clone()).await.unwrap();
            let err = storage.enqueue_waiting(task.clone()).await.unwrap_err();
            assert!(matches!(err, StorageError::DuplicateTask { id } if id == task.id()), "{name}");
            assert_eq!(storage.num_waiting().await, 1, "{name}");
        }
    }

    #[tokio::test]
    async fn remove_waiting_reports_presence() {
        for (name, storage) in backends().await {
            let kept = scheduled(Some(1));
            let gone = scheduled(Some(2));
            storage.enqueue_waiting(kept.clone()).await.unwrap();
            storage.enqueue_waiting(gone.clone()).await.unwrap();

            assert!(storage.remove_waiting(&gone).await.unwrap(), "{name}");
            assert!(!storage.remove_waiting(&gone).await.unwrap(), "{name}");
            assert_eq!(drain(storage.as_ref()).await, vec![kept.id()], "{name}");
        }
    }

    #[tokio::test]
    async fn find_matches_across_sets_and_validates_fields() {
        for (name, storage) in backends().await {
            let mut criteria = Criteria::new();
            criteria.insert("nonsense".into(), json!(1));
            let err = storage.find(&criteria).await.unwrap_err();
            assert!(matches!(err, StorageError::UnknownCriteria { .. }), "{name}");

            let waiting = scheduled(Some(1));
            let done = scheduled(None);
            storage.enqueue_waiting(waiting.clone()).await.unwrap();
            storage.store_complete(done.clone()).await.unwrap();

            let mut criteria = Criteria::new();
            criteria.insert("method_name".into(), json!("noop"));
            assert_eq!(storage.find(&criteria).await.unwrap().len(), 2, "{name}");

            criteria.insert("scheduler".into(), json!("at"));
            let found = storage.find(&criteria).await.unwrap();
            assert_eq!(found.len(), 1, "{name}");
            assert!(found[0].ptr_eq(&waiting), "{name}");
        }
    }
}

proptest! {
    /// Dequeue order is non-decreasing in eligible time, FIFO among equal times,
    /// with immediate tasks first.
    #[test]
    fn prop_waiting_order_is_time_then_fifo(
        offsets in prop::collection::vec(prop::option::of(-5i64..5), 1..40)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = VolatileStorage::new();
            let tasks: Vec<Task> = offsets.iter().map(|o| scheduled(*o)).collect();
            for task in &tasks {
                storage.enqueue_waiting(task.clone()).await.unwrap();
            }

            let mut expected: Vec<&Task> = tasks.iter().collect();
            // Stable sort keeps insertion order among equal keys.
            expected.sort_by_key(|t| t.scheduled_time());
            let expected: Vec<TaskId> = expected.into_iter().map(Task::id).collect();

            prop_assert_eq!(drain(&storage).await, expected);
            prop_assert_eq!(storage.num_waiting().await, 0);
            Ok(())
        })?;
    }
}
