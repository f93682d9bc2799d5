use futures::future::join_all;
use microflow_core::coordination::CompletionCounterStore;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_hit_threshold_exactly_once() {
    let counters = Arc::new(CompletionCounterStore::new());
    let parents = 20;

    let handles = (0..parents).map(|_| {
        let counters = counters.clone();
        tokio::spawn(async move { counters.increment_and_get("run@1", 7) })
    });

    let mut observed: Vec<u32> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    observed.sort_unstable();

    assert_eq!(observed, (1..=parents).collect::<Vec<u32>>());
    assert_eq!(observed.iter().filter(|value| **value == parents).count(), 1);
}

#[test]
fn test_counters_are_scoped_by_run() {
    let counters = CompletionCounterStore::new();
    assert_eq!(counters.get("run@1", 3), 0);

    counters.increment_and_get("run@1", 3);
    counters.increment_and_get("run@1", 3);
    counters.increment_and_get("run@2", 3);

    assert_eq!(counters.get("run@1", 3), 2);
    assert_eq!(counters.get("run@2", 3), 1);

    assert_eq!(counters.delete_run("run@1"), 1);
    assert_eq!(counters.get("run@1", 3), 0);
    assert_eq!(counters.get("run@2", 3), 1);

    counters.reset("run@2", 3);
    assert_eq!(counters.get("run@2", 3), 0);
}
