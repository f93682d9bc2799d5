use crate::common::*;
use microflow_core::orchestration::TransportError;
use microflow_core::storage::StepOutcome;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_with_backoff_spacing() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "retry",
            vec![
                step(1, vec![2]).with_retry_policy(retry_policy(1, 2, 0)),
                step(2, vec![]),
            ],
        )
        .await;
    engine.invoker.always(&url(1), Scripted::Respond(503));

    let report = engine.run("retry").await;

    let attempts = engine.invoker.calls_to(&url(1));
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_secs(1));
    }
    assert!(engine.invoker.calls_to(&url(2)).is_empty());
    assert_eq!(report.iterations[0].failed, vec![1]);

    let entries = engine.audit.steps_for_run("inst@1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 3);
    assert!(matches!(entries[0].outcome, StepOutcome::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_by_coefficient() {
    let engine = TestEngine::new();
    let mut policy = retry_policy(1, 3, 0);
    policy.backoff_coefficient = 2.0;
    engine
        .deploy("growth", vec![step(1, vec![]).with_retry_policy(policy)])
        .await;
    engine.invoker.always(&url(1), Scripted::Respond(500));

    engine.run("growth").await;

    let at: Vec<_> = engine.invoker.calls_to(&url(1)).iter().map(|c| c.at).collect();
    assert_eq!(at.len(), 4);
    assert!(at[1].duration_since(at[0]) >= Duration::from_secs(1));
    assert!(at[2].duration_since(at[1]) >= Duration::from_secs(2));
    assert!(at[3].duration_since(at[2]) >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_succeed_runs_children() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "flaky",
            vec![
                step(1, vec![2]).with_retry_policy(retry_policy(1, 3, 0)),
                step(2, vec![]),
            ],
        )
        .await;
    engine.invoker.script(
        &url(1),
        vec![
            Scripted::Fail(TransportError::ConnectionError("reset".to_string())),
            Scripted::Respond(200),
        ],
    );

    let report = engine.run("flaky").await;

    assert_eq!(engine.invoker.calls_to(&url(1)).len(), 2);
    assert_eq!(report.iterations[0].executed, vec![1, 2]);
    let first = &engine.audit.steps_for_run("inst@1")[0];
    assert_eq!(first.step_id, 1);
    assert_eq!(first.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_deadline_stops_further_attempts() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "deadline",
            vec![step(1, vec![]).with_retry_policy(retry_policy(10, 5, 15))],
        )
        .await;
    engine.invoker.always(&url(1), Scripted::Respond(502));

    let report = engine.run("deadline").await;

    // attempt at 0s, retry at 10s, the next one would start past the 15s deadline
    assert_eq!(engine.invoker.calls_to(&url(1)).len(), 2);
    assert_eq!(report.iterations[0].failed, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_action_times_out() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "slow",
            vec![step(1, vec![2]).with_action_timeout(1), step(2, vec![])],
        )
        .await;
    engine.invoker.delay(&url(1), Duration::from_secs(5));

    let report = engine.run("slow").await;

    assert_eq!(report.iterations[0].failed, vec![1]);
    assert!(engine.invoker.calls_to(&url(2)).is_empty());
    let errors = engine.audit.errors();
    assert!(errors[0].message.contains("timed out after 1s"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_continue_with_retries_still_fans_out() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "soft",
            vec![
                step(1, vec![2])
                    .with_retry_policy(retry_policy(1, 1, 0))
                    .with_stop_on_failure(false),
                step(2, vec![]),
            ],
        )
        .await;
    engine.invoker.always(&url(1), Scripted::Respond(500));

    let report = engine.run("soft").await;

    assert_eq!(engine.invoker.calls_to(&url(1)).len(), 2);
    assert_eq!(engine.invoker.calls_to(&url(2)).len(), 1);
    assert_eq!(report.iterations[0].failed, vec![1]);
    assert_eq!(report.iterations[0].executed, vec![2]);
}
