use crate::common::*;
use microflow_core::coordination::{SignalDelivery, WebhookSignal};
use microflow_core::models::{RunRequest, Step, WebhookSpec};
use microflow_core::orchestration::RunStatus;
use microflow_core::state_machine::StepExecutionState;

fn approval_workflow(webhook: WebhookSpec) -> Vec<Step> {
    vec![
        step(1, vec![2]).with_webhook(webhook),
        step(2, vec![]),
        step(5, vec![]),
        step(6, vec![]),
        step(7, vec![]),
    ]
}

fn approval_routes() -> WebhookSpec {
    WebhookSpec::new("approval-<RunId>")
        .with_route("approve", vec![5, 6])
        .with_route("reject", vec![7])
}

async fn wait_for_waiter(engine: &TestEngine, key: &str) {
    let webhooks = engine.core.services().webhooks.clone();
    let key = key.to_string();
    eventually("a webhook waiter", move || webhooks.waiter_count(&key) == 1).await;
}

#[tokio::test]
async fn test_signal_action_selects_routed_children() {
    let engine = TestEngine::new();
    engine.deploy("approval", approval_workflow(approval_routes())).await;

    let run = engine.spawn_run(RunRequest::new("approval").with_instance_id("inst"));
    wait_for_waiter(&engine, "approval-inst@1").await;
    assert_eq!(engine.invoker.invoked_steps(), vec![1]);

    let delivery = engine
        .core
        .signal_webhook("approval-inst@1", WebhookSignal::new(Some("APPROVE")));
    assert_eq!(delivery, SignalDelivery::Delivered);

    let report = run.await.unwrap().unwrap();
    let mut invoked = engine.invoker.invoked_steps();
    invoked.sort_unstable();
    assert_eq!(invoked, vec![1, 5, 6]);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_action_post_carries_webhook_identity() {
    let engine = TestEngine::new();
    engine.deploy("approval", approval_workflow(approval_routes())).await;

    let run = engine.spawn_run(RunRequest::new("approval").with_instance_id("inst"));
    wait_for_waiter(&engine, "approval-inst@1").await;

    let body = engine.invoker.calls_to(&url(1))[0].body.clone().unwrap();
    assert_eq!(body["webhookKey"], "approval-inst@1");
    assert_eq!(body["callbackUrl"], "http://engine.local/webhooks/approval-inst@1");

    engine
        .core
        .signal_webhook("approval-inst@1", WebhookSignal::new(Some("reject")));
    run.await.unwrap().unwrap();
    assert_eq!(engine.invoker.invoked_steps(), vec![1, 7]);
}

#[tokio::test]
async fn test_unknown_or_missing_action_uses_default_children() {
    for action in [Some("escalate"), None] {
        let engine = TestEngine::new();
        engine.deploy("approval", approval_workflow(approval_routes())).await;

        let run = engine.spawn_run(RunRequest::new("approval").with_instance_id("inst"));
        wait_for_waiter(&engine, "approval-inst@1").await;
        engine
            .core
            .signal_webhook("approval-inst@1", WebhookSignal::new(action));

        run.await.unwrap().unwrap();
        assert_eq!(engine.invoker.invoked_steps(), vec![1, 2]);
    }
}

#[tokio::test]
async fn test_signal_before_wait_is_buffered() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "early",
            vec![
                step(1, vec![2])
                    .with_webhook(WebhookSpec::new("fixed-key").with_route("approve", vec![5])),
                step(2, vec![]),
                step(5, vec![]),
            ],
        )
        .await;

    let delivery = engine
        .core
        .signal_webhook("fixed-key", WebhookSignal::new(Some("approve")));
    assert_eq!(delivery, SignalDelivery::Buffered);

    engine.run("early").await;
    assert_eq!(engine.invoker.invoked_steps(), vec![1, 5]);
}

#[tokio::test]
async fn test_unresolvable_action_ends_branch() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "strict",
            vec![
                Step::new(1, url(1)).with_webhook(WebhookSpec::new("k").with_route("approve", vec![5])),
                step(5, vec![]),
            ],
        )
        .await;

    let run = engine.spawn_run(RunRequest::new("strict").with_instance_id("inst"));
    wait_for_waiter(&engine, "k").await;
    engine.core.signal_webhook("k", WebhookSignal::new(Some("bogus")));

    let report = run.await.unwrap().unwrap();
    let iteration = &report.iterations[0];
    assert_eq!(iteration.failed, vec![1]);
    assert_eq!(iteration.step_states[&1], StepExecutionState::Failed);
    assert_eq!(engine.invoker.invoked_steps(), vec![1]);
    assert!(engine.audit.errors()[0].message.contains("'bogus'"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_halts_branch_by_default() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "timeout",
            vec![
                step(1, vec![2])
                    .with_webhook(WebhookSpec::new("never"))
                    .with_callback_timeout(30),
                step(2, vec![]),
            ],
        )
        .await;

    let report = engine.run("timeout").await;

    assert_eq!(report.iterations[0].failed, vec![1]);
    assert_eq!(engine.invoker.invoked_steps(), vec![1]);
    assert_eq!(engine.core.services().webhooks.waiter_count("never"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_continues_when_configured() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "lenient",
            vec![
                step(1, vec![2])
                    .with_webhook(WebhookSpec::new("never").continue_on_failure())
                    .with_callback_timeout(30),
                step(2, vec![]),
            ],
        )
        .await;

    let report = engine.run("lenient").await;

    assert_eq!(report.iterations[0].executed, vec![1, 2]);
    assert!(report.iterations[0].failed.is_empty());
}
