use crate::common::*;
use microflow_core::constants::NO_STEP_ID;
use microflow_core::error::{GraphError, MicroflowError};
use microflow_core::models::{HttpMethod, RunRequest, Step};
use microflow_core::orchestration::{RunStatus, TransportError};
use microflow_core::state_machine::StepExecutionState;
use microflow_core::storage::OrchestrationPhase;
use std::time::Duration;

#[tokio::test]
async fn test_linear_workflow_runs_in_order() {
    let engine = TestEngine::new();
    engine
        .deploy("linear", vec![step(1, vec![2]), step(2, vec![3]), step(3, vec![])])
        .await;

    let report = engine.run("linear").await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.iterations.len(), 1);
    let iteration = &report.iterations[0];
    assert_eq!(iteration.run_id, "inst@1");
    assert_eq!(iteration.executed, vec![1, 2, 3]);
    assert!(iteration.failed.is_empty());
    assert_eq!(engine.invoker.invoked_steps(), vec![1, 2, 3]);
    assert_eq!(engine.audit.completed_steps("inst@1"), vec![1, 2, 3]);
    assert!(iteration
        .step_states
        .iter()
        .filter(|(id, _)| **id > 0)
        .all(|(_, state)| *state == StepExecutionState::Propagated));
}

async fn assert_join_waits_for(slow_branch: i32) {
    let engine = TestEngine::new();
    engine
        .deploy(
            "diamond",
            vec![step(1, vec![2, 3]), step(2, vec![4]), step(3, vec![4]), step(4, vec![])],
        )
        .await;
    engine.invoker.delay(&url(slow_branch), Duration::from_millis(40));

    let report = engine.run("diamond").await;

    assert_eq!(report.status, RunStatus::Completed);
    let join_calls = engine.invoker.calls_to(&url(4));
    assert_eq!(join_calls.len(), 1);
    let slow_started = engine.invoker.calls_to(&url(slow_branch))[0].at;
    assert!(join_calls[0].at.duration_since(slow_started) >= Duration::from_millis(40));
    assert_eq!(report.iterations[0].executed.last(), Some(&4));
}

#[tokio::test]
async fn test_diamond_join_waits_for_left_parent() {
    assert_join_waits_for(2).await;
}

#[tokio::test]
async fn test_diamond_join_waits_for_right_parent() {
    assert_join_waits_for(3).await;
}

#[tokio::test]
async fn test_wide_fan_in_fires_once() {
    let engine = TestEngine::new();
    let mut steps: Vec<Step> = (1..=20).map(|id| step(id, vec![21])).collect();
    steps.push(step(21, vec![]));
    let graph = engine.deploy("fan-in", steps).await;
    assert_eq!(graph.parent_count(21), Some(20));
    assert_eq!(graph.root().unwrap().children.len(), 20);

    let report = engine.run("fan-in").await;

    assert_eq!(engine.invoker.calls_to(&url(21)).len(), 1);
    assert_eq!(engine.invoker.calls().len(), 21);
    assert_eq!(report.iterations[0].executed.last(), Some(&21));
}

#[tokio::test]
async fn test_failing_parent_blocks_join_but_not_siblings() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "blocked",
            vec![step(1, vec![2, 3]), step(2, vec![4]), step(3, vec![4]), step(4, vec![])],
        )
        .await;
    engine.invoker.always(&url(2), Scripted::Respond(500));

    let report = engine.run("blocked").await;

    let iteration = &report.iterations[0];
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(iteration.failed, vec![2]);
    assert!(iteration.executed.contains(&3));
    assert!(engine.invoker.calls_to(&url(4)).is_empty());
    assert_eq!(iteration.step_states[&2], StepExecutionState::Failed);
    assert!(!iteration.step_states.contains_key(&4));

    let errors = engine.audit.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].step_id, 2);
    assert!(!errors[0].fatal);
}

#[tokio::test]
async fn test_continue_on_failure_credits_children() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "tolerant",
            vec![
                step(1, vec![3]).with_stop_on_failure(false),
                step(2, vec![3]),
                step(3, vec![]),
            ],
        )
        .await;
    engine.invoker.always(
        &url(1),
        Scripted::Fail(TransportError::ConnectionError("refused".to_string())),
    );

    let report = engine.run("tolerant").await;

    let iteration = &report.iterations[0];
    assert_eq!(iteration.failed, vec![1]);
    assert_eq!(engine.invoker.calls_to(&url(3)).len(), 1);
    assert!(iteration.executed.contains(&2));
    assert!(iteration.executed.contains(&3));
    assert_eq!(engine.audit.completed_steps("inst@1").len(), 3);
}

#[tokio::test]
async fn test_loop_iterations_run_sequentially_and_clean_up() {
    let engine = TestEngine::new();
    engine.deploy("looped", vec![step(1, vec![2]), step(2, vec![])]).await;

    let report = engine
        .core
        .start_run(
            RunRequest::new("looped")
                .with_instance_id("inst")
                .with_loop_count(3),
        )
        .await
        .unwrap();

    let run_ids: Vec<&str> = report.iterations.iter().map(|it| it.run_id.as_str()).collect();
    assert_eq!(run_ids, vec!["inst@1", "inst@2", "inst@3"]);
    assert_eq!(engine.invoker.invoked_steps(), vec![1, 2, 1, 2, 1, 2]);

    let services = engine.core.services();
    assert!(services.counters.is_empty());
    assert!(services.arena.snapshot("inst@2").is_empty());
}

#[tokio::test]
async fn test_post_body_and_get_method() {
    let engine = TestEngine::new();
    engine
        .deploy("bodies", vec![step(1, vec![2]), step(2, vec![]).with_http_get()])
        .await;

    engine
        .core
        .start_run(
            RunRequest::new("bodies")
                .with_instance_id("inst")
                .with_global_key("tenant"),
        )
        .await
        .unwrap();

    let post = &engine.invoker.calls_to(&url(1))[0];
    assert_eq!(post.method, HttpMethod::Post);
    let body = post.body.as_ref().expect("post carries a body");
    assert_eq!(body["projectName"], "bodies");
    assert_eq!(body["runId"], "inst@1");
    assert_eq!(body["stepId"], 1);
    assert_eq!(body["globalKey"], "tenant");
    assert_eq!(body["loopIndex"], 1);
    assert!(body.get("webhookKey").is_none());

    let get = &engine.invoker.calls_to(&url(2))[0];
    assert_eq!(get.method, HttpMethod::Get);
    assert!(get.body.is_none());
}

#[tokio::test]
async fn test_url_placeholders_are_rendered() {
    let engine = TestEngine::new();
    engine
        .deploy(
            "ph",
            vec![Step::new(1, "http://svc/<ProjectName>/<RunId>/<StepId>?g=<GlobalKey>")],
        )
        .await;

    engine
        .core
        .start_run(RunRequest::new("ph").with_instance_id("inst").with_global_key("tenant"))
        .await
        .unwrap();

    assert_eq!(
        engine.invoker.called_urls(),
        vec!["http://svc/ph/inst@1/1?g=tenant".to_string()]
    );
}

#[tokio::test]
async fn test_orchestration_markers_are_audited() {
    let engine = TestEngine::new();
    engine.deploy("audited", vec![step(1, vec![])]).await;

    let report = engine.run("audited").await;

    let markers = engine.audit.orchestrations();
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].phase, OrchestrationPhase::Started);
    assert_eq!(markers[1].phase, OrchestrationPhase::Completed);
    assert!(markers.iter().all(|m| m.instance_id == report.instance_id));
    // global key defaults to the instance id
    assert_eq!(report.global_key, "inst");

    // root is never audited
    let steps = engine.audit.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_id, 1);
    assert_eq!(steps[0].attempts, 1);
}

#[tokio::test]
async fn test_uncompiled_project_is_fatal() {
    let engine = TestEngine::new();

    let result = engine.core.start_run(RunRequest::new("missing")).await;

    assert!(matches!(
        result,
        Err(MicroflowError::Graph(GraphError::NotCompiled(_)))
    ));
    let errors = engine.audit.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].step_id, NO_STEP_ID);
    assert!(errors[0].fatal);
    assert!(engine.audit.orchestrations().is_empty());
}

#[tokio::test]
async fn test_steps_in_progress_tracks_running_actions() {
    let engine = TestEngine::new();
    engine.deploy("busy", vec![step(1, vec![])]).await;
    engine.invoker.hold(&url(1));

    let run = engine.spawn_run(RunRequest::new("busy"));
    engine.invoker.wait_for_calls(1).await;
    assert_eq!(engine.core.steps_in_progress("busy", 1), 1);

    engine.invoker.release(&url(1));
    run.await.unwrap().unwrap();
    assert_eq!(engine.core.steps_in_progress("busy", 1), 0);
}
