use crate::common::*;
use microflow_core::constants::ROOT_STEP_ID;
use microflow_core::coordination::RunStateScope;
use microflow_core::error::{GraphError, MicroflowError};
use microflow_core::models::{HttpMethod, StepAction, WebhookSpec, WorkflowDefinition};
use microflow_core::state_machine::RunState;
use microflow_core::storage::GraphStore;

#[tokio::test]
async fn test_upsert_compiles_fan_in_degrees_and_root_edges() {
    let engine = TestEngine::new();
    let graph = engine
        .deploy(
            "diamond",
            vec![step(1, vec![2, 3]), step(2, vec![4]), step(3, vec![4]), step(4, vec![])],
        )
        .await;

    assert_eq!(graph.step_count(), 4);
    assert_eq!(graph.parent_count(1), Some(0));
    assert_eq!(graph.parent_count(4), Some(2));

    let root = graph.root().unwrap();
    let root_children: Vec<i32> = root.children.iter().map(|edge| edge.child_id).collect();
    assert_eq!(root_children, vec![1]);
    assert!(root.children.iter().all(|edge| edge.child_parent_count == 1));

    let into_four: Vec<u32> = graph.steps[&2]
        .children
        .iter()
        .map(|edge| edge.child_parent_count)
        .collect();
    assert_eq!(into_four, vec![2]);

    let stored = engine.store.load_compiled_graph("diamond").await.unwrap();
    assert_eq!(*stored, *graph);
}

#[tokio::test]
async fn test_upsert_maps_actions() {
    let engine = TestEngine::new();
    let graph = engine
        .deploy(
            "actions",
            vec![
                step(1, vec![2]).with_http_get(),
                step(2, vec![]).with_retry_policy(retry_policy(1, 2, 0)),
            ],
        )
        .await;

    match &graph.steps[&1].action {
        StepAction::Simple { http } => assert_eq!(http.method, HttpMethod::Get),
        other => panic!("expected a simple action, got {other:?}"),
    }
    match &graph.steps[&2].action {
        StepAction::Retrying { http, retry } => {
            assert_eq!(http.method, HttpMethod::Post);
            assert_eq!(retry.max_retries, 2);
        }
        other => panic!("expected a retrying action, got {other:?}"),
    }
    assert!(matches!(graph.steps[&ROOT_STEP_ID].action, StepAction::Container));
}

#[tokio::test]
async fn test_webhook_route_children_count_as_parents() {
    let engine = TestEngine::new();
    let graph = engine
        .deploy(
            "approval",
            vec![
                step(1, vec![2]).with_webhook(WebhookSpec::new("k").with_route("approve", vec![3])),
                step(2, vec![]),
                step(3, vec![]),
            ],
        )
        .await;

    assert_eq!(graph.parent_count(3), Some(1));
    let root_children: Vec<i32> = graph.root().unwrap().children.iter().map(|e| e.child_id).collect();
    assert_eq!(root_children, vec![1]);
}

#[tokio::test]
async fn test_upsert_rejected_while_project_or_global_not_ready() {
    let engine = TestEngine::new();
    let states = &engine.core.services().run_states;

    states.set_paused(RunStateScope::Project, "locked");
    let result = engine
        .core
        .upsert_project(WorkflowDefinition::new("locked", vec![step(1, vec![])]), None)
        .await;
    assert!(matches!(result, Err(MicroflowError::ProjectLocked { .. })));

    states.set_ready(RunStateScope::Project, "locked");
    states.set_stopped(RunStateScope::Global, "tenant");
    let result = engine
        .core
        .upsert_project(
            WorkflowDefinition::new("locked", vec![step(1, vec![])]),
            Some("tenant"),
        )
        .await;
    assert!(matches!(result, Err(MicroflowError::ProjectLocked { .. })));
    assert!(engine.store.load_compiled_graph("locked").await.is_err());
}

#[tokio::test]
async fn test_failed_compile_keeps_previous_graph_and_restores_ready() {
    let engine = TestEngine::new();
    let original = engine.deploy("orders", vec![step(1, vec![])]).await;

    let result = engine
        .core
        .upsert_project(WorkflowDefinition::new("orders", vec![step(1, vec![9])]), None)
        .await;
    assert!(matches!(
        result,
        Err(MicroflowError::Graph(GraphError::UnknownChild { parent: 1, child: 9 }))
    ));

    let stored = engine.store.load_compiled_graph("orders").await.unwrap();
    assert_eq!(*stored, *original);
    assert_eq!(
        engine.core.services().run_states.get(RunStateScope::Project, "orders"),
        RunState::Ready
    );

    let errors = engine.audit.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].fatal);
}

#[tokio::test]
async fn test_duplicate_step_rejected() {
    let engine = TestEngine::new();
    let result = engine
        .core
        .upsert_project(
            WorkflowDefinition::new("dup", vec![step(1, vec![]), step(1, vec![])]),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(MicroflowError::Graph(GraphError::DuplicateStep(1)))
    ));
}

#[tokio::test]
async fn test_json_definition_applies_merge_fields() {
    let engine = TestEngine::new();
    let raw = r#"{
        "projectName": "merged",
        "mergeFields": {"host": "http://orders.internal"},
        "steps": [
            {"stepId": 1, "actionUrl": "{host}/validate", "children": [2]},
            {"stepId": 2, "actionUrl": "{host}/ship", "isIdempotentGet": true}
        ]
    }"#;

    let graph = engine.core.upsert_project_json(raw, None).await.unwrap();
    let http = graph.steps[&2].action.http().unwrap();
    assert_eq!(http.url, "http://orders.internal/ship");
    assert_eq!(http.method, HttpMethod::Get);
}

#[tokio::test]
async fn test_delete_project_removes_graph() {
    let engine = TestEngine::new();
    engine.deploy("gone", vec![step(1, vec![])]).await;

    assert!(engine.core.delete_project("gone").await.unwrap());
    assert!(!engine.core.delete_project("gone").await.unwrap());
    assert!(engine.store.project_ids().is_empty());
}
