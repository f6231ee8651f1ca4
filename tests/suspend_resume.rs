//! Suspend/resume protocol tests: graceful and immediate modes, checkpoint
//! round-trips, stale resumes, consume-once suspensions, and nested
//! sub-workflow checkpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use stepflow::{
    and_then, create_suspend_controller, sub_workflow, ExecutionStatus, InMemoryPersistence,
    ResumeOptions, RunOptions, StepContext, StepError, SuspensionMode, Workflow, WorkflowError,
    WorkflowRegistry,
};

fn append_step(
    id: &str,
    tag: &'static str,
    delay: Duration,
    counter: Arc<AtomicUsize>,
) -> stepflow::WorkflowStep {
    and_then(id, id, move |ctx: StepContext| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let trail = ctx.data["trail"].as_str().unwrap_or_default();
            Ok(json!({ "trail": format!("{trail}:{tag}") }))
        }
    })
}

#[tokio::test]
async fn test_graceful_suspend_waits_for_inflight_step() {
    let counters: Vec<Arc<AtomicUsize>> =
        (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("pausable", "pausable")
        .registry(registry.clone())
        .step(append_step("s0", "s0", Duration::ZERO, counters[0].clone()))
        .step(append_step(
            "s1",
            "s1",
            Duration::from_millis(300),
            counters[1].clone(),
        ))
        .step(append_step("s2", "s2", Duration::ZERO, counters[2].clone()))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(Some("taking a break"));
    });

    let result = workflow
        .run(
            json!({"trail": "start"}),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Suspended);
    let suspension = result.suspension.as_ref().unwrap();
    // The in-flight step (s1) finished before the suspend took effect.
    assert_eq!(suspension.suspended_step_index, 2);
    assert_eq!(suspension.reason.as_deref(), Some("taking a break"));
    assert_eq!(suspension.checkpoint.completed_steps_data.len(), 2);
    assert_eq!(
        suspension.checkpoint.completed_steps_data[1]["trail"],
        "start:s0:s1"
    );

    // Resume continues exactly where the checkpoint says, without re-running
    // the completed prefix.
    let resumed = result.resume(None, Default::default()).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.result.as_ref().unwrap()["trail"], "start:s0:s1:s2");
    assert_eq!(resumed.execution_id, result.execution_id);
    assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    assert_eq!(counters[1].load(Ordering::SeqCst), 1);
    assert_eq!(counters[2].load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_immediate_suspend_abandons_step_after_grace() {
    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("immediate", "immediate")
        .registry(registry.clone())
        .step(and_then("stubborn", "Stubborn", |_ctx: StepContext| async move {
            // Never observes the abort signal.
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!("done"))
        }))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(Some("now"));
    });

    let started = std::time::Instant::now();
    let result = workflow
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                suspension_mode: SuspensionMode::Immediate,
                grace_period: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Suspended);
    assert!(started.elapsed() < Duration::from_secs(5));
    let suspension = result.suspension.as_ref().unwrap();
    assert_eq!(suspension.suspended_step_index, 0);
    assert!(suspension.checkpoint.completed_steps_data.is_empty());
}

#[tokio::test]
async fn test_immediate_suspend_cooperative_step() {
    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("cooperative", "cooperative")
        .registry(registry.clone())
        .step(and_then("watcher", "Watcher", |ctx: StepContext| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!("done")),
                _ = ctx.signal.cancelled() => Err(StepError::Suspended {
                    reason: Some("observed signal".into()),
                }),
            }
        }))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(None);
    });

    let result = workflow
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                suspension_mode: SuspensionMode::Immediate,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Suspended);
    assert_eq!(
        result.suspension.as_ref().unwrap().reason.as_deref(),
        Some("observed signal")
    );
}

#[tokio::test]
async fn test_suspension_consumed_exactly_once() {
    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("once", "once")
        .registry(registry.clone())
        .step(and_then("wait", "Wait", |_ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(1))
        }))
        .step(and_then("after", "After", |ctx: StepContext| async move { Ok(ctx.data) }))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(None);
    });

    let result = workflow
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Suspended);

    let resumed = result.resume(None, Default::default()).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);

    // The suspension was consumed by the first resume.
    let err = result.resume(None, Default::default()).await.err().unwrap();
    assert!(matches!(err, WorkflowError::NotResumable(_)));
}

#[tokio::test]
async fn test_stale_resume_rejected() {
    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("stale", "stale")
        .registry(registry.clone())
        .step(and_then("wait", "Wait", |_ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(1))
        }))
        .step(and_then("after", "After", |ctx: StepContext| async move { Ok(ctx.data) }))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(None);
    });

    let result = workflow
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Suspended);
    let suspension = result.suspension.as_ref().unwrap();
    assert!(suspension.last_event_sequence > 0);

    // A resume whose recorded sequence predates the persisted one is a
    // version mismatch.
    let stale = workflow
        .run(
            Value::Null,
            RunOptions {
                resume_from: Some(ResumeOptions {
                    execution_id: result.execution_id.clone(),
                    checkpoint: suspension.checkpoint.clone(),
                    resume_step_index: suspension.suspended_step_index,
                    last_event_sequence: Some(0),
                    resume_data: None,
                }),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(stale.status, ExecutionStatus::Error);
    assert!(matches!(stale.error, Some(WorkflowError::StaleResume { .. })));
}

#[tokio::test]
async fn test_resume_data_merges_into_checkpoint_payload() {
    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("merge", "merge")
        .registry(registry.clone())
        .step(and_then("first", "First", |_ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!({"a": 1, "b": 2}))
        }))
        .step(and_then("second", "Second", |ctx: StepContext| async move {
            Ok(ctx.data)
        }))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(None);
    });

    let result = workflow
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Suspended);

    let resumed = result
        .resume(Some(json!({"b": 9, "c": 3})), Default::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.result, Some(json!({"a": 1, "b": 9, "c": 3})));
}

#[tokio::test]
async fn test_resume_from_persisted_checkpoint_after_registry_loss() {
    let persistence = Arc::new(InMemoryPersistence::new());

    let build = |registry: &WorkflowRegistry| {
        Workflow::builder("durable", "durable")
            .registry(registry.clone())
            .persistence(persistence.clone())
            .step(and_then("first", "First", |_ctx: StepContext| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!({"stage": "first"}))
            }))
            .step(and_then("second", "Second", |_ctx: StepContext| async move {
                Ok(json!({"stage": "second"}))
            }))
            .build()
            .unwrap()
    };

    let registry_a = WorkflowRegistry::new();
    let workflow_a = build(&registry_a);
    registry_a.register_workflow(workflow_a.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(None);
    });

    let result = workflow_a
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Suspended);

    // A fresh registry (e.g. after process restart) has no suspension entry;
    // resume falls back to the checkpoint persisted by the first run.
    let registry_b = WorkflowRegistry::new();
    let workflow_b = build(&registry_b);
    registry_b.register_workflow(workflow_b.clone());

    let resumed = workflow_b
        .resume(&result.execution_id, None, Default::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.result, Some(json!({"stage": "second"})));
}

#[tokio::test]
async fn test_sub_workflow_suspension_nests_checkpoint() {
    let registry = WorkflowRegistry::new();

    let child = Workflow::builder("child", "child")
        .registry(registry.clone())
        .step(and_then("c0", "c0", |ctx: StepContext| async move {
            let trail = ctx.data["trail"].as_str().unwrap_or_default();
            Ok(json!({ "trail": format!("{trail}:c0") }))
        }))
        .step(and_then("c1", "c1", |ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let trail = ctx.data["trail"].as_str().unwrap_or_default();
            Ok(json!({ "trail": format!("{trail}:c1") }))
        }))
        .step(and_then("c2", "c2", |ctx: StepContext| async move {
            let trail = ctx.data["trail"].as_str().unwrap_or_default();
            Ok(json!({ "trail": format!("{trail}:c2") }))
        }))
        .build()
        .unwrap();
    registry.register_workflow(child);

    let parent = Workflow::builder("parent", "parent")
        .registry(registry.clone())
        .step(and_then("p0", "p0", |ctx: StepContext| async move {
            let trail = ctx.data["trail"].as_str().unwrap_or_default();
            Ok(json!({ "trail": format!("{trail}:p0") }))
        }))
        .step(sub_workflow("p1", "Run child", "child"))
        .step(and_then("p2", "p2", |ctx: StepContext| async move {
            let trail = ctx.data["trail"].as_str().unwrap_or_default();
            Ok(json!({ "trail": format!("{trail}:p2") }))
        }))
        .build()
        .unwrap();
    registry.register_workflow(parent.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        suspender.suspend(Some("nested pause"));
    });

    let result = parent
        .run(
            json!({"trail": "start"}),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Suspended);
    let suspension = result.suspension.as_ref().unwrap();
    assert_eq!(suspension.suspended_step_index, 1);
    // The sub-workflow step nests the child's execution id and checkpoint.
    let nested = suspension.checkpoint.step_execution_state.as_ref().unwrap();
    assert!(nested.get("execution_id").is_some());
    assert_eq!(nested["workflow_id"], "child");
    assert!(nested.get("checkpoint").is_some());

    let resumed = result.resume(None, Default::default()).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(
        resumed.result.as_ref().unwrap()["trail"],
        "start:p0:c0:c1:c2:p2"
    );
}

#[tokio::test]
async fn test_suspended_executions_discoverable_in_registry() {
    let registry = WorkflowRegistry::new();
    let workflow = Workflow::builder("tracked", "tracked")
        .registry(registry.clone())
        .step(and_then("wait", "Wait", |_ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(1))
        }))
        .step(and_then("after", "After", |ctx: StepContext| async move { Ok(ctx.data) }))
        .build()
        .unwrap();
    registry.register_workflow(workflow.clone());

    let controller = create_suspend_controller();
    let suspender = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        suspender.suspend(None);
    });

    let result = workflow
        .run(
            json!(null),
            RunOptions {
                suspend_controller: Some(controller),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(result.status, ExecutionStatus::Suspended);
    assert_eq!(
        registry.suspended_executions("tracked"),
        vec![result.execution_id.clone()]
    );

    let resumed = result.resume(None, Default::default()).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert!(registry.suspended_executions("tracked").is_empty());
    assert!(registry.active_executions("tracked").is_empty());
}
