//! The shipped demo workflows resolve and run against the echo backend.

use std::path::PathBuf;
use std::sync::Arc;

use braid_config::{BackendConfig, WorkflowDef};
use braid_runtime::{
  ChannelNotifier, EchoBackend, ExecutionEvent, RunStatus, StateBus, WorkflowRuntime,
};
use braid_workflow::Workflow;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn demo(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("demos")
    .join(name)
}

fn load(name: &str) -> Workflow {
  let content = std::fs::read_to_string(demo(name)).unwrap();
  let def: WorkflowDef = serde_json::from_str(&content).unwrap();
  braid_workflow::resolve(def).unwrap()
}

#[test]
fn test_backend_config_parses() {
  let content = std::fs::read_to_string(demo("backend.json")).unwrap();
  let config: BackendConfig = serde_json::from_str(&content).unwrap();
  assert_eq!(config.retry.http_status_codes, vec![429, 500, 503, 504]);
}

#[tokio::test]
async fn test_story_demo_dry_run_hits_cap() {
  let runtime = WorkflowRuntime::builder(load("story.json"))
    .backend(Arc::new(EchoBackend))
    .build()
    .unwrap();

  let result = runtime
    .execute_workflow(
      StateBus::from_json(json!({ "prompt": "a lighthouse keeper" })).unwrap(),
      CancellationToken::new(),
    )
    .wait()
    .await
    .unwrap();

  // Echoed critiques never equal the sentinel.
  assert_eq!(result.status, RunStatus::CapReached);
  assert_eq!(result.loop_results["refine"].iterations, 3);
}

#[tokio::test]
async fn test_briefing_demo_with_approval() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let runtime = WorkflowRuntime::builder(load("briefing.json"))
    .backend(Arc::new(EchoBackend))
    .notifier(ChannelNotifier::new(tx))
    .build()
    .unwrap();
  let gate = runtime.approvals().clone();

  let execution = runtime.execute_workflow(
    StateBus::from_json(json!({ "topic": "battery recycling" })).unwrap(),
    CancellationToken::new(),
  );
  let approve = async {
    while let Some(event) = rx.recv().await {
      if let ExecutionEvent::ApprovalRequested { token, .. } = event {
        gate.resolve(&token, true).unwrap();
        return;
      }
    }
  };

  let (result, ()) = tokio::join!(execution.wait(), approve);
  let result = result.unwrap();

  assert_eq!(result.status, RunStatus::Succeeded);
  assert_eq!(result.state.get("publish_status"), Some(&json!("published")));
  let briefing = result.state.get("briefing").unwrap().as_str().unwrap();
  assert!(briefing.starts_with("# battery recycling"));
  assert!(briefing.contains("Summarize recent health news about battery recycling"));
}
