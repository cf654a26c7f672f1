//! End-to-end test: a prompt pipeline loaded from its JSON definition.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use braid_config::WorkflowDef;
use braid_runtime::{
  BackendError, CountingNotifier, LoopExit, ModelBackend, ModelRequest, RunStatus, StateBus,
  WorkflowRuntime,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Answers writer, critic and refiner prompts from a script.
struct StoryBackend {
  critiques: Mutex<Vec<&'static str>>,
  prompts: Mutex<Vec<String>>,
}

impl StoryBackend {
  fn new(mut critiques: Vec<&'static str>) -> Self {
    critiques.reverse();
    Self {
      critiques: Mutex::new(critiques),
      prompts: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait]
impl ModelBackend for StoryBackend {
  async fn generate(&self, request: ModelRequest) -> Result<String, BackendError> {
    self.prompts.lock().unwrap().push(request.prompt.clone());

    let reply = match request.unit.as_str() {
      "writer" => "A lighthouse keeper finds a map.".to_string(),
      "critic" => self
        .critiques
        .lock()
        .unwrap()
        .pop()
        .unwrap_or("APPROVED")
        .to_string(),
      "refiner" => "A lighthouse keeper finds a map and follows it.".to_string(),
      other => {
        return Err(BackendError::InvalidResponse(format!(
          "unexpected unit {}",
          other
        )));
      }
    };
    Ok(reply)
  }
}

fn story_definition() -> WorkflowDef {
  serde_json::from_value(json!({
    "workflow_id": "story",
    "name": "Story Pipeline",
    "root": "pipeline",
    "inputs": ["prompt"],
    "nodes": [
      { "node_id": "pipeline", "type": "sequential", "children": ["writer", "refine"] },
      {
        "node_id": "writer", "type": "prompt",
        "instruction": "Write a short story about {{ prompt }}",
        "input_keys": ["prompt"], "output_key": "current_story"
      },
      {
        "node_id": "refine", "type": "loop", "children": ["critic", "refiner"],
        "max_iterations": 3,
        "exit": { "key": "critique", "sentinel": "APPROVED" }
      },
      {
        "node_id": "critic", "type": "prompt",
        "instruction": "Review: {{ current_story }}",
        "input_keys": ["current_story"], "output_key": "critique"
      },
      {
        "node_id": "refiner", "type": "prompt",
        "instruction": "Rewrite {{ current_story }} using {{ critique }}",
        "input_keys": ["current_story", "critique"], "output_key": "current_story"
      }
    ]
  }))
  .unwrap()
}

#[tokio::test]
async fn test_story_pipeline_refines_until_approved() {
  let workflow = braid_workflow::resolve(story_definition()).unwrap();
  let backend = Arc::new(StoryBackend::new(vec!["Needs a stronger ending", "APPROVED"]));
  let counter = Arc::new(CountingNotifier::new());

  let runtime = WorkflowRuntime::builder(workflow)
    .backend(backend.clone())
    .notifier(counter.clone())
    .build()
    .unwrap();

  let result = runtime
    .execute_workflow(
      StateBus::from_json(json!({ "prompt": "a lighthouse" })).unwrap(),
      CancellationToken::new(),
    )
    .wait()
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Succeeded);
  assert_eq!(result.loop_results["refine"].iterations, 2);
  assert_eq!(result.loop_results["refine"].exit, LoopExit::Approved);
  assert_eq!(result.state.get("critique"), Some(&json!("APPROVED")));
  assert_eq!(
    result.state.get("current_story"),
    Some(&json!("A lighthouse keeper finds a map and follows it."))
  );

  // writer once, then critic and refiner on each of the two iterations.
  assert_eq!(counter.model_requests(), 5);

  let prompts = backend.prompts.lock().unwrap();
  assert_eq!(prompts[0], "Write a short story about a lighthouse");
  assert_eq!(
    prompts[2],
    "Rewrite A lighthouse keeper finds a map. using Needs a stronger ending"
  );
}

#[tokio::test]
async fn test_story_pipeline_best_effort_at_cap() {
  let workflow = braid_workflow::resolve(story_definition()).unwrap();
  let backend = Arc::new(StoryBackend::new(vec!["meh"; 10]));

  let runtime = WorkflowRuntime::builder(workflow)
    .backend(backend)
    .build()
    .unwrap();

  let result = runtime
    .execute_workflow(
      StateBus::from_json(json!({ "prompt": "a lighthouse" })).unwrap(),
      CancellationToken::new(),
    )
    .wait()
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::CapReached);
  assert_eq!(result.loop_results["refine"].iterations, 3);
  assert!(result.state.contains_key("current_story"));
}

#[test]
fn test_overlapping_parallel_outputs_rejected_before_running() {
  let def: WorkflowDef = serde_json::from_value(json!({
    "workflow_id": "research",
    "name": "Research",
    "root": "fanout",
    "nodes": [
      { "node_id": "fanout", "type": "parallel", "children": ["tech", "health"] },
      { "node_id": "tech", "type": "handler", "handler": "tech", "output_key": "report" },
      { "node_id": "health", "type": "handler", "handler": "health", "output_key": "report" }
    ]
  }))
  .unwrap();

  assert!(matches!(
    braid_workflow::resolve(def),
    Err(braid_workflow::WorkflowError::OverlappingOutputKeys { .. })
  ));
}
