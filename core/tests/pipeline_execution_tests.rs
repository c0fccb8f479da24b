// tests/pipeline_execution_tests.rs
mod common;

use common::*;
use quire::pipeline::definition::HandlerFuture;
use quire::{ContextData, ErrorKind, Pipeline, PipelineControl, PipelineResult, QuireError, StepDef, Workflows};
use serial_test::serial;

#[derive(Debug, Clone, Default)]
struct Trail {
  visited: Vec<String>,
  flagged: bool,
}

fn steps(names: &[&str]) -> Vec<StepDef<Trail>> {
  names.iter().map(|name| StepDef::required(*name)).collect()
}

fn mark(label: &'static str) -> impl Fn(ContextData<Trail>) -> HandlerFuture + Send + Sync + 'static {
  move |ctx: ContextData<Trail>| {
    Box::pin(async move {
      ctx.write().visited.push(label.to_string());
      Ok::<_, QuireError>(PipelineControl::Continue)
    })
  }
}

fn visited(ctx: &ContextData<Trail>) -> Vec<String> {
  ctx.read().visited.clone()
}

#[tokio::test]
#[serial]
async fn test_steps_run_in_declared_order() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["reserve", "price", "persist"]));
  pipeline.on_step("persist", mark("persist")).unwrap();
  pipeline.on_step("reserve", mark("reserve")).unwrap();
  pipeline.on_step("price", mark("price")).unwrap();

  let ctx = ContextData::new(Trail::default());
  let result = pipeline.run(ctx.clone()).await.unwrap();

  assert_eq!(result, PipelineResult::Completed);
  assert_eq!(visited(&ctx), vec!["reserve", "price", "persist"]);
  assert_eq!(pipeline.step_names(), vec!["reserve", "price", "persist"]);
}

#[tokio::test]
#[serial]
async fn test_stop_halts_remaining_handlers_and_steps() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["first", "gate", "last"]));
  pipeline.on_step("first", mark("first")).unwrap();
  pipeline
    .on_step("gate", |ctx: ContextData<Trail>| async move {
      ctx.write().visited.push("gate".to_string());
      Ok::<_, QuireError>(PipelineControl::Stop)
    })
    .unwrap()
    .after_step("gate", mark("after_gate"))
    .unwrap();
  pipeline.on_step("last", mark("last")).unwrap();

  let ctx = ContextData::new(Trail::default());
  let result = pipeline.run(ctx.clone()).await.unwrap();

  assert_eq!(result, PipelineResult::Stopped);
  assert_eq!(visited(&ctx), vec!["first", "gate"]);
}

#[tokio::test]
#[serial]
async fn test_handler_error_aborts_the_run() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["ok", "broken", "never"]));
  pipeline.on_step("ok", mark("ok")).unwrap();
  pipeline
    .on_step("broken", |_ctx: ContextData<Trail>| async move {
      Err::<PipelineControl, _>(QuireError::Validation("cart is empty".to_string()))
    })
    .unwrap();
  pipeline.on_step("never", mark("never")).unwrap();

  let ctx = ContextData::new(Trail::default());
  let err = pipeline.run(ctx.clone()).await.unwrap_err();

  assert!(matches!(err, QuireError::Validation(ref m) if m == "cart is empty"));
  assert_eq!(visited(&ctx), vec!["ok"]);
}

#[tokio::test]
#[serial]
async fn test_skip_condition_is_evaluated_when_the_step_is_reached() {
  setup_tracing();
  let mut pipeline = Pipeline::new(
    "trail",
    vec![
      StepDef::required("inspect"),
      StepDef::required("notify").skip_if(|ctx: &ContextData<Trail>| ctx.read().flagged),
      StepDef::required("finish"),
    ],
  );
  pipeline
    .on_step("inspect", |ctx: ContextData<Trail>| async move {
      {
        let mut trail = ctx.write();
        trail.visited.push("inspect".to_string());
        trail.flagged = true;
      }
      Ok::<_, QuireError>(PipelineControl::Continue)
    })
    .unwrap();
  pipeline.on_step("notify", mark("notify")).unwrap();
  pipeline.on_step("finish", mark("finish")).unwrap();

  let ctx = ContextData::new(Trail::default());
  pipeline.run(ctx.clone()).await.unwrap();

  assert_eq!(visited(&ctx), vec!["inspect", "finish"]);
}

#[tokio::test]
#[serial]
async fn test_set_skip_condition_on_existing_step() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["a", "b"]));
  pipeline.on_step("a", mark("a")).unwrap();
  pipeline.on_step("b", mark("b")).unwrap();
  pipeline.set_skip_condition("a", |_: &ContextData<Trail>| true).unwrap();

  let err = pipeline.set_skip_condition("zzz", |_: &ContextData<Trail>| true).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Configuration);

  let ctx = ContextData::new(Trail::default());
  pipeline.run(ctx.clone()).await.unwrap();
  assert_eq!(visited(&ctx), vec!["b"]);
}

#[tokio::test]
#[serial]
async fn test_required_step_without_handlers_fails() {
  setup_tracing();
  let pipeline = Pipeline::new("trail", steps(&["lonely"]));

  let err = pipeline.run(ContextData::new(Trail::default())).await.unwrap_err();

  match err {
    QuireError::Pipeline { step_name, message } => {
      assert_eq!(step_name, "lonely");
      assert!(message.contains("no handlers"));
    }
    other => panic!("expected pipeline error, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_optional_step_without_handlers_is_skipped() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", vec![StepDef::optional("extras"), StepDef::required("main")]);
  pipeline.on_step("main", mark("main")).unwrap();

  let ctx = ContextData::new(Trail::default());
  let result = pipeline.run(ctx.clone()).await.unwrap();

  assert_eq!(result, PipelineResult::Completed);
  assert_eq!(visited(&ctx), vec!["main"]);
}

#[tokio::test]
#[serial]
async fn test_before_on_after_run_in_phase_order() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["main"]));
  pipeline
    .after_step("main", mark("after"))
    .unwrap()
    .on_step("main", mark("on_1"))
    .unwrap()
    .before_step("main", mark("before"))
    .unwrap()
    .on_step("main", mark("on_2"))
    .unwrap();

  let ctx = ContextData::new(Trail::default());
  pipeline.run(ctx.clone()).await.unwrap();

  assert_eq!(visited(&ctx), vec!["before", "on_1", "on_2", "after"]);
}

#[tokio::test]
#[serial]
async fn test_handlers_for_unknown_steps_are_rejected() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["main"]));
  assert!(pipeline.on_step("missing", mark("x")).is_err());
  assert!(pipeline.before_step("missing", mark("x")).is_err());
  assert!(pipeline.after_step("missing", mark("x")).is_err());
}

#[tokio::test]
#[serial]
async fn test_insert_after_step_extends_a_workflow() {
  setup_tracing();
  let mut pipeline = Pipeline::new("trail", steps(&["validate", "commit"]));
  pipeline.insert_after_step("validate", StepDef::required("audit")).unwrap();
  assert_eq!(pipeline.step_names(), vec!["validate", "audit", "commit"]);

  assert!(pipeline.insert_after_step("validate", StepDef::required("commit")).is_err());
  assert!(pipeline.insert_after_step("nope", StepDef::required("other")).is_err());

  for name in ["validate", "audit", "commit"] {
    pipeline.on_step(name, mark(name)).unwrap();
  }
  let ctx = ContextData::new(Trail::default());
  pipeline.run(ctx.clone()).await.unwrap();
  assert_eq!(visited(&ctx), vec!["validate", "audit", "commit"]);
}

#[tokio::test]
#[serial]
async fn test_workflows_dispatch_by_context_type() {
  setup_tracing();
  let workflows = Workflows::new();
  assert!(!workflows.is_registered::<Trail>());

  let err = workflows.run(ContextData::new(Trail::default())).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Configuration);

  let mut pipeline = Pipeline::new("trail", steps(&["only"]));
  pipeline.on_step("only", mark("only")).unwrap();
  workflows.register(pipeline);
  assert!(workflows.is_registered::<Trail>());

  let ctx = ContextData::new(Trail::default());
  let result = workflows.run(ctx.clone()).await.unwrap();
  assert_eq!(result, PipelineResult::Completed);
  assert_eq!(ctx.into_inner().visited, vec!["only"]);
}
