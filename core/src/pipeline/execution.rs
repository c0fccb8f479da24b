// quire/src/pipeline/execution.rs

use super::definition::{Handler, Pipeline};
use super::{ContextData, PipelineControl, PipelineResult};
use crate::error::{QuireError, Result};
use tracing::{event, instrument, span, Instrument, Level};

async fn run_phase<T: 'static + Send + Sync>(
  phase: &'static str,
  handlers: Option<&Vec<Handler<T>>>,
  ctx: &ContextData<T>,
) -> Result<PipelineControl> {
  for (handler_idx, handler) in handlers.into_iter().flatten().enumerate() {
    let control = handler(ctx.clone())
      .instrument(span!(Level::DEBUG, "handler", phase, handler_index = handler_idx))
      .await
      .map_err(|e| {
        event!(Level::ERROR, phase, error = %e, "Handler failed.");
        e
      })?;
    if control == PipelineControl::Stop {
      event!(Level::INFO, phase, "Workflow stopped by handler.");
      return Ok(PipelineControl::Stop);
    }
  }
  Ok(PipelineControl::Continue)
}

impl<T: 'static + Send + Sync> Pipeline<T> {
  /// Runs every step in order against `ctx`.
  ///
  /// A step whose `skip_if` holds is skipped. A step with no handlers is
  /// skipped when optional and is a configuration error otherwise.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(workflow = %self.name, context = %std::any::type_name::<T>(), num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx: ContextData<T>) -> Result<PipelineResult> {
    for (step_idx, step) in self.steps.iter().enumerate() {
      let name = step.name.as_str();
      let step_span = span!(Level::INFO, "workflow_step", step_name = name, step_index = step_idx);

      if step.skip_if.as_ref().is_some_and(|skip| skip(&ctx)) {
        event!(parent: &step_span, Level::DEBUG, "Step skipped by condition.");
        continue;
      }

      let has_handlers = [&self.before, &self.on, &self.after]
        .iter()
        .any(|phase| phase.get(name).is_some_and(|h| !h.is_empty()));
      if !has_handlers {
        if step.optional {
          event!(parent: &step_span, Level::DEBUG, "Optional step has no handlers, skipping.");
          continue;
        }
        return Err(QuireError::Pipeline {
          step_name: step.name.clone(),
          message: "required step has no handlers".to_string(),
        });
      }

      let outcome = async {
        for (phase, handlers) in [("before", &self.before), ("on", &self.on), ("after", &self.after)] {
          if run_phase(phase, handlers.get(name), &ctx).await? == PipelineControl::Stop {
            return Ok(PipelineControl::Stop);
          }
        }
        Ok::<_, QuireError>(PipelineControl::Continue)
      }
      .instrument(step_span)
      .await?;

      if outcome == PipelineControl::Stop {
        return Ok(PipelineResult::Stopped);
      }
    }
    Ok(PipelineResult::Completed)
  }
}
