// quire/src/pipeline/hooks.rs

use super::definition::{Handler, Pipeline};
use super::{ContextData, PipelineControl};
use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;

fn boxed<T, F>(handler_fn: impl Fn(ContextData<T>) -> F + Send + Sync + 'static) -> Handler<T>
where
  T: 'static + Send + Sync,
  F: Future<Output = Result<PipelineControl>> + Send + 'static,
{
  Box::new(move |ctx| Box::pin(handler_fn(ctx)))
}

fn push<T: 'static + Send + Sync>(phase: &mut HashMap<String, Vec<Handler<T>>>, step_name: &str, handler: Handler<T>) {
  phase.entry(step_name.to_string()).or_default().push(handler);
}

impl<T: 'static + Send + Sync> Pipeline<T> {
  pub fn before_step<F>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<T>) -> F + Send + Sync + 'static,
  ) -> Result<&mut Self>
  where
    F: Future<Output = Result<PipelineControl>> + Send + 'static,
  {
    self.ensure_step_exists(step_name)?;
    push(&mut self.before, step_name, boxed(handler_fn));
    Ok(self)
  }

  pub fn on_step<F>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<T>) -> F + Send + Sync + 'static,
  ) -> Result<&mut Self>
  where
    F: Future<Output = Result<PipelineControl>> + Send + 'static,
  {
    self.ensure_step_exists(step_name)?;
    push(&mut self.on, step_name, boxed(handler_fn));
    Ok(self)
  }

  pub fn after_step<F>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<T>) -> F + Send + Sync + 'static,
  ) -> Result<&mut Self>
  where
    F: Future<Output = Result<PipelineControl>> + Send + 'static,
  {
    self.ensure_step_exists(step_name)?;
    push(&mut self.after, step_name, boxed(handler_fn));
    Ok(self)
  }
}
