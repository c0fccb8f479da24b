// quire/src/pipeline/definition.rs

use super::{ContextData, PipelineControl, StepDef};
use crate::error::{QuireError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<PipelineControl>> + Send>>;

/// A step handler. Receives a clone of the shared context handle.
pub type Handler<T> = Box<dyn Fn(ContextData<T>) -> HandlerFuture + Send + Sync>;

/// An ordered list of named steps over a context type `T`, each with
/// `before`, `on` and `after` handlers.
pub struct Pipeline<T: 'static + Send + Sync> {
  pub(crate) name: String,
  pub(crate) steps: Vec<StepDef<T>>,
  pub(crate) before: HashMap<String, Vec<Handler<T>>>,
  pub(crate) on: HashMap<String, Vec<Handler<T>>>,
  pub(crate) after: HashMap<String, Vec<Handler<T>>>,
}

impl<T: 'static + Send + Sync> Pipeline<T> {
  pub fn new(name: impl Into<String>, steps: Vec<StepDef<T>>) -> Self {
    Self {
      name: name.into(),
      steps,
      before: HashMap::new(),
      on: HashMap::new(),
      after: HashMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  pub(crate) fn ensure_step_exists(&self, step_name: &str) -> Result<()> {
    if self.steps.iter().any(|s| s.name == step_name) {
      Ok(())
    } else {
      Err(QuireError::Pipeline {
        step_name: step_name.to_string(),
        message: format!("no such step in workflow '{}'", self.name),
      })
    }
  }

  /// Adds a step right after `existing`. Lets callers extend a built-in
  /// workflow (an audit step, an extra notification).
  pub fn insert_after_step(&mut self, existing: &str, step: StepDef<T>) -> Result<()> {
    self.ensure_step_exists(existing)?;
    if self.ensure_step_exists(&step.name).is_ok() {
      return Err(QuireError::Pipeline {
        step_name: step.name,
        message: "step already defined".to_string(),
      });
    }
    let idx = self.steps.iter().position(|s| s.name == existing).unwrap_or(self.steps.len() - 1);
    self.steps.insert(idx + 1, step);
    Ok(())
  }

  pub fn set_skip_condition(
    &mut self,
    step_name: &str,
    condition: impl Fn(&ContextData<T>) -> bool + Send + Sync + 'static,
  ) -> Result<()> {
    self.ensure_step_exists(step_name)?;
    if let Some(step) = self.steps.iter_mut().find(|s| s.name == step_name) {
      step.skip_if = Some(std::sync::Arc::new(condition));
    }
    Ok(())
  }
}
