// quire/src/pipeline/registry.rs

use super::{ContextData, Pipeline, PipelineResult};
use crate::error::{QuireError, Result};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Workflows keyed by their context type. Running with a `ContextData<T>`
/// picks the pipeline registered for `T`.
#[derive(Default)]
pub struct Workflows {
  pipelines: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Workflows {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `pipeline`, replacing any previous one for the same context type.
  pub fn register<T: 'static + Send + Sync>(&self, pipeline: Pipeline<T>) {
    tracing::debug!(workflow = %pipeline.name(), context = %std::any::type_name::<T>(), "Registering workflow");
    self
      .pipelines
      .write()
      .insert(TypeId::of::<T>(), Arc::new(pipeline) as Arc<dyn Any + Send + Sync>);
  }

  pub fn is_registered<T: 'static + Send + Sync>(&self) -> bool {
    self.pipelines.read().contains_key(&TypeId::of::<T>())
  }

  pub async fn run<T: 'static + Send + Sync>(&self, ctx: ContextData<T>) -> Result<PipelineResult> {
    let erased = self.pipelines.read().get(&TypeId::of::<T>()).cloned();
    let pipeline = erased
      .ok_or_else(|| QuireError::Pipeline {
        step_name: "registry".to_string(),
        message: format!("no workflow registered for {}", std::any::type_name::<T>()),
      })?
      .downcast::<Pipeline<T>>()
      .map_err(|_| QuireError::Internal(format!("workflow type mismatch for {}", std::any::type_name::<T>())))?;
    pipeline.run(ctx).await
  }
}
