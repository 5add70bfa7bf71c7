//! Innermost performer backed by a handler registry.
//!
//! Jobs arrive as serialized method calls; the registry maps method names
//! to executable handlers, which is the crate's single activation hook.

use super::context::PerformContext;
use super::pipeline::JobPerformer;
use crate::error::PerformError;
use anyhow::bail;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type JobHandler = Arc<
    dyn Fn(PerformContext) -> BoxFuture<'static, Result<Option<JsonValue>, PerformError>>
        + Send
        + Sync,
>;

/// Maps job method names to executable handlers.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a method name. Duplicate names are refused.
    pub fn register<F, Fut>(&mut self, method: &str, handler: F) -> anyhow::Result<()>
    where
        F: Fn(PerformContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<JsonValue>, PerformError>> + Send + 'static,
    {
        if self.handlers.contains_key(method) {
            bail!("a handler for method '{}' is already registered", method);
        }
        let handler: JobHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.handlers.insert(method.to_string(), handler);
        Ok(())
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn resolve(&self, method: &str) -> Option<&JobHandler> {
        self.handlers.get(method)
    }
}

/// Resolves and invokes the handler registered for a job's method.
pub struct CorePerformer {
    registry: JobRegistry,
}

impl CorePerformer {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JobPerformer for CorePerformer {
    async fn perform(&self, ctx: &PerformContext) -> Result<Option<JsonValue>, PerformError> {
        let method = &ctx.background_job.job.method;
        let handler = self
            .registry
            .resolve(method)
            .ok_or_else(|| PerformError::UnknownMethod(method.clone()))?;
        handler(ctx.clone()).await
    }
}
