//! Local executor: runs a resolved function in this process under a deadline.
//!
//! Blocking handlers are moved onto tokio's blocking threads so they
//! cannot stall the async workers. A semaphore caps how many of them run
//! at once; the deadline covers the wait for a permit as well.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use dapi_core::Arguments;
use dapi_marshal::Function;

use crate::error::{DapiError, DapiResult};

#[derive(Clone)]
pub struct LocalExecutor {
    permits: Arc<Semaphore>,
}

impl LocalExecutor {
    pub fn new(max_blocking_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_blocking_workers.max(1))),
        }
    }

    /// Blocking slots currently free.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `function` with `arguments`.
    ///
    /// The handler's own kind picks the path: async handlers are awaited in
    /// place, blocking ones always run on a blocking thread, whatever the
    /// caller's `is_async` flag says. `deadline: None`
    /// waits indefinitely. On expiry the caller gets [`DapiError::Timeout`];
    /// a blocking handler that already started keeps its thread and permit
    /// until it returns.
    pub async fn run(
        &self,
        function: &Function,
        arguments: Arguments,
        deadline: Option<Duration>,
    ) -> DapiResult<Value> {
        let task = self.dispatch(function, arguments);
        match deadline {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| DapiError::Timeout(limit))?,
            None => task.await,
        }
    }

    async fn dispatch(
        &self,
        function: &Function,
        arguments: Arguments,
    ) -> DapiResult<Value> {
        if !function.is_blocking() {
            return Ok(function.call(arguments).await?);
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| DapiError::Internal(format!("blocking pool closed: {e}")))?;

        let function = function.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            debug!(function = %function.reference(), "running blocking handler");
            function.call_blocking(arguments)
        });

        let result = handle
            .await
            .map_err(|e| DapiError::Internal(format!("local handler failed: {e}")))?;
        Ok(result?)
    }
}
