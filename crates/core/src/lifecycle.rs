//! Background executor tracking and crash recovery.
//!
//! The manager owns the `pipeline_id → task` map. Executor tasks remove
//! their own entry when they finish; an abort cancels the task and then
//! runs the runner's abort bookkeeping. At process start, `recover` finds
//! every pipeline the last process left active and re-dispatches it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::runner::PipelineRunner;
use crate::store::Store;

/// How a dispatch should enter the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Fresh run from step 0.
    Fresh,

    /// Continue from the first incomplete step.
    Resume,
}

/// Tracks the background executor task of every live pipeline.
pub struct LifecycleManager {
    store: Arc<Store>,
    runner: Arc<PipelineRunner>,
    tasks: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<Store>, runner: Arc<PipelineRunner>) -> Self {
        Self {
            store,
            runner,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the executor task for a pipeline and register it.
    ///
    /// The task removes its own registration when it completes. An error
    /// escaping the executor body is the catch-all path: the pipeline is
    /// marked failed so it can never be stranded in `running`.
    pub fn dispatch(&self, pipeline_id: i64, mode: DispatchMode) {
        let store = Arc::clone(&self.store);
        let runner = Arc::clone(&self.runner);
        let tasks = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            let result = match mode {
                DispatchMode::Fresh => runner.run(pipeline_id).await,
                DispatchMode::Resume => runner.resume(pipeline_id).await,
            };

            if let Err(executor_error) = result {
                error!(pipeline = pipeline_id, error = %executor_error, "executor error");
                let failed = store
                    .fail_pipeline(
                        pipeline_id,
                        Some(json!({
                            "error": executor_error.to_string(),
                            "source": "executor",
                        })),
                    )
                    .await;
                if let Err(store_error) = failed {
                    error!(
                        pipeline = pipeline_id,
                        error = %store_error,
                        "could not mark pipeline failed after executor error"
                    );
                }
            }

            lock_tasks(&tasks).remove(&pipeline_id);
        });

        self.lock().insert(pipeline_id, handle);
    }

    /// Whether an executor task is currently registered for the pipeline.
    pub fn is_tracked(&self, pipeline_id: i64) -> bool {
        self.lock().contains_key(&pipeline_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().len()
    }

    /// Cancel a pipeline's executor and run the abort bookkeeping.
    ///
    /// Cancelling first guarantees the executor cannot race the row updates;
    /// the runner then aborts the live agent session (if any) and marks the
    /// interrupted step and the pipeline failed.
    pub async fn abort(&self, pipeline_id: i64) -> Result<(), CoreError> {
        let handle = self.lock().remove(&pipeline_id);
        if let Some(handle) = handle {
            handle.abort();
            if let Err(join_error) = handle.await {
                if !join_error.is_cancelled() {
                    warn!(pipeline = pipeline_id, error = %join_error, "executor ended abnormally");
                }
            }
        }

        self.runner.finalize_abort(pipeline_id).await
    }

    /// Re-dispatch every pipeline the previous process left active.
    ///
    /// Returns the number of pipelines recovered.
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let interrupted = self.store.active_pipelines().await?;
        let count = interrupted.len();

        for pipeline in interrupted {
            info!(
                pipeline = pipeline.id,
                status = pipeline.status.as_str(),
                "recovering interrupted pipeline"
            );
            self.dispatch(pipeline.id, DispatchMode::Resume);
        }

        if count > 0 {
            info!(count, "recovery dispatched");
        }
        Ok(count)
    }

    /// Cancel all tracked executors and await them.
    ///
    /// No row updates happen here: interrupted pipelines keep their active
    /// status and are picked up by the next process's `recover`.
    pub async fn shutdown(&self) {
        let handles: Vec<(i64, JoinHandle<()>)> = self.lock().drain().collect();
        for (pipeline_id, handle) in handles {
            handle.abort();
            if let Err(join_error) = handle.await {
                if !join_error.is_cancelled() {
                    warn!(pipeline = pipeline_id, error = %join_error, "executor ended abnormally");
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, JoinHandle<()>>> {
        lock_tasks(&self.tasks)
    }
}

fn lock_tasks(
    tasks: &Mutex<HashMap<i64, JoinHandle<()>>>,
) -> std::sync::MutexGuard<'_, HashMap<i64, JoinHandle<()>>> {
    match tasks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
