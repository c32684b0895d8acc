use std::{borrow::Cow, time::Duration};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct TaskHandle {
    name: Cow<'static, str>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(name: impl Into<Cow<'static, str>>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn into_inner(self) -> (Cow<'static, str>, JoinHandle<()>) {
        (self.name, self.handle)
    }
}

/// Owns the long-running background tasks so shutdown can reap them in order.
#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<TaskHandle>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn push(&mut self, task: TaskHandle) {
        trace!(task = task.name(), "task registered");
        self.tasks.push(task);
    }

    /// Give each task `grace` to finish on its own, then abort stragglers.
    pub async fn shutdown_with_grace(self, grace: Duration) {
        for task in self.tasks {
            let (name, mut handle) = task.into_inner();
            if grace.is_zero() {
                handle.abort();
                if let Err(err) = handle.await {
                    debug!(task = %name, ?err, "task join after abort failed");
                }
                continue;
            }

            let sleeper = tokio::time::sleep(grace);
            tokio::pin!(sleeper);
            tokio::select! {
                res = &mut handle => {
                    if let Err(err) = res {
                        debug!(task = %name, ?err, "task exited with error");
                    }
                }
                _ = &mut sleeper => {
                    handle.abort();
                    if let Err(err) = handle.await {
                        debug!(task = %name, ?err, "task join after abort failed");
                    }
                }
            }
        }
    }
}
