//! Outstanding-task accounting and the ordered shutdown sequence.

use crate::process::kill_processes;
use crate::session::SessionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

/// Counts monitor tasks that have started and not yet terminated.
#[derive(Clone)]
pub struct TaskTracker {
    count: Arc<watch::Sender<usize>>,
}

impl Default for TaskTracker {
    fn default() -> Self {
        let (tx, _) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a task in. The task is counted out when the guard drops.
    pub fn register(&self) -> OutstandingTask {
        self.count.send_modify(|n| *n += 1);
        OutstandingTask {
            count: self.count.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[must_use = "dropping the guard counts the task out"]
pub struct OutstandingTask {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for OutstandingTask {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Runs the shutdown sequence once:
/// cancel monitors, wait for them, cancel purchase work, close the pool,
/// kill leftover browser processes, report completion.
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    purchase_cancel: CancellationToken,
    tasks: TaskTracker,
    pool: Arc<SessionPool>,
    kill_list: Vec<String>,
    complete: CancellationToken,
    ran: Mutex<bool>,
}

impl ShutdownCoordinator {
    pub fn new(
        cancel: CancellationToken,
        purchase_cancel: CancellationToken,
        tasks: TaskTracker,
        pool: Arc<SessionPool>,
        kill_list: Vec<String>,
    ) -> Self {
        Self {
            cancel,
            purchase_cancel,
            tasks,
            pool,
            kill_list,
            complete: CancellationToken::new(),
            ran: Mutex::new(false),
        }
    }

    /// Returns once shutdown has completed. Concurrent callers wait for the
    /// first one; later callers return immediately.
    pub async fn shutdown(&self) {
        let mut ran = self.ran.lock().await;
        if *ran {
            return;
        }

        log::info!("Shutting down, cancelling {} monitor(s)", self.tasks.outstanding());
        self.cancel.cancel();

        // No upper bound: a monitor stuck in a driver call holds shutdown here.
        let idle = self.tasks.wait_idle();
        tokio::pin!(idle);
        loop {
            tokio::select! {
                _ = &mut idle => break,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    log::info!("Waiting for {} monitor(s) to stop", self.tasks.outstanding());
                }
            }
        }

        self.purchase_cancel.cancel();
        self.pool.close_all().await;

        if !self.kill_list.is_empty() {
            let names = self.kill_list.clone();
            match tokio::task::spawn_blocking(move || kill_processes(&names)).await {
                Ok(0) => {}
                Ok(killed) => log::info!("Killed {} leftover browser process(es)", killed),
                Err(e) => log::warn!("Process cleanup failed: {}", e),
            }
        }

        *ran = true;
        self.complete.cancel();
        log::info!("Shutdown complete");
    }

    pub fn is_complete(&self) -> bool {
        self.complete.is_cancelled()
    }

    /// Resolves when shutdown has completed.
    pub async fn completed(&self) {
        self.complete.cancelled().await
    }
}
