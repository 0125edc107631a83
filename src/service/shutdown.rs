// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

type CancelSignals = Arc<Mutex<HashMap<u64, CancellationToken>>>;

/// Process-wide stop flag, per-task cancellation signals and a wait group
/// over every task spawned through it.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    stopped: AtomicBool,
    next_task_id: AtomicU64,
    cancel_signals: CancelSignals,
    tracker: TaskTracker,
}

/// Removes a task's cancellation signal when the task ends, panics included.
struct CancelGuard {
    id: u64,
    signals: CancelSignals,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(token) = self.signals.lock().remove(&self.id) {
            token.cancel();
        }
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Flips the stop flag. Only the first caller gets `true`.
    pub fn begin(&self) -> bool {
        self.stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Spawns a task counted by the wait group.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.tracker.spawn(task);
        debug!("task count:{}", self.tracker.len());
        handle
    }

    /// Spawns a counted task that receives its own cancellation signal.
    ///
    /// The signal fires when shutdown begins. Returns `false` without spawning
    /// once shutdown has started.
    pub fn spawn_with_cancel<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return false;
        }
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.cancel_signals.lock().insert(id, token.clone());
        // shutdown may have drained the signals between the check and the insert
        if self.is_stopped() {
            token.cancel();
        }

        let guard = CancelGuard {
            id,
            signals: self.cancel_signals.clone(),
        };
        let fut = task(token);
        self.spawn(async move {
            let _guard = guard;
            fut.await;
        });
        true
    }

    /// Fires and forgets every registered cancellation signal.
    pub fn cancel_all(&self) {
        let signals: Vec<_> = self.cancel_signals.lock().drain().collect();
        trace!("cancel {} task signals", signals.len());
        for (_, token) in signals {
            token.cancel();
        }
    }

    /// Waits until every tracked task has returned.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Tasks currently alive.
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    pub fn signal_count(&self) -> usize {
        self.cancel_signals.lock().len()
    }
}

/// Best effort description of a panic payload. The backtrace is logged by
/// the panic hook at the point of the panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
