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

use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::shutdown::{panic_message, ShutdownCoordinator};
use super::{AppError, AppResult, EngineConfig};
use crate::network::{
    Connection, ConnectionRegistry, Handler, Message, ParserFactory, Role, WireMode,
};

/// Read-only counters, computed when asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub task_count: usize,
    pub connection_count: usize,
}

/// Owns the connection registry and the shutdown coordinator.
///
/// Every connection keeps a handle to the engine that created it; the
/// registry keeps the connection alive until its stop transition.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: ConnectionRegistry,
    coordinator: ShutdownCoordinator,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Engine> {
        Arc::new(Engine {
            config,
            registry: ConnectionRegistry::new(),
            coordinator: ShutdownCoordinator::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn is_stopped(&self) -> bool {
        self.coordinator.is_stopped()
    }

    /// Binds `addr` and starts accepting connections in `mode`.
    ///
    /// Every accepted connection gets its own parser from `parser_factory`.
    pub async fn listen<A: ToSocketAddrs>(
        self: &Arc<Self>,
        addr: A,
        mode: WireMode,
        handler: Arc<dyn Handler>,
        parser_factory: Option<Arc<dyn ParserFactory>>,
    ) -> AppResult<Arc<Connection>> {
        if self.is_stopped() {
            return Err(AppError::ShuttingDown);
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::Accept(format!("failed to bind listener: {}", e)))?;
        let conn = Connection::new_listener(self.clone(), listener, mode, handler, parser_factory)?;
        conn.start();
        Ok(conn)
    }

    /// Dials `addr` and starts the connection if the handler admits it.
    ///
    /// A rejected connection is returned already stopped.
    pub async fn connect<A: ToSocketAddrs>(
        self: &Arc<Self>,
        addr: A,
        mode: WireMode,
        handler: Arc<dyn Handler>,
        parser_factory: Option<Arc<dyn ParserFactory>>,
    ) -> AppResult<Arc<Connection>> {
        if self.is_stopped() {
            return Err(AppError::ShuttingDown);
        }
        let timeout = self.config.network.timeout();
        let socket = time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| AppError::DetailedIoError(format!("connect timed out after {:?}", timeout)))??;
        let parser = parser_factory.map(|factory| factory.get());
        let conn = Connection::new_stream(self.clone(), socket, Role::Connect, mode, handler, parser)?;

        if conn.handler().on_new_connection(&conn).await {
            conn.start();
        } else {
            conn.stop();
        }
        Ok(conn)
    }

    pub fn connection(&self, id: u64) -> Option<Arc<Connection>> {
        self.registry.get(id)
    }

    /// Offers a message to every peer connection without waiting on full
    /// buffers. `make` may skip a connection by returning `None`.
    ///
    /// Returns the number of connections that accepted the message.
    pub fn broadcast<F>(&self, make: F) -> usize
    where
        F: Fn(&Arc<Connection>) -> Option<Message>,
    {
        self.registry
            .snapshot()
            .iter()
            .filter(|conn| conn.role() != Role::Listen)
            .filter_map(|conn| make(conn).map(|msg| conn.try_send(msg)))
            .filter(|sent| *sent)
            .count()
    }

    /// Spawns a task the global shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.coordinator.spawn(task)
    }

    /// Spawns a tracked task handed a signal that fires on global shutdown.
    /// Returns `false` once shutdown has started.
    pub fn spawn_with_cancel<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.coordinator.spawn_with_cancel(task)
    }

    /// Runs one of `conn`'s I/O loops as a tracked task.
    ///
    /// The loop runs in its own task so a panic surfaces as a `JoinError`
    /// here; it is logged and the connection stopped.
    pub(crate) fn spawn_connection_task<F>(&self, conn: Arc<Connection>, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.coordinator.spawn(async move {
            let id = conn.id();
            info!("process {} for connection:{}", name, id);
            if let Err(join_error) = tokio::spawn(task).await {
                if join_error.is_panic() {
                    let payload = join_error.into_panic();
                    error!(
                        "connection {} {} task panicked with message: {}",
                        id,
                        name,
                        panic_message(payload.as_ref())
                    );
                } else {
                    error!("connection {} {} task cancelled", id, name);
                }
                conn.stop();
            }
            info!("process {} end for connection:{}", name, id);
        });
    }

    /// Stops every connection, fires every task signal and waits for all
    /// tracked tasks to return. Calls after the first return immediately.
    ///
    /// Must not be awaited from inside a tracked task, it would wait on itself.
    pub async fn stop(&self) {
        if !self.coordinator.begin() {
            return;
        }
        for conn in self.registry.snapshot() {
            conn.stop();
        }
        self.coordinator.cancel_all();
        info!("engine stop, waiting for {} tasks", self.coordinator.task_count());
        self.coordinator.wait().await;
        info!("engine stop complete");
    }

    pub fn stats(&self) -> Stats {
        Stats {
            task_count: self.coordinator.task_count(),
            connection_count: self.registry.len(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        tracing::debug!("engine dropped");
    }
}
