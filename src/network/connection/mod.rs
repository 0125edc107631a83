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

//! A connection is the engine's message queue over one socket.
//!
//! Peer connections own a TCP stream split into a read half, driven by the
//! inbound loop, and a write half, driven by the outbound loop. The two loops
//! share nothing but the outbound buffer and the stop flag. Listener
//! connections own a listening socket and run an accept loop instead.
//!
//! # Lifecycle
//!
//! A connection is registered at construction and stays `running` until the
//! first successful call to [`Connection::stop`]. Only that call closes the
//! outbound buffer, wakes the loops, notifies the handler and removes the
//! connection from the registry; later calls do nothing.

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Handler, Message, Parser, ParserFactory};
use crate::service::Engine;
use crate::AppResult;

mod listen;
mod read;
mod write;

/// Number of messages the outbound buffer holds before `send` waits.
pub const OUTBOUND_BUFFER_SIZE: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    /// header + body frames
    #[default]
    Framed,
    /// `\n` delimited records
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// dialed by this process
    Connect,
    /// accepted by a listener
    Accept,
    Listen,
}

enum Endpoint {
    Stream {
        reader: Mutex<Option<OwnedReadHalf>>,
        writer: Mutex<Option<OwnedWriteHalf>>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    },
    Listener {
        listener: Mutex<Option<TcpListener>>,
        local_addr: SocketAddr,
    },
}

pub struct Connection {
    id: u64,
    role: Role,
    wire_mode: WireMode,
    endpoint: Endpoint,
    outbound_tx: Option<async_channel::Sender<Message>>,
    outbound_rx: Option<async_channel::Receiver<Message>>,
    stopped: AtomicBool,
    started: AtomicBool,
    stop_token: CancellationToken,
    timeout_ms: AtomicU64,
    max_body_size: u32,
    handler: Arc<dyn Handler>,
    parser: Mutex<Option<Box<dyn Parser>>>,
    parser_factory: Option<Arc<dyn ParserFactory>>,
    user: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    engine: Arc<Engine>,
}

impl Connection {
    /// Wraps a connected stream and registers it with the engine.
    pub(crate) fn new_stream(
        engine: Arc<Engine>,
        socket: TcpStream,
        role: Role,
        wire_mode: WireMode,
        handler: Arc<dyn Handler>,
        parser: Option<Box<dyn Parser>>,
    ) -> AppResult<Arc<Connection>> {
        let local_addr = socket.local_addr()?;
        let peer_addr = socket.peer_addr()?;
        let (reader, writer) = socket.into_split();
        let (outbound_tx, outbound_rx) = async_channel::bounded(OUTBOUND_BUFFER_SIZE);

        let conn = Self::build(
            engine,
            role,
            wire_mode,
            Endpoint::Stream {
                reader: Mutex::new(Some(reader)),
                writer: Mutex::new(Some(writer)),
                local_addr,
                peer_addr,
            },
            Some((outbound_tx, outbound_rx)),
            handler,
            parser,
            None,
        );
        info!("new connection id:{} from addr:{}", conn.id, peer_addr);
        Ok(conn)
    }

    pub(crate) fn new_listener(
        engine: Arc<Engine>,
        listener: TcpListener,
        wire_mode: WireMode,
        handler: Arc<dyn Handler>,
        parser_factory: Option<Arc<dyn ParserFactory>>,
    ) -> AppResult<Arc<Connection>> {
        let local_addr = listener.local_addr()?;
        let conn = Self::build(
            engine,
            Role::Listen,
            wire_mode,
            Endpoint::Listener {
                listener: Mutex::new(Some(listener)),
                local_addr,
            },
            None,
            handler,
            None,
            parser_factory,
        );
        info!("new tcp listen id:{} addr:{}", conn.id, local_addr);
        Ok(conn)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        engine: Arc<Engine>,
        role: Role,
        wire_mode: WireMode,
        endpoint: Endpoint,
        outbound: Option<(async_channel::Sender<Message>, async_channel::Receiver<Message>)>,
        handler: Arc<dyn Handler>,
        parser: Option<Box<dyn Parser>>,
        parser_factory: Option<Arc<dyn ParserFactory>>,
    ) -> Arc<Connection> {
        let network = &engine.config().network;
        let timeout_ms = network.timeout().as_millis() as u64;
        let max_body_size = network.max_body_size;
        let (outbound_tx, outbound_rx) = match outbound {
            Some((tx, rx)) => (Some(tx), Some(rx)),
            None => (None, None),
        };
        let conn = Arc::new(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            wire_mode,
            endpoint,
            outbound_tx,
            outbound_rx,
            stopped: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            timeout_ms: AtomicU64::new(timeout_ms),
            max_body_size,
            handler,
            parser: Mutex::new(parser),
            parser_factory,
            user: Mutex::new(None),
            engine,
        });
        conn.engine.registry().insert(conn.clone());
        conn
    }

    /// Spawns the inbound and outbound loops, or the accept loop of a listener.
    pub(crate) fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.endpoint {
            Endpoint::Stream { .. } => {
                let reader = self.clone();
                self.engine
                    .spawn_connection_task(self.clone(), "read", reader.read_loop());
                let writer = self.clone();
                self.engine
                    .spawn_connection_task(self.clone(), "write", writer.write_loop());
            }
            Endpoint::Listener { .. } => {
                let listener = self.clone();
                self.engine
                    .spawn_connection_task(self.clone(), "listen", listener.accept_loop());
            }
        }
    }

    /// Stops the connection. Only the first call has any effect.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(tx) = &self.outbound_tx {
            tx.close();
        }
        self.stop_token.cancel();
        match &self.endpoint {
            Endpoint::Listener { listener, .. } => {
                // the accept loop owns the socket once started and drops it on exit
                drop(listener.lock().take());
            }
            Endpoint::Stream { reader, writer, .. } => {
                if !self.started.load(Ordering::Acquire) {
                    drop(reader.lock().take());
                    drop(writer.lock().take());
                }
            }
        }

        let _deregister = Deregister(self);
        self.handler.on_connection_closed(self);
        info!("connection close id:{}", self.id);
    }

    /// Whether the connection stopped. A running connection observes the
    /// engine's shutdown flag and stops itself once it is set.
    pub fn is_stopped(&self) -> bool {
        if !self.stopped.load(Ordering::Acquire) && self.engine.is_stopped() {
            self.stop();
        }
        self.stopped.load(Ordering::Acquire)
    }

    /// Enqueues `msg` for the outbound loop, waiting while the buffer is full.
    ///
    /// Returns `false` if the connection stopped before the message was
    /// queued, or if the body is too long for a frame header.
    pub async fn send(&self, msg: Message) -> bool {
        let Some(tx) = &self.outbound_tx else {
            return false;
        };
        if self.stopped.load(Ordering::Acquire) || !self.accepts(&msg) {
            return false;
        }
        tx.send(msg).await.is_ok()
    }

    /// Enqueues `msg` only if the buffer has room.
    pub fn try_send(&self, msg: Message) -> bool {
        match &self.outbound_tx {
            Some(tx) if !self.stopped.load(Ordering::Acquire) && self.accepts(&msg) => {
                tx.try_send(msg).is_ok()
            }
            _ => false,
        }
    }

    fn accepts(&self, msg: &Message) -> bool {
        if self.wire_mode == WireMode::Framed && !msg.fits_frame() {
            error!(
                "connection {} refuses message with body of {} bytes",
                self.id,
                msg.body_bytes().len()
            );
            return false;
        }
        true
    }

    pub async fn send_str(&self, s: &str) -> bool {
        self.send(Message::raw(Bytes::copy_from_slice(s.as_bytes())))
            .await
    }

    pub async fn send_line(&self, s: &str) -> bool {
        self.send_bytes_line(s.as_bytes()).await
    }

    pub async fn send_bytes(&self, data: &[u8]) -> bool {
        self.send(Message::raw(Bytes::copy_from_slice(data))).await
    }

    pub async fn send_bytes_line(&self, data: &[u8]) -> bool {
        let mut line = Vec::with_capacity(data.len() + 1);
        line.extend_from_slice(data);
        line.push(b'\n');
        self.send(Message::raw(line)).await
    }

    /// Messages waiting in the outbound buffer.
    pub fn pending(&self) -> usize {
        self.outbound_tx.as_ref().map_or(0, |tx| tx.len())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn wire_mode(&self) -> WireMode {
        self.wire_mode
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Applies from the next read or write on.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn local_addr(&self) -> SocketAddr {
        match &self.endpoint {
            Endpoint::Stream { local_addr, .. } => *local_addr,
            Endpoint::Listener { local_addr, .. } => *local_addr,
        }
    }

    /// Peer address, `None` for listeners.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Stream { peer_addr, .. } => Some(*peer_addr),
            Endpoint::Listener { .. } => None,
        }
    }

    pub fn set_user(&self, user: Arc<dyn Any + Send + Sync>) {
        *self.user.lock() = Some(user);
    }

    pub fn user(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user.lock().clone()
    }

    pub fn user_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.user().and_then(|u| u.downcast::<T>().ok())
    }

    fn take_reader(&self) -> Option<OwnedReadHalf> {
        match &self.endpoint {
            Endpoint::Stream { reader, .. } => reader.lock().take(),
            Endpoint::Listener { .. } => None,
        }
    }

    fn take_writer(&self) -> Option<OwnedWriteHalf> {
        match &self.endpoint {
            Endpoint::Stream { writer, .. } => writer.lock().take(),
            Endpoint::Listener { .. } => None,
        }
    }

    fn take_listener(&self) -> Option<TcpListener> {
        match &self.endpoint {
            Endpoint::Listener { listener, .. } => listener.lock().take(),
            Endpoint::Stream { .. } => None,
        }
    }
}

/// Removes the connection from the registry when dropped, also while
/// unwinding from a panicking close callback.
struct Deregister<'a>(&'a Connection);

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.0.engine.registry().remove(self.0.id);
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("wire_mode", &self.wire_mode)
            .field("local_addr", &self.local_addr())
            .field("remote_addr", &self.remote_addr())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("connection {} dropped", self.id);
    }
}
