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

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Connection, Message};

pub type MessageFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Per-message dispatch function. Returning `false` ends the inbound loop.
pub type MessageHandlerFn = Arc<dyn Fn(Arc<Connection>, Message) -> MessageFuture + Send + Sync>;

/// Application callbacks driven by every connection.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Admission gate, called once before a connection's loops start.
    async fn on_new_connection(&self, _conn: &Arc<Connection>) -> bool {
        true
    }

    /// Called exactly once, from the stop transition of `conn`.
    fn on_connection_closed(&self, _conn: &Connection) {}

    /// Default dispatch for inbound messages.
    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) -> bool;

    /// Optional override routing for a single message.
    fn handler_for(&self, _msg: &Message) -> Option<MessageHandlerFn> {
        None
    }
}

/// Lookup table from a frame's cmd/act pair to a dispatch function.
///
/// Handlers can embed one and forward [`Handler::handler_for`] to
/// [`MessageRouter::route`].
#[derive(Default)]
pub struct MessageRouter {
    routes: RwLock<HashMap<u16, MessageHandlerFn>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, cmd: u8, act: u8, f: F)
    where
        F: Fn(Arc<Connection>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let key = ((cmd as u16) << 8) | act as u16;
        let f: MessageHandlerFn = Arc::new(move |conn, msg| Box::pin(f(conn, msg)));
        self.routes.write().insert(key, f);
    }

    pub fn route(&self, msg: &Message) -> Option<MessageHandlerFn> {
        let head = msg.head()?;
        self.routes.read().get(&head.cmd_act()).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_by_cmd_act() {
        let router = MessageRouter::new();
        router.register(1, 2, |_conn, _msg| async { true });
        assert_eq!(router.len(), 1);

        assert!(router.route(&Message::with_cmd(1, 2, &b"x"[..])).is_some());
        assert!(router.route(&Message::with_cmd(2, 1, &b"x"[..])).is_none());
        // line messages have no cmd/act
        assert!(router.route(&Message::raw("1 2")).is_none());
    }
}
