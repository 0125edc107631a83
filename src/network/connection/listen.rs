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

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, error, info};

use super::{Connection, Role};

impl Connection {
    pub(super) async fn accept_loop(self: Arc<Self>) {
        let Some(listener) = self.take_listener() else {
            return;
        };

        while !self.is_stopped() {
            let accepted = tokio::select! {
                _ = self.stop_token.cancelled() => break,
                res = listener.accept() => res,
            };
            match accepted {
                Ok((socket, addr)) => {
                    debug!("listener {} accepted {}", self.id, addr);
                    let listen_conn = self.clone();
                    self.engine.spawn(async move {
                        listen_conn.admit(socket).await;
                    });
                }
                Err(err) => {
                    error!("listener {} accept error: {}", self.id, err);
                    break;
                }
            }
        }

        drop(listener);
        self.stop();
    }

    /// Builds the accepted connection and starts it if the handler admits it.
    async fn admit(&self, socket: TcpStream) {
        let parser = self.parser_factory.as_ref().map(|factory| factory.get());
        let conn = match Connection::new_stream(
            self.engine.clone(),
            socket,
            Role::Accept,
            self.wire_mode,
            self.handler.clone(),
            parser,
        ) {
            Ok(conn) => conn,
            Err(err) => {
                error!("listener {} failed to set up connection: {}", self.id, err);
                return;
            }
        };
        conn.set_timeout(self.timeout());

        info!("process accept for connection:{}", conn.id());
        if self.handler.on_new_connection(&conn).await {
            conn.start();
        } else {
            debug!("connection {} rejected by handler", conn.id());
            conn.stop();
        }
    }
}
