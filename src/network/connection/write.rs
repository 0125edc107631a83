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

use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::{debug, error};

use super::{Connection, WireMode};
use crate::network::frame::{frame_len, MessageHeader};
use crate::network::Message;
use crate::{AppError, AppResult};

/// Writes `head` then `body`, resuming after short writes.
///
/// Progress through the header and the body is counted separately, so a short
/// write never resends bytes the peer already has. Every write call gets a
/// fresh `timeout`.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    head: &[u8],
    body: &[u8],
    timeout: Duration,
) -> AppResult<()> {
    let mut head_written = 0;
    let mut body_written = 0;

    while head_written < head.len() || body_written < body.len() {
        let in_head = head_written < head.len();
        let chunk = if in_head {
            &head[head_written..]
        } else {
            &body[body_written..]
        };
        let n = time::timeout(timeout, writer.write(chunk))
            .await
            .map_err(|_| AppError::WriteTimeout(timeout))??;
        if n == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "socket accepted no bytes").into());
        }
        if in_head {
            head_written += n;
        } else {
            body_written += n;
        }
    }

    time::timeout(timeout, writer.flush())
        .await
        .map_err(|_| AppError::WriteTimeout(timeout))??;
    Ok(())
}

impl Connection {
    pub(super) async fn write_loop(self: Arc<Self>) {
        let Some(writer) = self.take_writer() else {
            return;
        };
        self.drain_outbound(writer).await;
    }

    /// Writes queued messages to `writer` until the buffer is closed and empty.
    /// A write failure stops the connection.
    pub(super) async fn drain_outbound<W: AsyncWrite + Unpin>(&self, mut writer: W) {
        let Some(outbound_rx) = self.outbound_rx.clone() else {
            return;
        };

        // drains what is left after stop closes the buffer
        while let Ok(msg) = outbound_rx.recv().await {
            if let Err(err) = self.write_message(&mut writer, &msg).await {
                error!("connection write id:{} err:{}", self.id, err);
                self.stop();
                break;
            }
        }

        if let Err(err) = writer.shutdown().await {
            debug!("connection {} shutdown write half: {}", self.id, err);
        }
    }

    async fn write_message<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        msg: &Message,
    ) -> AppResult<()> {
        let body = msg.body_bytes();
        let head: Bytes = match self.wire_mode {
            WireMode::Framed => {
                // headerless messages get a plain header on framed connections
                let mut head = msg.head().copied().unwrap_or_else(MessageHeader::default);
                head.len = frame_len(body.len()).ok_or_else(|| {
                    AppError::MessageTooLarge(format!("body of {} bytes", body.len()))
                })?;
                head.to_bytes()
            }
            WireMode::Line => Bytes::new(),
        };
        write_frame(writer, &head, body, self.timeout()).await
    }
}
