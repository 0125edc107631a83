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

use bytes::BytesMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time;
use tracing::{debug, error, info};

use super::{Connection, WireMode};
use crate::network::frame::{MessageHeader, HEADER_SIZE};
use crate::network::parser::{apply_parser, ParseOutcome};
use crate::network::{Message, Parser};
use crate::{AppError, AppResult};

/// How a single bounded read ended.
#[derive(Debug, PartialEq, Eq)]
enum ReadStatus {
    Done,
    /// peer closed the stream on a message boundary
    Eof,
    /// the connection was stopped while waiting
    Stopped,
}

/// Fills `buf` completely.
///
/// Returns `Ok(false)` when the stream ends before the first byte, and a
/// `ConnectionReset` error when it ends part way through.
async fn fill_buf<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(false)
            } else {
                Err(io::Error::new(
                    ErrorKind::ConnectionReset,
                    format!("stream closed after {} of {} bytes", filled, buf.len()),
                ))
            };
        }
        filled += n;
    }
    Ok(true)
}

impl Connection {
    pub(super) async fn read_loop(self: Arc<Self>) {
        let Some(reader) = self.take_reader() else {
            return;
        };
        let mut parser = self.parser.lock().take();

        let result = match self.wire_mode {
            WireMode::Framed => {
                let mut reader = reader;
                self.read_frames(&mut reader, &mut parser).await
            }
            WireMode::Line => {
                let mut reader = BufReader::new(reader);
                self.read_lines(&mut reader, &mut parser).await
            }
        };
        if let Err(err) = result {
            error!("connection read id:{} err:{}", self.id, err);
        }
        self.stop();
    }

    /// Reads into `buf` under the current timeout, giving up early on stop.
    async fn read_exact_timed<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut [u8],
    ) -> AppResult<ReadStatus> {
        let timeout = self.timeout();
        tokio::select! {
            _ = self.stop_token.cancelled() => Ok(ReadStatus::Stopped),
            res = time::timeout(timeout, fill_buf(reader, buf)) => match res {
                Err(_) => Err(AppError::ReadTimeout(timeout)),
                Ok(Ok(true)) => Ok(ReadStatus::Done),
                Ok(Ok(false)) => Ok(ReadStatus::Eof),
                Ok(Err(e)) => Err(e.into()),
            }
        }
    }

    pub(super) async fn read_frames<R: AsyncRead + Unpin>(
        self: &Arc<Self>,
        reader: &mut R,
        parser: &mut Option<Box<dyn Parser>>,
    ) -> AppResult<()> {
        let mut head_buf = [0u8; HEADER_SIZE];
        while !self.is_stopped() {
            match self.read_exact_timed(reader, &mut head_buf).await? {
                ReadStatus::Done => {}
                ReadStatus::Eof => {
                    info!("connection read close id:{}", self.id);
                    return Ok(());
                }
                ReadStatus::Stopped => return Ok(()),
            }

            let head = MessageHeader::decode(&head_buf).ok_or_else(|| {
                AppError::MalformedProtocol(format!("bad header {:?}", head_buf))
            })?;
            if self.max_body_size > 0 && head.len > self.max_body_size {
                return Err(AppError::MessageTooLarge(format!(
                    "frame of length {} exceeds {}",
                    head.len, self.max_body_size
                )));
            }

            let msg = if head.len == 0 {
                Message::header_only(head)
            } else {
                let mut body = BytesMut::zeroed(head.len as usize);
                match self.read_exact_timed(reader, &mut body).await? {
                    ReadStatus::Done => {}
                    ReadStatus::Eof => {
                        return Err(io::Error::new(
                            ErrorKind::ConnectionReset,
                            format!("stream closed before body of {} bytes", head.len),
                        )
                        .into());
                    }
                    ReadStatus::Stopped => return Ok(()),
                }
                Message::new(head, body.freeze())
            };

            if !self.process_inbound(msg, parser).await {
                break;
            }
        }
        Ok(())
    }

    pub(super) async fn read_lines<R: AsyncBufRead + Unpin>(
        self: &Arc<Self>,
        reader: &mut R,
        parser: &mut Option<Box<dyn Parser>>,
    ) -> AppResult<()> {
        let limit = match self.max_body_size {
            0 => u64::MAX,
            max => max as u64 + 1,
        };
        let mut line = Vec::new();
        while !self.is_stopped() {
            line.clear();
            let timeout = self.timeout();
            let mut limited = (&mut *reader).take(limit);
            let n = tokio::select! {
                _ = self.stop_token.cancelled() => return Ok(()),
                res = time::timeout(timeout, limited.read_until(b'\n', &mut line)) => {
                    res.map_err(|_| AppError::ReadTimeout(timeout))??
                }
            };
            if n == 0 {
                info!("connection read close id:{}", self.id);
                return Ok(());
            }
            if line.last() != Some(&b'\n') {
                if n as u64 >= limit {
                    return Err(AppError::MessageTooLarge(format!(
                        "line longer than {} bytes",
                        self.max_body_size
                    )));
                }
                debug!(
                    "connection {} discards {} trailing bytes without delimiter",
                    self.id, n
                );
                info!("connection read close id:{}", self.id);
                return Ok(());
            }

            // records are dispatched with their delimiter
            let msg = Message::raw(std::mem::take(&mut line));
            if !self.process_inbound(msg, parser).await {
                break;
            }
        }
        Ok(())
    }

    /// Applies the parser and dispatches to the handler. Returns `false` when
    /// the inbound loop should end.
    async fn process_inbound(
        self: &Arc<Self>,
        msg: Message,
        parser: &mut Option<Box<dyn Parser>>,
    ) -> bool {
        match apply_parser(parser.as_mut(), msg, self.wire_mode) {
            ParseOutcome::Close => {
                debug!("connection {} closed by parse error", self.id);
                false
            }
            ParseOutcome::Remind(reply) => {
                if !self.send(reply).await {
                    debug!("connection {} dropped remind message", self.id);
                }
                true
            }
            ParseOutcome::Dispatch(msg) => match self.handler.handler_for(&msg) {
                Some(f) => f(self.clone(), msg).await,
                None => self.handler.on_message(self, msg).await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fill_buf_complete() {
        let mut reader: &[u8] = b"abcdef";
        let mut buf = [0u8; 4];
        assert!(fill_buf(&mut reader, &mut buf).await.unwrap());
        assert_eq!(&buf, b"abcd");
    }

    #[tokio::test]
    async fn test_fill_buf_clean_eof() {
        let mut reader: &[u8] = b"";
        let mut buf = [0u8; 4];
        assert!(!fill_buf(&mut reader, &mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn test_fill_buf_truncated() {
        let mut reader: &[u8] = b"abc";
        let mut buf = [0u8; 5];
        let err = fill_buf(&mut reader, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }
}
