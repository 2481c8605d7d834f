//! Async TCP connection to a cache-engine instance.
//!
//! Sends commands as RESP arrays of bulk strings and reads back parsed
//! frames.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use dbrelay_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::precheck::SizeProbe;
use crate::error::BackendError;
use crate::request::split_host_port;

/// A TCP connection with read/write buffering.
pub struct RedisConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl RedisConnection {
    /// Opens a TCP connection to `address` within `connect_timeout`.
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let (host, port) = split_host_port(address)
            .ok_or_else(|| BackendError::InvalidAddress(address.to_string()))?;

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| BackendError::ConnectTimeout {
                address: address.to_string(),
                timeout: connect_timeout,
            })?
            .map_err(|e| BackendError::connect(address, e))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        })
    }

    /// Sends a command and returns the raw reply, error replies included.
    pub async fn send_command<S: AsRef<str>>(&mut self, args: &[S]) -> Result<Frame, BackendError> {
        self.write_buf.clear();
        Frame::command(args).serialize(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.read_response().await
    }

    /// Like [`send_command`](Self::send_command), but error replies
    /// become [`BackendError::Server`].
    pub async fn call<S: AsRef<str>>(&mut self, args: &[S]) -> Result<Frame, BackendError> {
        match self.send_command(args).await? {
            Frame::Error(e) => Err(BackendError::Server(e)),
            frame => Ok(frame),
        }
    }

    /// Authenticates with `AUTH [user] password`.
    pub async fn authenticate(&mut self, user: &str, password: &str) -> Result<(), BackendError> {
        let reply = if user.is_empty() {
            self.call(&["AUTH", password]).await?
        } else {
            self.call(&["AUTH", user, password]).await?
        };
        expect_ok("AUTH", reply)
    }

    pub async fn select(&mut self, db: u32) -> Result<(), BackendError> {
        let db = db.to_string();
        let reply = self.call(&["SELECT", db.as_str()]).await?;
        expect_ok("SELECT", reply)
    }

    /// Shuts down the write half so the server sees a clean close.
    pub async fn shutdown(&mut self) -> Result<(), BackendError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Frame, BackendError> {
        loop {
            if !self.read_buf.is_empty() {
                if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                    let _ = self.read_buf.split_to(consumed);
                    return Ok(frame);
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(BackendError::Disconnected);
            }
        }
    }
}

fn expect_ok(command: &str, reply: Frame) -> Result<(), BackendError> {
    match reply {
        Frame::Simple(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        other => Err(BackendError::UnexpectedReply(format!(
            "{command} returned {other:?}"
        ))),
    }
}

#[async_trait]
impl SizeProbe for RedisConnection {
    async fn integer(&mut self, args: &[&str]) -> Result<i64, BackendError> {
        match self.call(args).await? {
            Frame::Integer(n) => Ok(n),
            other => Err(BackendError::UnexpectedReply(format!(
                "{} returned {other:?}, expected an integer",
                args.first().copied().unwrap_or_default()
            ))),
        }
    }
}
