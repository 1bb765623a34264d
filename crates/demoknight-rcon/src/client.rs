//! Single-connection async RCON client.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{RconError, RconResult};
use crate::packet::{PacketKind, RconPacket, decode_packet, encode_packet};

/// Id the server puts in an auth response when the password is wrong.
const AUTH_REJECTED_ID: i32 = -1;
const READ_CHUNK: usize = 4096;

/// An authenticated connection to a Source-style remote console.
///
/// One client executes one command at a time. Callers that want a fresh
/// connection per command simply drop the client and connect again.
#[derive(Debug)]
pub struct RconClient {
    stream: TcpStream,
    buf: Vec<u8>,
    next_id: i32,
    timeout: Duration,
}

impl RconClient {
    /// Open a TCP connection and authenticate.
    ///
    /// `timeout` bounds the connect, the handshake, and later every
    /// [`run`](Self::run) call individually.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection cannot be established,
    /// [`RconError::AuthRejected`] if the password is wrong, or
    /// [`RconError::Timeout`] if any step exceeds `timeout`.
    pub async fn connect(addr: SocketAddr, password: &str, timeout: Duration) -> RconResult<Self> {
        let stream = with_timeout(timeout, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
            next_id: 1,
            timeout,
        };
        with_timeout(timeout, client.authenticate(password)).await??;
        debug!(%addr, "RCON session authenticated");
        Ok(client)
    }

    /// Execute one console command and return its concatenated response text.
    ///
    /// Commands that print nothing return an empty string.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the exchange fails or exceeds the timeout.
    pub async fn run(&mut self, command: &str) -> RconResult<String> {
        let limit = self.timeout;
        with_timeout(limit, self.exchange(command)).await?
    }

    /// Shut the write half down so the server sees an orderly close.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the shutdown fails.
    pub async fn close(mut self) -> RconResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn authenticate(&mut self, password: &str) -> RconResult<()> {
        let id = self.allocate_id();
        self.send(&RconPacket::new(id, PacketKind::Auth, password))
            .await?;

        loop {
            let packet = self.read_packet().await?;
            match packet.kind {
                // Source sends an empty RESPONSE_VALUE ahead of the verdict.
                PacketKind::ResponseValue => continue,
                PacketKind::AuthResponseOrExec if packet.id == AUTH_REJECTED_ID => {
                    return Err(RconError::AuthRejected);
                }
                PacketKind::AuthResponseOrExec => return Ok(()),
                other => {
                    return Err(RconError::protocol(format!(
                        "unexpected packet type {} during auth",
                        other.to_raw()
                    )));
                }
            }
        }
    }

    async fn exchange(&mut self, command: &str) -> RconResult<String> {
        let id = self.allocate_id();
        self.send(&RconPacket::new(id, PacketKind::AuthResponseOrExec, command))
            .await?;

        // An empty RESPONSE_VALUE is mirrored back only after every fragment
        // of the real response, which marks the end of a multi-packet reply.
        let sentinel = self.allocate_id();
        self.send(&RconPacket::new(sentinel, PacketKind::ResponseValue, ""))
            .await?;

        let mut response = String::new();
        loop {
            let packet = self.read_packet().await?;
            if packet.id == sentinel {
                break;
            }
            if packet.id == id && packet.kind == PacketKind::ResponseValue {
                response.push_str(&packet.body);
            } else {
                trace!(id = packet.id, "ignoring stray RCON packet");
            }
        }
        Ok(response)
    }

    async fn send(&mut self, packet: &RconPacket) -> RconResult<()> {
        let bytes = encode_packet(packet)?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> RconResult<RconPacket> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((packet, used)) = decode_packet(&self.buf)? {
                self.buf.drain(..used);
                return Ok(packet);
            }

            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(RconError::EmptyResponse);
            }
            self.buf.extend_from_slice(chunk.get(..read).unwrap_or_default());
        }
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = match self.next_id.checked_add(1) {
            Some(next) => next,
            None => 1,
        };
        id
    }
}

async fn with_timeout<F, T>(limit: Duration, fut: F) -> RconResult<T>
where
    F: std::future::Future<Output = T>,
{
    timeout(limit, fut)
        .await
        .map_err(|elapsed| {
            trace!(%elapsed, "RCON deadline hit");
            RconError::Timeout(limit)
        })
}
