//! Connection admission
//!
//! Both ingress paths (direct listener accept and relayed connections
//! delivered by the router client) pass through [`admit`], which applies
//! identical socket preconditions and then discards the origin tag. No
//! code past this point may distinguish how a connection arrived.

use std::io;
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;

/// Read-buffer capacity applied to every admitted connection
pub const READ_BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// An unauthenticated inbound connection, tagged with its origin
#[derive(Debug)]
pub enum Ingress {
    /// Accepted by this host's own listener
    Direct(TcpStream),
    /// Delivered by the router client through the relay
    Relayed(TcpStream),
}

impl Ingress {
    fn origin(&self) -> &'static str {
        match self {
            Ingress::Direct(_) => "direct",
            Ingress::Relayed(_) => "relay",
        }
    }
}

/// Apply uniform preconditions and strip the origin tag.
///
/// The returned channel has no-delay enabled and a bounded read buffer;
/// it carries no trace of which path it arrived on.
pub fn admit(ingress: Ingress) -> io::Result<IngressChannel> {
    info!(origin = ingress.origin(), "new connection");

    let stream = match ingress {
        Ingress::Direct(stream) | Ingress::Relayed(stream) => stream,
    };
    stream.set_nodelay(true)?;

    Ok(IngressChannel {
        stream,
        buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
    })
}

/// An admitted, still unauthenticated channel.
///
/// Owned by exactly one consumer at a time: the authentication
/// coordinator during the handshake, then the live session.
#[derive(Debug)]
pub struct IngressChannel {
    stream: TcpStream,
    buffer: BytesMut,
}

impl IngressChannel {
    /// Capacity of the bounded read buffer
    pub fn read_buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Whether no-delay is set on the underlying socket
    pub fn nodelay(&self) -> io::Result<bool> {
        self.stream.nodelay()
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Read one length-prefixed frame.
    ///
    /// Returns `None` on a clean EOF before any frame byte. Frames
    /// larger than the read-buffer capacity are rejected.
    pub async fn read_frame(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if self.buffer.len() >= 4 {
                let mut len_bytes = [0u8; 4];
                len_bytes.copy_from_slice(&self.buffer[..4]);
                let len = u32::from_be_bytes(len_bytes) as usize;

                if len > READ_BUFFER_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame of {} bytes exceeds read buffer", len),
                    ));
                }

                if self.buffer.len() >= 4 + len {
                    self.buffer.advance(4);
                    return Ok(Some(self.buffer.split_to(len).freeze()));
                }
            }

            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }

    /// Write one length-prefixed frame
    pub async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut head = BytesMut::with_capacity(4);
        head.put_u32(payload.len() as u32);
        self.stream.write_all(&head).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }
}
