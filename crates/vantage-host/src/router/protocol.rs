//! Router control-channel wire protocol
//!
//! Frames are a 4-byte big-endian length followed by a bincode payload.
//! This is the host side of the relay boundary; the handshake carries no
//! cryptography of its own (the relay link is expected to provide it).

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use vantage_core::RouterError;

/// Version of the router control protocol
pub const ROUTER_PROTOCOL_VERSION: &str = "1.0";

/// Largest accepted control frame
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Messages exchanged on the router control connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouterMessage {
    /// Host registration, sent once after connecting. An empty
    /// `host_key` asks the router to assign a fresh identity.
    HostHello {
        /// Previously assigned host key, or empty
        host_key: Vec<u8>,
        /// Control protocol version
        version: String,
    },

    /// Router's answer to the hello. `rotated_key` is present when the
    /// router replaced the host key; the host must persist it.
    HelloAck {
        /// Numeric identity by which the router knows this host
        host_id: u64,
        /// Replacement key material, if the router rotated it
        rotated_key: Option<Vec<u8>>,
    },

    /// A peer wants to reach this host; the host dials the relay
    /// endpoint and presents the secret to claim the connection.
    ConnectionOffer {
        /// Relay endpoint to dial, `address:port`
        relay_addr: String,
        /// One-time claim secret
        secret: Vec<u8>,
    },

    /// Liveness probe; no reply required
    Keepalive,
}

/// Codec for router control frames
#[derive(Debug, Default)]
pub struct RouterCodec;

impl Decoder for RouterCodec {
    type Item = RouterMessage;
    type Error = RouterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(RouterError::Protocol(format!(
                "frame of {} bytes exceeds limit",
                len
            )));
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(len);
        let message = bincode::deserialize(&payload)
            .map_err(|e| RouterError::Protocol(format!("malformed frame: {}", e)))?;
        Ok(Some(message))
    }
}

impl Encoder<RouterMessage> for RouterCodec {
    type Error = RouterError;

    fn encode(&mut self, message: RouterMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&message)
            .map_err(|e| RouterError::Protocol(format!("encode failed: {}", e)))?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RouterError::Protocol(format!(
                "frame of {} bytes exceeds limit",
                payload.len()
            )));
        }

        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
