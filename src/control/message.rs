//! Control message vocabulary and frame codec.
//!
//! A frame is one datagram on the control socket:
//!
//! ```text
//! ┌──────────────────┬──────────────────────┬─────────────────────────┐
//! │ header len (u32) │ JSON header          │ prelude bytes (raw)     │
//! │ big-endian       │ {"type": ..., ...}   │ CONNECTION only         │
//! └──────────────────┴──────────────────────┴─────────────────────────┘
//! ```
//!
//! The live socket of a `CONNECTION` travels next to the frame as
//! `SCM_RIGHTS` ancillary data; see [`super::channel`].

use serde::{Deserialize, Serialize};

use crate::control::ControlError;
use crate::net::connection::ConnectionId;

/// Largest frame accepted on the control channel.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

const LEN_PREFIX: usize = 4;

/// Messages exchanged between the master and a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// worker → master: the process is up and wants to be started.
    Register,
    /// master → worker: run the server factory.
    Startup,
    /// worker → master: the server is bound and listening.
    Ready,
    /// master → worker: a live socket plus the bytes already read from it.
    Connection {
        connection_id: ConnectionId,
        prelude: Vec<u8>,
    },
    /// worker → master: a handed-off socket was closed.
    SocketClose { connection_id: ConnectionId },
}

impl ControlMessage {
    /// Wire tag of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Register => "REGISTER",
            ControlMessage::Startup => "STARTUP",
            ControlMessage::Ready => "READY",
            ControlMessage::Connection { .. } => "CONNECTION",
            ControlMessage::SocketClose { .. } => "SOCKET_CLOSE",
        }
    }
}

/// JSON part of a frame. The prelude is carried raw after it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Header {
    Register,
    Startup,
    Ready,
    Connection {
        connection_id: ConnectionId,
        prelude_len: usize,
    },
    SocketClose {
        connection_id: ConnectionId,
    },
}

/// Encode a message into a single frame.
pub fn encode(message: &ControlMessage) -> Result<Vec<u8>, ControlError> {
    let (header, prelude): (Header, &[u8]) = match message {
        ControlMessage::Register => (Header::Register, &[]),
        ControlMessage::Startup => (Header::Startup, &[]),
        ControlMessage::Ready => (Header::Ready, &[]),
        ControlMessage::Connection {
            connection_id,
            prelude,
        } => (
            Header::Connection {
                connection_id: *connection_id,
                prelude_len: prelude.len(),
            },
            prelude.as_slice(),
        ),
        ControlMessage::SocketClose { connection_id } => (
            Header::SocketClose {
                connection_id: *connection_id,
            },
            &[],
        ),
    };

    let json = serde_json::to_vec(&header)?;
    let total = LEN_PREFIX + json.len() + prelude.len();
    if total > MAX_FRAME_LEN {
        return Err(ControlError::FrameTooLarge(total));
    }

    let header_len = u32::try_from(json.len()).map_err(|_| ControlError::FrameTooLarge(total))?;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&header_len.to_be_bytes());
    frame.extend_from_slice(&json);
    frame.extend_from_slice(prelude);
    Ok(frame)
}

/// Decode a single frame.
pub fn decode(frame: &[u8]) -> Result<ControlMessage, ControlError> {
    if frame.len() < LEN_PREFIX {
        return Err(ControlError::Malformed("frame shorter than length prefix"));
    }
    let (prefix, rest) = frame.split_at(LEN_PREFIX);
    let header_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if header_len > rest.len() {
        return Err(ControlError::Malformed("header length exceeds frame"));
    }
    let (json, trailer) = rest.split_at(header_len);
    let header: Header = serde_json::from_slice(json)?;

    let expect_empty = |message: ControlMessage| {
        if trailer.is_empty() {
            Ok(message)
        } else {
            Err(ControlError::Malformed("unexpected trailing bytes"))
        }
    };

    match header {
        Header::Register => expect_empty(ControlMessage::Register),
        Header::Startup => expect_empty(ControlMessage::Startup),
        Header::Ready => expect_empty(ControlMessage::Ready),
        Header::SocketClose { connection_id } => {
            expect_empty(ControlMessage::SocketClose { connection_id })
        }
        Header::Connection {
            connection_id,
            prelude_len,
        } => {
            if prelude_len != trailer.len() {
                return Err(ControlError::Malformed("prelude length mismatch"));
            }
            Ok(ControlMessage::Connection {
                connection_id,
                prelude: trailer.to_vec(),
            })
        }
    }
}
