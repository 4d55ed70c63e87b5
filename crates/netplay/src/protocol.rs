//! Wire protocol.
//!
//! Each message is `kind: u8, frame: u32 LE, len: u32 LE, payload`. The
//! transport underneath is a reliable ordered byte stream, so framing is
//! all that is needed.

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};

/// Upper bound on a payload. A serialized console is tens of kilobytes;
/// anything near this limit is a corrupt or hostile stream.
pub const MAX_PAYLOAD: u32 = 1 << 20;

/// How many frames of local input are batched into one Input message.
pub const INPUT_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Adopt the payload as the initial checkpoint and restart.
    Reset = 1,
    /// A run of consecutive input bitmaps starting at `frame`.
    Input = 2,
    /// Graceful disconnect.
    Bye = 3,
}

impl MessageKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Reset),
            2 => Some(Self::Input),
            3 => Some(Self::Bye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub frame: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn reset(frame: u32, state: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Reset,
            frame,
            payload: state,
        }
    }

    pub fn input(start_frame: u32, buttons: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Input,
            frame: start_frame,
            payload: buttons,
        }
    }

    pub fn bye() -> Self {
        Self {
            kind: MessageKind::Bye,
            frame: 0,
            payload: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ProtocolError {
    Io(io::Error),
    UnknownKind(u8),
    Oversized(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "transport error: {err}"),
            Self::UnknownKind(kind) => write!(f, "unknown message kind {kind}"),
            Self::Oversized(len) => write!(f, "payload of {len} bytes exceeds limit"),
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Frame and send one message.
pub fn write_message(w: &mut impl Write, msg: &Message) -> Result<(), ProtocolError> {
    let mut header = [0u8; 9];
    header[0] = msg.kind as u8;
    header[1..5].copy_from_slice(&msg.frame.to_le_bytes());
    header[5..9].copy_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    w.write_all(&header)?;
    w.write_all(&msg.payload)?;
    w.flush()?;
    Ok(())
}

/// Read one message. Blocks until a full message arrives.
pub fn read_message(r: &mut impl Read) -> Result<Message, ProtocolError> {
    let mut header = [0u8; 9];
    r.read_exact(&mut header)?;

    let kind = MessageKind::from_u8(header[0]).ok_or(ProtocolError::UnknownKind(header[0]))?;
    let frame = u32::from_le_bytes(header[1..5].try_into().expect("4 bytes"));
    let len = u32::from_le_bytes(header[5..9].try_into().expect("4 bytes"));
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::Oversized(len));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(Message {
        kind,
        frame,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_kinds() {
        let messages = vec![
            Message::reset(7, vec![1, 2, 3, 4]),
            Message::input(42, vec![0x10, 0x20, 0x30]),
            Message::bye(),
        ];

        let mut wire = Vec::new();
        for msg in &messages {
            write_message(&mut wire, msg).unwrap();
        }

        let mut cursor = wire.as_slice();
        for expected in &messages {
            let got = read_message(&mut cursor).unwrap();
            assert_eq!(&got, expected);
        }
    }

    #[test]
    fn wire_layout_is_fixed() {
        let mut wire = Vec::new();
        write_message(&mut wire, &Message::input(0x0102_0304, vec![0xAB])).unwrap();
        assert_eq!(wire, vec![2, 0x04, 0x03, 0x02, 0x01, 1, 0, 0, 0, 0xAB]);
    }

    #[test]
    fn unknown_kind_rejected() {
        let wire = [9u8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            read_message(&mut wire.as_slice()),
            Err(ProtocolError::UnknownKind(9))
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut wire = vec![2u8, 0, 0, 0, 0];
        wire.extend_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        assert!(matches!(
            read_message(&mut wire.as_slice()),
            Err(ProtocolError::Oversized(_))
        ));
    }

    #[test]
    fn short_read_is_io_error() {
        let wire = [2u8, 0, 0];
        assert!(matches!(
            read_message(&mut wire.as_slice()),
            Err(ProtocolError::Io(_))
        ));
    }
}
