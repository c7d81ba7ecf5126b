//! Websocket frame codec (RFC 6455).
//!
//! The reader waits for a whole frame in the input buffer, unmasks it and
//! reassembles fragmented messages; the writer emits unmasked
//! server-to-client frames with 7/16/64-bit length encoding.

use byteorder::{BigEndian, ByteOrder};
use netbuf::Buf;

quick_error! {
    /// Websocket protocol violation; fatal for the connection.
    #[derive(Debug)]
    pub enum FrameError {
        InvalidOpcode(code: u8) {
            description("opcode of the frame is invalid")
            display("opcode of the frame is invalid: {}", code)
        }
        ControlFragmented {
            description("control frame must not be fragmented")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Opcode> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn bits(&self) -> u8 {
        match *self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(*self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// An outbound frame as queued by `WebSocket::send`.
#[derive(Debug, Clone)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl WsFrame {
    pub fn close() -> WsFrame {
        WsFrame {
            fin: true,
            opcode: Opcode::Close,
            payload: Vec::new(),
        }
    }

    pub fn pong(payload: Vec<u8>) -> WsFrame {
        WsFrame {
            fin: true,
            opcode: Opcode::Pong,
            payload: payload,
        }
    }
}

/// One complete inbound frame, already unmasked.
#[derive(Debug, PartialEq)]
struct RawFrame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

/// Tries to take one complete frame off the buffer.
///
/// Returns `None` until the whole frame (header, mask, payload) is
/// buffered; on success the frame bytes are consumed.
fn parse_frame(buf: &mut Buf) -> Result<Option<RawFrame>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let (length, header_len) = match buf[1] & 0x7f {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (BigEndian::read_u16(&buf[2..4]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            (BigEndian::read_u64(&buf[2..10]), 10)
        }
        length => (length as u64, 2),
    };
    let masked = buf[1] & 0x80 != 0;
    let start = header_len + if masked { 4 } else { 0 };
    let length = length as usize;
    if buf.len() < start + length {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = match Opcode::from_bits(buf[0] & 0x0f) {
        Some(opcode) => opcode,
        None => return Err(FrameError::InvalidOpcode(buf[0] & 0x0f)),
    };
    if opcode.is_control() && !fin {
        return Err(FrameError::ControlFragmented);
    }
    let mut payload = buf[start..start + length].to_vec();
    if masked {
        let mask = [buf[start - 4], buf[start - 3],
                    buf[start - 2], buf[start - 1]];
        for (idx, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[idx % 4];
        }
    }
    buf.consume(start + length);
    Ok(Some(RawFrame {
        fin: fin,
        opcode: opcode,
        payload: payload,
    }))
}

/// Complete events surfaced to the connection.
#[derive(Debug, PartialEq)]
pub enum WsEvent {
    /// A full (possibly reassembled) data message.
    Message(Vec<u8>),
    Ping(Vec<u8>),
    Pong,
    Close,
}

/// Inbound frame state: reassembles continuation frames into messages.
#[derive(Debug, Default)]
pub struct WsReader {
    assembly: Vec<u8>,
    in_fragments: bool,
}

impl WsReader {
    pub fn new() -> WsReader {
        WsReader::default()
    }

    /// Consumes as many buffered bytes as form one event.
    ///
    /// Control frames may interleave with a fragmented message; their
    /// payloads do not touch the reassembly buffer.
    pub fn next_event(&mut self, buf: &mut Buf)
        -> Result<Option<WsEvent>, FrameError>
    {
        loop {
            let frame = match parse_frame(buf)? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            trace!("websocket frame {:?} fin={} len={}",
                frame.opcode, frame.fin, frame.payload.len());
            match frame.opcode {
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    if frame.opcode == Opcode::Continuation
                        || self.in_fragments
                    {
                        self.assembly.extend_from_slice(&frame.payload);
                    } else {
                        self.assembly = frame.payload;
                    }
                    if frame.fin {
                        self.in_fragments = false;
                        let message = ::std::mem::replace(
                            &mut self.assembly, Vec::new());
                        return Ok(Some(WsEvent::Message(message)));
                    }
                    self.in_fragments = true;
                }
                Opcode::Ping => {
                    return Ok(Some(WsEvent::Ping(frame.payload)));
                }
                Opcode::Pong => return Ok(Some(WsEvent::Pong)),
                Opcode::Close => return Ok(Some(WsEvent::Close)),
            }
        }
    }
}

/// Writes one unmasked server-to-client frame.
pub fn write_frame(buf: &mut Buf, frame: &WsFrame) {
    let first = frame.opcode.bits() | if frame.fin { 0x80 } else { 0 };
    match frame.payload.len() {
        len @ 0...125 => {
            buf.extend(&[first, len as u8]);
        }
        len @ 126...65535 => {
            buf.extend(&[first, 126,
                (len >> 8) as u8, (len & 0xff) as u8]);
        }
        len => {
            buf.extend(&[first, 127,
                ((len >> 56) & 0xff) as u8,
                ((len >> 48) & 0xff) as u8,
                ((len >> 40) & 0xff) as u8,
                ((len >> 32) & 0xff) as u8,
                ((len >> 24) & 0xff) as u8,
                ((len >> 16) & 0xff) as u8,
                ((len >> 8) & 0xff) as u8,
                (len & 0xff) as u8]);
        }
    }
    buf.extend(&frame.payload);
}
