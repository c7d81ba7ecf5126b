//! Streaming response bodies.
//!
//! A `BodyWriter` is an append-only byte sink whose flushes are chunk
//! boundaries; dropping it writes the chunked terminator. The bytes land in
//! the connection's output buffer through a `ChunkSink` and are pushed to
//! the socket by the connection's write loop.

use std::io;
use std::io::Write;
use std::rc::Rc;

/// Where committed response bytes go.
///
/// The connection implements this over its buffered write half; tests
/// implement it over a plain vector.
pub trait ChunkSink {
    fn send(&self, data: &[u8]) -> bool;
}

const FLUSH_THRESHOLD: usize = 4096;

/// Streaming body writer obtained from `Context::body_stream`.
///
/// With chunked transfer-encoding every flushed block becomes one
/// `hex(len) CRLF block CRLF` chunk and dropping the writer emits the
/// `0 CRLF CRLF` terminator; without it blocks are passed through as-is.
pub struct BodyWriter {
    chunked: bool,
    sink: Rc<ChunkSink>,
    buffer: Vec<u8>,
}

impl BodyWriter {
    pub fn new(chunked: bool, sink: Rc<ChunkSink>) -> BodyWriter {
        BodyWriter {
            chunked: chunked,
            sink: sink,
            buffer: Vec::new(),
        }
    }

    fn flush_block(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if self.chunked {
            let mut framed =
                Vec::with_capacity(self.buffer.len() + 16);
            write!(framed, "{:x}\r\n", self.buffer.len()).unwrap();
            framed.extend_from_slice(&self.buffer);
            framed.extend_from_slice(b"\r\n");
            self.sink.send(&framed);
        } else {
            self.sink.send(&self.buffer);
        }
        self.buffer.clear();
    }
}

impl io::Write for BodyWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush_block();
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_block();
        Ok(())
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        self.flush_block();
        if self.chunked {
            self.sink.send(b"0\r\n\r\n");
        }
    }
}
