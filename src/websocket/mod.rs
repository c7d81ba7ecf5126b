//! Websocket support: the per-connection handle, event subscribers and
//! the broadcast endpoint.

pub mod frame;
mod server;

pub use self::frame::{FrameError, Opcode, WsEvent, WsFrame, WsReader};
pub use self::server::WsServer;

use std::sync::Mutex;

use futures::sync::mpsc::UnboundedSender;

/// Options for `WebSocket::send`.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// FIN bit of the emitted frame; clear it to start a fragmented
    /// message.
    pub fin: bool,
    /// Send a binary frame instead of a text frame.
    pub binary: bool,
}

impl Default for SendOptions {
    fn default() -> SendOptions {
        SendOptions { fin: true, binary: false }
    }
}

type Handlers = Mutex<Vec<Box<Fn() + Send>>>;

/// Handle to one upgraded websocket connection.
///
/// The handle is shared: middleware keeps clones for later pushes and the
/// broadcast registry holds weak references. `send` may be called from any
/// thread; frames are queued onto the connection's single-writer FIFO and
/// delivered in enqueue order, one complete frame at a time.
pub struct WebSocket {
    tx: UnboundedSender<WsFrame>,
    open_handlers: Handlers,
    close_handlers: Handlers,
    message_handlers: Mutex<Vec<Box<Fn(Vec<u8>) + Send>>>,
}

impl WebSocket {
    pub fn new(tx: UnboundedSender<WsFrame>) -> WebSocket {
        WebSocket {
            tx: tx,
            open_handlers: Mutex::new(Vec::new()),
            close_handlers: Mutex::new(Vec::new()),
            message_handlers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to the successful end of the upgrade handshake.
    pub fn on_open<F: Fn() + Send + 'static>(&self, handler: F) {
        self.open_handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Subscribes to connection teardown.
    pub fn on_close<F: Fn() + Send + 'static>(&self, handler: F) {
        self.close_handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Subscribes to complete inbound messages.
    pub fn on_message<F: Fn(Vec<u8>) + Send + 'static>(&self, handler: F) {
        self.message_handlers.lock().unwrap().push(Box::new(handler));
    }

    /// Queues one message frame.
    pub fn send<M: Into<Vec<u8>>>(&self, msg: M, options: SendOptions) {
        let opcode = if options.binary {
            Opcode::Binary
        } else {
            Opcode::Text
        };
        let frame = WsFrame {
            fin: options.fin,
            opcode: opcode,
            payload: msg.into(),
        };
        if self.tx.unbounded_send(frame).is_err() {
            debug!("websocket send on a closed connection");
        }
    }

    /// Queues a close frame.
    pub fn close(&self) {
        if self.tx.unbounded_send(WsFrame::close()).is_err() {
            debug!("websocket close on a closed connection");
        }
    }

    pub(crate) fn emit_open(&self) {
        for handler in self.open_handlers.lock().unwrap().iter() {
            handler();
        }
    }

    pub(crate) fn emit_close(&self) {
        for handler in self.close_handlers.lock().unwrap().iter() {
            handler();
        }
    }

    /// Dispatches one complete message to the subscribers in registration
    /// order. Every subscriber but the last receives a copy; the last one
    /// takes the payload.
    pub(crate) fn emit_message(&self, payload: Vec<u8>) {
        let handlers = self.message_handlers.lock().unwrap();
        if handlers.is_empty() {
            return;
        }
        let last = handlers.len() - 1;
        for handler in handlers[..last].iter() {
            handler(payload.clone());
        }
        handlers[last](payload);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use futures::sync::mpsc::unbounded;
    use futures::Stream;

    use super::frame::Opcode;
    use super::{SendOptions, WebSocket};

    #[test]
    fn send_queues_frames_in_order() {
        let (tx, rx) = unbounded();
        let ws = WebSocket::new(tx);
        ws.send("one", SendOptions::default());
        ws.send(&b"two"[..], SendOptions { binary: true, fin: true });
        ws.close();
        drop(ws);
        let frames = rx.wait().map(|f| f.unwrap()).collect::<Vec<_>>();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, Opcode::Text);
        assert_eq!(&frames[0].payload, b"one");
        assert_eq!(frames[1].opcode, Opcode::Binary);
        assert_eq!(frames[2].opcode, Opcode::Close);
    }

    #[test]
    fn every_subscriber_sees_each_message_once() {
        let (tx, _rx) = unbounded();
        let ws = WebSocket::new(tx);
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        {
            let first = first.clone();
            ws.on_message(move |msg| first.lock().unwrap().push(msg));
        }
        {
            let second = second.clone();
            ws.on_message(move |msg| second.lock().unwrap().push(msg));
        }
        ws.emit_message(b"hi".to_vec());
        assert_eq!(&first.lock().unwrap()[..], &[b"hi".to_vec()][..]);
        assert_eq!(&second.lock().unwrap()[..], &[b"hi".to_vec()][..]);
    }

    #[test]
    fn concurrent_sends_keep_per_thread_enqueue_order() {
        use std::thread;

        let (tx, rx) = unbounded();
        let ws = Arc::new(WebSocket::new(tx));
        let mut threads = Vec::new();
        for thread_id in 0..4u8 {
            let ws = ws.clone();
            threads.push(thread::spawn(move || {
                for seq in 0..100u8 {
                    ws.send(vec![thread_id, seq],
                        super::SendOptions::default());
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        drop(ws);

        let frames: Vec<Vec<u8>> =
            rx.wait().map(|f| f.unwrap().payload).collect();
        assert_eq!(frames.len(), 400);
        // no frame is lost and each sender's frames stay in order
        let mut next_seq = [0u8; 4];
        for frame in frames {
            let thread_id = frame[0] as usize;
            assert_eq!(frame[1], next_seq[thread_id]);
            next_seq[thread_id] += 1;
        }
        assert_eq!(next_seq, [100, 100, 100, 100]);
    }

    #[test]
    fn open_and_close_fire_in_registration_order() {
        let (tx, _rx) = unbounded();
        let ws = WebSocket::new(tx);
        let counter = Arc::new(AtomicUsize::new(0));
        for expected in 0..3 {
            let counter = counter.clone();
            ws.on_open(move || {
                let seen =
                    counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(seen, expected);
            });
        }
        ws.emit_open();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
