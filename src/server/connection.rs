//! Per-socket connection actor.
//!
//! A `Connection` owns the parser, the context and the buffered halves of
//! the socket, and drives read -> parse -> dispatch -> write -> (next
//! request | websocket | close) from its `Future::poll`. Middleware runs to
//! completion inside `poll`; only I/O suspends. After a successful
//! upgrade the same future switches to the websocket frame loop.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use futures::sync::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{Async, Future, Poll, Stream};
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_io::{AsyncRead, AsyncWrite};

use body::ChunkSink;
use context::Context;
use error::Error;
use parser::{Kind, Parser, Status};
use websocket::frame::write_frame;
use websocket::{WsEvent, WsFrame, WsReader};

/// The application entry point run for every parsed request.
pub type Handler = Arc<Fn(&mut Context) + Send + Sync>;

/// Reply-chunk sink over the connection's write buffer.
///
/// Committed headers and body chunks land here while middleware runs; the
/// connection flushes them to the socket afterwards.
struct OutputSink<S> {
    out: Rc<RefCell<WriteBuf<S>>>,
}

impl<S: AsyncWrite + 'static> ChunkSink for OutputSink<S> {
    fn send(&self, data: &[u8]) -> bool {
        self.out.borrow_mut().out_buf.extend(data);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    ReadRequest,
    WriteResponse { upgrade: bool, keepalive: bool },
    WsRun,
    Closing,
}

pub struct Connection<S> {
    input: ReadBuf<S>,
    output: Rc<RefCell<WriteBuf<S>>>,
    parser: Parser,
    ctx: Context,
    handler: Handler,
    ws_tx: UnboundedSender<WsFrame>,
    ws_rx: UnboundedReceiver<WsFrame>,
    reader: WsReader,
    handshaken: bool,
    state: ConnState,
}

impl<S: AsyncRead + AsyncWrite + 'static> Connection<S> {
    pub fn new(sock: S, handler: Handler) -> Connection<S> {
        Connection::with_security(sock, handler, false)
    }

    /// `https` only changes what `Request::origin` reports; a TLS stream
    /// is handed in already handshaken and parses like plaintext.
    pub fn with_security(sock: S, handler: Handler, https: bool)
        -> Connection<S>
    {
        let (cout, cin) = IoBuf::new(sock).split();
        let output = Rc::new(RefCell::new(cout));
        let sink = Rc::new(OutputSink { out: output.clone() });
        let (tx, rx) = unbounded();
        let ctx = Context::new(sink, https, tx.clone());
        Connection {
            input: cin,
            output: output,
            parser: Parser::new(Kind::Request),
            ctx: ctx,
            handler: handler,
            ws_tx: tx,
            ws_rx: rx,
            reader: WsReader::new(),
            handshaken: false,
            state: ConnState::ReadRequest,
        }
    }

    /// Runs the middleware chain and serializes the response.
    ///
    /// Returns the upgrade and keep-alive decisions for the write state.
    fn dispatch(&mut self) -> (bool, bool) {
        let (major, minor) = (self.ctx.req().version_major(),
                              self.ctx.req().version_minor());
        let req_keepalive = self.ctx.req().keepalive();
        self.ctx.res_mut().set_version(major, minor);
        self.ctx.res_mut().set_keepalive(req_keepalive);

        (*self.handler)(&mut self.ctx);

        if !self.ctx.res().committed() {
            let mut out = self.output.borrow_mut();
            self.ctx.res().serialize(&mut out.out_buf);
        }
        let upgrade = self.ctx.req().websocket()
            && self.ctx.res().status() == 101;
        let keepalive = req_keepalive && self.ctx.res().keepalive();
        (upgrade, keepalive)
    }

    /// Best-effort error response; the connection closes after the write.
    fn reply_error(&mut self, status: u16) {
        let (major, minor) = (self.ctx.req().version_major(),
                              self.ctx.req().version_minor());
        self.ctx.res_mut().set_version(major, minor);
        self.ctx.res_mut().set_keepalive(false);
        self.ctx.set_status(status);
        if !self.ctx.res().committed() {
            let mut out = self.output.borrow_mut();
            self.ctx.res().serialize(&mut out.out_buf);
        }
        self.state = ConnState::WriteResponse {
            upgrade: false,
            keepalive: false,
        };
    }

    fn emit_close(&mut self) {
        if self.handshaken {
            self.handshaken = false;
            if let Some(ws) = self.ctx.websocket_opt() {
                ws.emit_close();
            }
        }
    }

    /// read -> parse until a whole request is in, more input is needed,
    /// or the connection dies.
    fn poll_read_request(&mut self) -> Poll<(), Error> {
        loop {
            let buffered = self.input.in_buf.len();
            if buffered > 0 {
                let result = self.parser.execute(
                    self.ctx.req_mut(), &self.input.in_buf[..buffered]);
                match result {
                    Ok(Status::Ok) => {
                        self.input.in_buf.consume(buffered);
                    }
                    Ok(Status::Paused(consumed))
                    | Ok(Status::PausedUpgrade(consumed)) => {
                        self.input.in_buf.consume(consumed);
                        if self.ctx.req().finished() {
                            let (upgrade, keepalive) = self.dispatch();
                            self.state = ConnState::WriteResponse {
                                upgrade: upgrade,
                                keepalive: keepalive,
                            };
                            return Ok(Async::Ready(()));
                        }
                        self.parser.resume();
                        continue;
                    }
                    Err(err) => {
                        debug!("request parse error: {}", err);
                        self.reply_error(400);
                        return Ok(Async::Ready(()));
                    }
                }
            }
            match self.input.read() {
                Ok(0) => {
                    if self.input.done() {
                        self.state = ConnState::Closing;
                        return Ok(Async::Ready(()));
                    }
                    return Ok(Async::NotReady);
                }
                Ok(_) => continue,
                Err(err) => {
                    debug!("read error: {}", err);
                    return Err(err.into());
                }
            }
        }
    }

    /// One round of the websocket loop: drain the outbound queue, flush,
    /// dispatch inbound frames, read.
    fn poll_ws(&mut self) -> Poll<(), Error> {
        loop {
            // outbound frames, in enqueue order
            loop {
                match self.ws_rx.poll() {
                    Ok(Async::Ready(Some(frame))) => {
                        let mut out = self.output.borrow_mut();
                        write_frame(&mut out.out_buf, &frame);
                    }
                    Ok(Async::Ready(None)) | Ok(Async::NotReady)
                    | Err(()) => break,
                }
            }
            let flush_result = self.output.borrow_mut().flush();
            if let Err(err) = flush_result {
                debug!("websocket write error: {}", err);
                self.emit_close();
                return Err(err.into());
            }

            // inbound frames
            loop {
                match self.reader.next_event(&mut self.input.in_buf) {
                    Ok(Some(WsEvent::Message(payload))) => {
                        if let Some(ws) = self.ctx.websocket_opt() {
                            ws.emit_message(payload);
                        }
                    }
                    Ok(Some(WsEvent::Ping(payload))) => {
                        trace!("ping with {} payload bytes",
                            payload.len());
                        let _ = self.ws_tx
                            .unbounded_send(WsFrame::pong(payload));
                    }
                    Ok(Some(WsEvent::Pong)) => {}
                    Ok(Some(WsEvent::Close)) => {
                        self.state = ConnState::Closing;
                        return Ok(Async::Ready(()));
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!("websocket protocol error: {}", err);
                        self.emit_close();
                        return Err(Error::Websocket(err));
                    }
                }
            }
            // events above may have queued replies (pongs, sends from
            // handlers running on this thread)
            match self.ws_rx.poll() {
                Ok(Async::Ready(Some(frame))) => {
                    let mut out = self.output.borrow_mut();
                    write_frame(&mut out.out_buf, &frame);
                    continue;
                }
                _ => {}
            }

            match self.input.read() {
                Ok(0) => {
                    if self.input.done() {
                        self.state = ConnState::Closing;
                        return Ok(Async::Ready(()));
                    }
                    return Ok(Async::NotReady);
                }
                Ok(_) => continue,
                Err(err) => {
                    debug!("websocket read error: {}", err);
                    self.emit_close();
                    return Err(err.into());
                }
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + 'static> Future for Connection<S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        loop {
            match self.state {
                ConnState::ReadRequest => {
                    match self.poll_read_request()? {
                        Async::Ready(()) => continue,
                        Async::NotReady => return Ok(Async::NotReady),
                    }
                }
                ConnState::WriteResponse { upgrade, keepalive } => {
                    {
                        let mut out = self.output.borrow_mut();
                        if let Err(err) = out.flush() {
                            debug!("write error: {}", err);
                            return Err(err.into());
                        }
                        if out.out_buf.len() > 0 {
                            return Ok(Async::NotReady);
                        }
                    }
                    if upgrade {
                        self.handshaken = true;
                        if let Some(ws) = self.ctx.websocket_opt() {
                            ws.emit_open();
                        }
                        self.state = ConnState::WsRun;
                    } else if keepalive {
                        self.parser.reset();
                        self.ctx.reset();
                        self.state = ConnState::ReadRequest;
                    } else {
                        self.state = ConnState::Closing;
                    }
                }
                ConnState::WsRun => {
                    match self.poll_ws()? {
                        Async::Ready(()) => continue,
                        Async::NotReady => return Ok(Async::NotReady),
                    }
                }
                ConnState::Closing => {
                    self.emit_close();
                    return Ok(Async::Ready(()));
                }
            }
        }
    }
}
