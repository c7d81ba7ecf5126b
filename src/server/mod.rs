//! The application object, its engine pool and the accept loop.
//!
//! `App::run` spawns one worker thread per engine, each running an
//! independent event loop that accepts from its own dup of the listening
//! socket. An accepted connection is bound to the loop that accepted it
//! for its entire lifetime, so request parsing, middleware and websocket
//! framing for one socket never cross threads.

mod connection;

pub use self::connection::{Connection, Handler};

use std::io;
use std::mem;
use std::net;
use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex};
use std::thread;

use futures::stream::FuturesUnordered;
use futures::sync::oneshot;
use futures::{Async, Future, Poll, Stream};
use num_cpus;
use tokio_core::net::{Incoming, TcpListener};
use tokio_core::reactor::Core;

use context::Context;
use middleware::{dispatch, Middleware, Middlewares};
use websocket::WsServer;

/// A Koa-style HTTP/1.x + websocket application.
///
/// Register middleware with `use_`, bind with `listen`, then `run` blocks
/// serving until `stop` is called from a `StopHandle` (or another thread
/// holding the app).
pub struct App {
    middlewares: Middlewares,
    ws: Option<Arc<WsServer>>,
    listeners: Vec<net::TcpListener>,
    stop: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
}

impl App {
    pub fn new() -> App {
        App {
            middlewares: Middlewares::new(),
            ws: None,
            listeners: Vec::new(),
            stop: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends a middleware to the chain.
    pub fn use_<M: Middleware + 'static>(&mut self, middleware: M)
        -> &mut App
    {
        self.middlewares.push(middleware);
        self
    }

    /// Binds a listening socket on all interfaces.
    pub fn listen(&mut self, port: u16) -> io::Result<&mut App> {
        self.listen_on(("0.0.0.0", port))
    }

    /// Binds a listening socket on an explicit address.
    pub fn listen_on<A: ToSocketAddrs>(&mut self, addr: A)
        -> io::Result<&mut App>
    {
        let listener = net::TcpListener::bind(addr)?;
        info!("listening on {}", listener.local_addr()?);
        self.listeners.push(listener);
        Ok(self)
    }

    /// The websocket endpoint, created on first access.
    ///
    /// Without one, upgrade requests are answered with 503.
    pub fn ws(&mut self) -> Arc<WsServer> {
        if self.ws.is_none() {
            self.ws = Some(Arc::new(WsServer::new()));
        }
        self.ws.as_ref().unwrap().clone()
    }

    /// The request entry point shared by all workers: websocket upgrades
    /// go to the websocket endpoint, everything else runs the middleware
    /// chain.
    pub fn callback(&self) -> Handler {
        let http = self.middlewares.compose();
        let ws_handler = self.ws.as_ref().map(|ws| ws.handler());
        Arc::new(move |ctx: &mut Context| {
            if ctx.req().websocket() {
                match ws_handler {
                    Some(ref handler) => (**handler)(ctx),
                    None => ctx.set_status(503),
                }
            } else {
                dispatch(&http[..], ctx);
            }
        })
    }

    /// Handle for stopping the server from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { senders: self.stop.clone() }
    }

    /// Stops accepting; in-flight connections drain naturally.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Serves with one engine per CPU.
    pub fn run(&mut self) -> io::Result<()> {
        self.run_with_threads(num_cpus::get())
    }

    /// Serves with an explicit engine count, blocking until stopped.
    pub fn run_with_threads(&mut self, threads: usize) -> io::Result<()> {
        assert!(threads > 0);
        assert!(!self.listeners.is_empty(),
            "call listen() before run()");
        let handler = self.callback();
        let listeners = mem::replace(&mut self.listeners, Vec::new());
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let mut dups = Vec::with_capacity(listeners.len());
            for listener in &listeners {
                dups.push(listener.try_clone()?);
            }
            let (tx, rx) = oneshot::channel();
            self.stop.lock().unwrap().push(tx);
            let handler = handler.clone();
            workers.push(thread::Builder::new()
                .name(format!("cuehttp-worker-{}", index))
                .spawn(move || worker_loop(dups, handler, rx))?);
        }
        drop(listeners);
        for worker in workers {
            let _ = worker.join();
        }
        Ok(())
    }
}

/// Cloneable handle that stops every engine of a running `App`.
#[derive(Clone)]
pub struct StopHandle {
    senders: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        for tx in self.senders.lock().unwrap().drain(..) {
            let _ = tx.send(());
        }
    }
}

fn worker_loop(listeners: Vec<net::TcpListener>, handler: Handler,
               shutdown: oneshot::Receiver<()>)
{
    let mut core = match Core::new() {
        Ok(core) => core,
        Err(err) => {
            error!("can not create an event loop: {}", err);
            return;
        }
    };
    let handle = core.handle();
    let mut incoming = Vec::new();
    for listener in listeners {
        if let Err(err) = listener.set_nonblocking(true) {
            error!("can not register listener: {}", err);
            continue;
        }
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                error!("can not register listener: {}", err);
                continue;
            }
        };
        match TcpListener::from_listener(listener, &addr, &handle) {
            Ok(listener) => incoming.push(listener.incoming()),
            Err(err) => error!("can not register listener: {}", err),
        }
    }
    let worker = Worker {
        incoming: incoming,
        shutdown: shutdown,
        connections: FuturesUnordered::new(),
        handler: handler,
        stopped: false,
    };
    if core.run(worker).is_err() {
        error!("worker loop failed");
    }
}

/// One engine: accepts connections and drives them to completion.
///
/// Completes when the shutdown future fired and every accepted connection
/// has finished; there is no forced termination.
struct Worker {
    incoming: Vec<Incoming>,
    shutdown: oneshot::Receiver<()>,
    connections: FuturesUnordered<Box<Future<Item = (), Error = ()>>>,
    handler: Handler,
    stopped: bool,
}

impl Future for Worker {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        if !self.stopped {
            match self.shutdown.poll() {
                Ok(Async::Ready(())) | Err(_) => {
                    self.stopped = true;
                    self.incoming.clear();
                }
                Ok(Async::NotReady) => {}
            }
        }
        let mut index = 0;
        while index < self.incoming.len() {
            let mut dead = false;
            loop {
                match self.incoming[index].poll() {
                    Ok(Async::Ready(Some((sock, addr)))) => {
                        debug!("accepted connection from {}", addr);
                        let _ = sock.set_nodelay(true);
                        let conn =
                            Connection::new(sock, self.handler.clone())
                                .then(|result| {
                                    if let Err(err) = result {
                                        debug!("connection error: {}",
                                            err);
                                    }
                                    Ok(())
                                });
                        self.connections.push(Box::new(conn));
                    }
                    Ok(Async::NotReady) => break,
                    Ok(Async::Ready(None)) => {
                        dead = true;
                        break;
                    }
                    Err(err) => {
                        error!("accept error: {}", err);
                        dead = true;
                        break;
                    }
                }
            }
            if dead {
                self.incoming.remove(index);
            } else {
                index += 1;
            }
        }
        loop {
            match self.connections.poll() {
                Ok(Async::Ready(Some(()))) => continue,
                Ok(Async::Ready(None)) | Ok(Async::NotReady) => break,
                Err(()) => continue,
            }
        }
        if self.stopped && self.connections.is_empty() {
            Ok(Async::Ready(()))
        } else {
            Ok(Async::NotReady)
        }
    }
}
