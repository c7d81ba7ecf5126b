//! The websocket endpoint: handshake middleware, subscriber wiring and
//! broadcast over a weak-reference client registry.

use std::sync::{Arc, Mutex, Weak};

use base64;
use sha1::Sha1;

use context::Context;
use middleware::{Middleware, Middlewares};
use super::{SendOptions, WebSocket};

const GUID: &'static str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.trim().as_bytes());
    sha1.update(GUID.as_bytes());
    base64::encode(&sha1.digest().bytes()[..])
}

/// Websocket endpoint of an application.
///
/// Holds the middleware chain run during the upgrade handshake and the
/// registry of live client handles used by `broadcast`. The registry keeps
/// weak references only, so closed connections are reclaimed; expired
/// entries are swept on broadcast.
pub struct WsServer {
    middlewares: Mutex<Middlewares>,
    clients: Mutex<Vec<Weak<WebSocket>>>,
}

impl WsServer {
    pub fn new() -> WsServer {
        WsServer {
            middlewares: Mutex::new(Middlewares::new()),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Appends a middleware to the handshake chain.
    pub fn use_<M: Middleware + 'static>(&self, middleware: M) -> &Self {
        self.middlewares.lock().unwrap().push(middleware);
        self
    }

    /// Sends one message to every live client.
    pub fn broadcast<M: AsRef<[u8]>>(&self, msg: M,
                                     options: SendOptions)
    {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|weak| {
            match weak.upgrade() {
                Some(ws) => {
                    ws.send(msg.as_ref().to_vec(), options);
                    true
                }
                None => false,
            }
        });
    }

    pub fn client_count(&self) -> usize {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|weak| weak.upgrade().is_some());
        clients.len()
    }

    fn subscribe(self: &Arc<Self>, ws: &Arc<WebSocket>) {
        let registry = self.clone();
        let handle = Arc::downgrade(ws);
        ws.on_open(move || {
            registry.clients.lock().unwrap().push(handle.clone());
        });
        let registry = self.clone();
        let target = Arc::downgrade(ws);
        ws.on_close(move || {
            let mut clients = registry.clients.lock().unwrap();
            clients.retain(|weak| {
                !weak.ptr_eq(&target) && weak.upgrade().is_some()
            });
        });
    }

    /// The request handler for upgrade requests.
    ///
    /// Runs the handshake chain, then completes the RFC 6455 handshake:
    /// status 101 with the `Sec-WebSocket-Accept` digest of the client key.
    pub fn handler(self: &Arc<Self>)
        -> Arc<Fn(&mut Context) + Send + Sync>
    {
        let server = self.clone();
        Arc::new(move |ctx: &mut Context| {
            let ws = ctx.websocket();
            server.subscribe(&ws);

            // run the chain with the registration lock released
            let chain = server.middlewares.lock().unwrap().compose();
            ::middleware::dispatch(&chain[..], ctx);

            let key = ctx.get("Sec-WebSocket-Key")
                .unwrap_or("").to_string();
            ctx.set("Sec-WebSocket-Accept", accept_key(&key));
            ctx.set("Connection", "Upgrade");
            ctx.set("Upgrade", "WebSocket");
            ctx.set_status(101);
        })
    }
}
