//! An embeddable HTTP/1.x + websocket server framework with Koa-style
//! middleware, built on the tokio stack.
//!
//! Applications register an ordered middleware chain and a routing table;
//! the framework accepts connections on a pool of event-loop workers,
//! parses requests with an event-driven wire parser, dispatches each
//! request through the chain with a mutable [`Context`], writes the
//! response (buffered or chunk-streamed), and performs the RFC 6455
//! upgrade handshake after which the same connection speaks websocket
//! frames.
//!
//! ```no_run
//! use cuehttp::{App, Context, Router};
//! use cuehttp::middleware::terminal;
//!
//! let mut router = Router::new();
//! router.get("/hello", terminal(|ctx: &mut Context| {
//!     ctx.set_status(200);
//!     ctx.content_type("text/plain");
//!     ctx.body("hi");
//! }));
//! let mut app = App::new();
//! app.use_(router.routes());
//! app.listen(8080).unwrap();
//! app.run().unwrap();
//! ```

extern crate base64;
extern crate byteorder;
extern crate flate2;
extern crate futures;
extern crate httpdate;
#[macro_use]
extern crate log;
#[macro_use]
extern crate matches;
extern crate netbuf;
extern crate num_cpus;
#[macro_use(quick_error)]
extern crate quick_error;
extern crate rand;
extern crate serde_json;
extern crate sha1;
extern crate tk_bufstream;
extern crate tokio_core;
extern crate tokio_io;

mod body;
mod compress;
mod context;
mod cookies;
mod enums;
mod error;
pub mod middleware;
pub mod parser;
mod request;
mod response;
mod router;
mod server;
mod session;
mod statics;
mod websocket;

pub use body::{BodyWriter, ChunkSink};
pub use compress::{use_compress, CompressOptions};
pub use context::Context;
pub use cookies::{Cookie, CookieJar};
pub use enums::{reason_phrase, Method, Version};
pub use error::Error;
pub use middleware::{terminal, Middleware, Middlewares, Next};
pub use request::Request;
pub use response::Response;
pub use router::{Router, Routes};
pub use server::{App, Connection, Handler, StopHandle};
pub use session::{use_session, ExternalKey, Session, SessionOptions,
                  SessionStore};
pub use statics::{use_static, StaticOptions};
pub use websocket::{SendOptions, WebSocket, WsServer};
