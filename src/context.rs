//! Per-request context handed to middleware.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use futures::sync::mpsc::UnboundedSender;

use body::{BodyWriter, ChunkSink};
use cookies::CookieJar;
use enums::Method;
use request::Request;
use response::Response;
use session::Session;
use websocket::{WebSocket, WsFrame};

/// Aggregates one request, the response under construction, the cookie
/// jar, and the lazily created websocket / session handles.
///
/// A context lives for exactly one request (plus the upgraded websocket
/// session, when there is one) and is reset between kept-alive requests.
pub struct Context {
    jar: Rc<RefCell<CookieJar>>,
    request: Request,
    response: Response,
    websocket: Option<Arc<WebSocket>>,
    ws_tx: UnboundedSender<WsFrame>,
    session: Option<Session>,
}

impl Context {
    pub fn new(sink: Rc<ChunkSink>, https: bool,
               ws_tx: UnboundedSender<WsFrame>) -> Context
    {
        let jar = Rc::new(RefCell::new(CookieJar::new()));
        Context {
            request: Request::new(https, jar.clone()),
            response: Response::new(jar.clone(), sink),
            jar: jar,
            websocket: None,
            ws_tx: ws_tx,
            session: None,
        }
    }

    pub fn req(&self) -> &Request {
        &self.request
    }

    pub fn req_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn res(&self) -> &Response {
        &self.response
    }

    pub fn res_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// The websocket handle for an upgraded request, created on first use.
    pub fn websocket(&mut self) -> Arc<WebSocket> {
        debug_assert!(self.request.websocket());
        if self.websocket.is_none() {
            self.websocket =
                Some(Arc::new(WebSocket::new(self.ws_tx.clone())));
        }
        self.websocket.as_ref().unwrap().clone()
    }

    /// The handle if one was created, without creating it.
    pub fn websocket_opt(&self) -> Option<Arc<WebSocket>> {
        self.websocket.clone()
    }

    // request accessors

    pub fn method(&self) -> Method {
        self.request.method()
    }

    pub fn url(&self) -> &str {
        self.request.url()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn querystring(&self) -> &str {
        self.request.querystring()
    }

    pub fn host(&self) -> &str {
        self.request.host()
    }

    pub fn hostname(&self) -> &str {
        self.request.hostname()
    }

    pub fn origin(&self) -> String {
        self.request.origin()
    }

    pub fn href(&self) -> String {
        self.request.href()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.request.get(field)
    }

    pub fn headers(&self) -> &[(String, String)] {
        self.request.headers()
    }

    pub fn query(&self) -> Vec<(String, String)> {
        self.request.query()
    }

    // response mutators

    pub fn status(&self) -> u16 {
        self.response.status()
    }

    pub fn set_status(&mut self, status: u16) {
        self.response.set_status(status);
    }

    pub fn set<F, V>(&mut self, field: F, value: V)
        where F: Into<String>, V: Into<String>
    {
        self.response.set(field, value);
    }

    pub fn remove(&mut self, field: &str) {
        self.response.remove(field);
    }

    pub fn redirect<U: Into<String>>(&mut self, url: U) {
        self.response.redirect(url);
    }

    pub fn content_type<T: Into<String>>(&mut self, content_type: T) {
        self.response.content_type(content_type);
    }

    pub fn set_length(&mut self, content_length: u64) {
        self.response.set_length(content_length);
    }

    pub fn has_body(&self) -> bool {
        self.response.has_body()
    }

    pub fn body<B: Into<Vec<u8>>>(&mut self, body: B) {
        self.response.set_body(body);
    }

    /// Switches the response to chunked transfer-encoding.
    pub fn chunked(&mut self) {
        self.response.set_chunked();
    }

    /// Commits the header and returns the streaming body writer.
    pub fn body_stream(&mut self) -> BodyWriter {
        self.response.body_stream()
    }

    pub fn cookies(&self) -> Rc<RefCell<CookieJar>> {
        self.jar.clone()
    }

    // session plumbing

    pub fn session_enabled(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&mut self) -> &mut Session {
        self.session.as_mut().expect("session middleware not installed")
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// Resets the whole per-request state for the next kept-alive request.
    pub fn reset(&mut self) {
        self.request.reset();
        self.response.reset();
        self.jar.borrow_mut().reset();
        self.websocket = None;
        self.session = None;
    }
}
