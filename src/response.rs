//! The outbound response accumulator and writer.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use netbuf::Buf;

use body::{BodyWriter, ChunkSink};
use cookies::CookieJar;
use enums::reason_phrase;

/// Response under construction.
///
/// Defaults to `404 Not Found`; middleware mutates it, and the connection
/// serializes it after the chain returns. A response is either buffered
/// (body bytes plus `Content-length`) or streamed (committed through a
/// `BodyWriter`), never both.
pub struct Response {
    http_major: u8,
    http_minor: u8,
    status: u16,
    message: String,
    headers: Vec<(String, String)>,
    keepalive: bool,
    content_length: u64,
    body: Vec<u8>,
    committed: bool,
    jar: Rc<RefCell<CookieJar>>,
    sink: Rc<ChunkSink>,
}

impl Response {
    pub fn new(jar: Rc<RefCell<CookieJar>>, sink: Rc<ChunkSink>)
        -> Response
    {
        Response {
            http_major: 1,
            http_minor: 1,
            status: 404,
            message: "Not Found".to_string(),
            headers: Vec::new(),
            keepalive: false,
            content_length: 0,
            body: Vec::new(),
            committed: false,
            jar: jar,
            sink: sink,
        }
    }

    pub fn set_version(&mut self, major: u8, minor: u8) {
        self.http_major = major;
        self.http_minor = minor;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets the status code; the reason phrase follows from the fixed
    /// status table.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
        self.message = reason_phrase(status).to_string();
    }

    /// Overrides the reason phrase.
    pub fn set_message<M: Into<String>>(&mut self, message: M) {
        self.message = message.into();
    }

    pub fn has(&self, field: &str) -> bool {
        self.headers
            .iter()
            .any(|&(ref name, _)| name.eq_ignore_ascii_case(field))
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|&&(ref name, _)| name.eq_ignore_ascii_case(field))
            .map(|&(_, ref value)| &value[..])
    }

    pub fn set<F, V>(&mut self, field: F, value: V)
        where F: Into<String>, V: Into<String>
    {
        self.headers.push((field.into(), value.into()));
    }

    pub fn remove(&mut self, field: &str) {
        if let Some(pos) = self.headers.iter().position(
            |&(ref name, _)| name.eq_ignore_ascii_case(field))
        {
            self.headers.remove(pos);
        }
    }

    /// Sets `Location`, promoting the default 404 to a 302.
    pub fn redirect<U: Into<String>>(&mut self, url: U) {
        if self.status == 404 {
            self.set_status(302);
        }
        self.set("Location", url.into());
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    /// Demoting keep-alive also advertises `Connection: close`.
    pub fn set_keepalive(&mut self, keepalive: bool) {
        if keepalive && self.http_major == 1 {
            self.keepalive = true;
        } else {
            self.keepalive = false;
            if !self.has("Connection") {
                self.set("Connection", "close");
            }
        }
    }

    pub fn content_type<T: Into<String>>(&mut self, content_type: T) {
        self.set("Content-type", content_type.into());
    }

    pub fn set_length(&mut self, content_length: u64) {
        self.content_length = content_length;
    }

    pub fn length(&self) -> u64 {
        self.content_length
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Assigns a buffered body; `Content-length` follows its size.
    pub fn set_body<B: Into<Vec<u8>>>(&mut self, body: B) {
        self.body = body.into();
        self.content_length = self.body.len() as u64;
    }

    /// Takes the buffered body out, leaving the response empty.
    pub fn dump_body(&mut self) -> Vec<u8> {
        ::std::mem::replace(&mut self.body, Vec::new())
    }

    /// Marks the response as chunked.
    pub fn set_chunked(&mut self) {
        if !self.chunked() {
            self.set("Transfer-Encoding", "chunked");
        }
    }

    pub fn chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .map_or(false, |v| v.eq_ignore_ascii_case("chunked"))
    }

    /// True once a streamed body committed the header; the connection must
    /// not serialize such a response again.
    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Commits the header and returns the streaming body writer.
    ///
    /// With `Transfer-Encoding: chunked` set, each flush of the writer
    /// becomes one chunk; otherwise bytes are sent raw and the response
    /// should carry a `Content-length`. Without either the connection can
    /// not be kept alive afterwards, so keep-alive is demoted.
    pub fn body_stream(&mut self) -> BodyWriter {
        let chunked = self.chunked();
        if !chunked && !self.has("Content-length")
            && self.content_length == 0
        {
            self.keepalive = false;
        }
        self.committed = true;
        let mut head = Buf::new();
        self.render_head(&mut head);
        self.sink.send(&head[..]);
        BodyWriter::new(chunked, self.sink.clone())
    }

    /// Serializes status line, headers and the buffered body.
    pub fn serialize(&self, buf: &mut Buf) {
        self.render_head(buf);
        if !self.chunked() {
            buf.extend(&self.body);
        }
    }

    fn render_head(&self, buf: &mut Buf) {
        let chunked = self.chunked();
        write!(buf, "HTTP/{}.{} {} {}\r\n",
            self.http_major, self.http_minor, self.status, self.message)
            .unwrap();
        buf.extend(b"Server: cuehttp\r\n");
        for &(ref name, ref value) in &self.headers {
            if chunked && name.eq_ignore_ascii_case("Content-length") {
                continue;
            }
            write!(buf, "{}: {}\r\n", name, value).unwrap();
        }
        if self.keepalive && !self.has("Connection") {
            buf.extend(b"Connection: keep-alive\r\n");
        }
        for cookie in self.jar.borrow().outbound() {
            if cookie.valid() {
                write!(buf, "Set-Cookie: {}\r\n", cookie).unwrap();
            }
        }
        if chunked {
            buf.extend(b"\r\n");
        } else {
            if self.has("Content-length") {
                buf.extend(b"\r\n");
            } else {
                write!(buf, "Content-length: {}\r\n\r\n",
                    self.content_length).unwrap();
            }
        }
    }

    pub fn reset(&mut self) {
        self.headers.clear();
        self.status = 404;
        self.message = "Not Found".to_string();
        self.keepalive = false;
        self.content_length = 0;
        self.body.clear();
        self.committed = false;
        self.jar.borrow_mut().reset();
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use netbuf::Buf;

    use body::ChunkSink;
    use cookies::{Cookie, CookieJar};
    use super::Response;

    #[derive(Default)]
    struct VecSink(RefCell<Vec<u8>>);

    impl ChunkSink for VecSink {
        fn send(&self, data: &[u8]) -> bool {
            self.0.borrow_mut().extend_from_slice(data);
            true
        }
    }

    fn response() -> (Response, Rc<VecSink>, Rc<RefCell<CookieJar>>) {
        let jar = Rc::new(RefCell::new(CookieJar::new()));
        let sink = Rc::new(VecSink::default());
        let res = Response::new(jar.clone(), sink.clone());
        (res, sink, jar)
    }

    fn serialized(res: &Response) -> String {
        let mut buf = Buf::new();
        res.serialize(&mut buf);
        String::from_utf8_lossy(&buf[..]).to_string()
    }

    #[test]
    fn default_is_404() {
        let (res, _, _) = response();
        let text = serialized(&res);
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Server: cuehttp\r\n"));
        assert!(text.contains("Content-length: 0\r\n"));
    }

    #[test]
    fn buffered_body() {
        let (mut res, _, _) = response();
        res.set_status(200);
        res.set_keepalive(true);
        res.content_type("text/plain");
        res.set_body("hi");
        let text = serialized(&res);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-type: text/plain\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.contains("Content-length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn explicit_connection_header_wins() {
        let (mut res, _, _) = response();
        res.set_status(200);
        res.set("Connection", "close");
        res.set_keepalive(true);
        let text = serialized(&res);
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn http10_keeps_explicitly_requested_keepalive() {
        let (mut res, _, _) = response();
        res.set_version(1, 0);
        res.set_status(200);
        res.set_keepalive(true);
        let text = serialized(&res);
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn unknown_status_has_empty_phrase() {
        let (mut res, _, _) = response();
        res.set_status(599);
        assert!(serialized(&res).starts_with("HTTP/1.1 599 \r\n"));
    }

    #[test]
    fn set_cookies_are_emitted() {
        let (mut res, _, jar) = response();
        res.set_status(200);
        jar.borrow_mut().set(Cookie::new("a", "1"));
        jar.borrow_mut().set(Cookie::new("", "skipped"));
        let text = serialized(&res);
        assert!(text.contains("Set-Cookie: a=1\r\n"));
        assert!(!text.contains("skipped"));
    }

    #[test]
    fn chunked_suppresses_content_length() {
        let (mut res, _, _) = response();
        res.set_status(200);
        res.set("Content-length", "99");
        res.set_chunked();
        let text = serialized(&res);
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn redirect_promotes_404() {
        let (mut res, _, _) = response();
        res.redirect("/elsewhere");
        assert_eq!(res.status(), 302);
        assert_eq!(res.get("Location"), Some("/elsewhere"));
    }

    #[test]
    fn stream_commits_header_once() {
        let (mut res, sink, _) = response();
        res.set_status(200);
        res.set_chunked();
        res.set_keepalive(true);
        {
            let mut writer = res.body_stream();
            writer.write_all(b"abc").unwrap();
            writer.flush().unwrap();
            writer.write_all(b"defg").unwrap();
            writer.flush().unwrap();
        }
        assert!(res.committed());
        let text = String::from_utf8_lossy(&sink.0.borrow()[..])
            .to_string();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with(
            "\r\n\r\n3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n"));
    }

    #[test]
    fn reset_restores_defaults() {
        let (mut res, _, jar) = response();
        res.set_status(200);
        res.set_body("hi");
        jar.borrow_mut().set(Cookie::new("a", "1"));
        res.reset();
        assert_eq!(res.status(), 404);
        assert!(!res.has_body());
        assert!(jar.borrow().outbound().is_empty());
    }
}
