//! The inbound request accumulator.
//!
//! `Request` is the sink for wire-parser events: spans are accumulated,
//! header field/value pairs are stitched back together across read
//! boundaries, and the derived accessors (path, host, cookies, ...) are
//! fixed when the header section completes.

use std::cell::RefCell;
use std::rc::Rc;

use cookies::CookieJar;
use enums::{Method, Version};
use parser::url::Url;
use parser::{CallbackResult, ErrorKind, Events, Head, HeadersResult};

#[derive(Debug)]
pub struct Request {
    https: bool,
    url: String,
    method: Method,
    http_major: u8,
    http_minor: u8,
    headers: Vec<(String, String)>,
    cur_field: String,
    cur_value: String,
    in_value: bool,
    path: String,
    querystring: String,
    host: String,
    content_type: String,
    charset: String,
    content_length: u64,
    keepalive: bool,
    websocket: bool,
    body: Vec<u8>,
    finished: bool,
    error: Option<ErrorKind>,
    jar: Rc<RefCell<CookieJar>>,
}

impl Request {
    pub fn new(https: bool, jar: Rc<RefCell<CookieJar>>) -> Request {
        Request {
            https: https,
            url: String::new(),
            method: Method::Get,
            http_major: 1,
            http_minor: 1,
            headers: Vec::new(),
            cur_field: String::new(),
            cur_value: String::new(),
            in_value: false,
            path: String::new(),
            querystring: String::new(),
            host: String::new(),
            content_type: String::new(),
            charset: String::new(),
            content_length: 0,
            keepalive: false,
            websocket: false,
            body: Vec::new(),
            finished: false,
            error: None,
            jar: jar,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn version_major(&self) -> u8 {
        self.http_major
    }

    pub fn version_minor(&self) -> u8 {
        self.http_minor
    }

    pub fn version(&self) -> Version {
        Version::from_pair(self.http_major, self.http_minor)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn querystring(&self) -> &str {
        &self.querystring
    }

    /// `?querystring`, or empty when there is no query.
    pub fn search(&self) -> String {
        if self.querystring.is_empty() {
            String::new()
        } else {
            format!("?{}", self.querystring)
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host without the port part.
    pub fn hostname(&self) -> &str {
        match self.host.rfind(':') {
            Some(pos) => &self.host[..pos],
            None => &self.host,
        }
    }

    pub fn origin(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}", scheme, self.host)
    }

    pub fn href(&self) -> String {
        format!("{}{}", self.origin(), self.url)
    }

    /// First header value whose name matches case-insensitively.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|&&(ref name, _)| name.eq_ignore_ascii_case(field))
            .map(|&(_, ref value)| &value[..])
    }

    /// All headers in order of appearance.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Decoded query pairs in order of appearance.
    pub fn query(&self) -> Vec<(String, String)> {
        parse_query(&self.querystring)
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn length(&self) -> u64 {
        self.content_length
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    /// True when the request is a well-formed websocket handshake.
    pub fn websocket(&self) -> bool {
        self.websocket
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A whole message has been parsed and not consumed yet.
    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn reset(&mut self) {
        let jar = self.jar.clone();
        let https = self.https;
        *self = Request::new(https, jar);
    }

    fn flush_header(&mut self) {
        if self.in_value {
            let field = ::std::mem::replace(
                &mut self.cur_field, String::new());
            let value = ::std::mem::replace(
                &mut self.cur_value, String::new());
            self.headers.push((field, value));
            self.in_value = false;
        }
    }
}

impl Events for Request {
    fn on_message_begin(&mut self) -> CallbackResult {
        self.reset();
        CallbackResult::Ok
    }

    fn on_url(&mut self, span: &[u8]) -> CallbackResult {
        self.url.push_str(&String::from_utf8_lossy(span));
        CallbackResult::Ok
    }

    fn on_header_field(&mut self, span: &[u8]) -> CallbackResult {
        self.flush_header();
        self.cur_field.push_str(&String::from_utf8_lossy(span));
        CallbackResult::Ok
    }

    fn on_header_value(&mut self, span: &[u8]) -> CallbackResult {
        self.in_value = true;
        self.cur_value.push_str(&String::from_utf8_lossy(span));
        CallbackResult::Ok
    }

    fn on_headers_complete(&mut self, head: &Head) -> HeadersResult {
        self.flush_header();

        self.http_major = head.http_major;
        self.http_minor = head.http_minor;
        self.method = head.method.unwrap_or(Method::Get);
        self.content_length = head.content_length.unwrap_or(0);
        self.keepalive = head.keep_alive;

        self.host = self.get("Host").unwrap_or("").to_string();

        let content_type =
            self.get("Content-Type").unwrap_or("").to_string();
        match content_type.find("charset") {
            Some(pos) => {
                let end = content_type.find(';')
                    .unwrap_or(content_type.len());
                self.content_type = content_type[..end].to_string();
                self.charset = content_type[pos + 8..].to_string();
            }
            None => self.content_type = content_type,
        }

        if self.keepalive && head.upgrade {
            let upgrade_ok = self.get("Upgrade")
                .map_or(false, |v| v.eq_ignore_ascii_case("websocket"));
            let key_ok =
                self.get("Sec-WebSocket-Key").map_or(false, |v| {
                    !v.is_empty()
                });
            let version_ok =
                self.get("Sec-WebSocket-Version").map_or(false, |v| {
                    !v.is_empty()
                });
            self.websocket = upgrade_ok && key_ok && version_ok;
        }

        if let Some(cookie_string) = self.get("Cookie") {
            let cookie_string = cookie_string.to_string();
            self.jar.borrow_mut().parse(&cookie_string);
        }

        let is_connect = self.method == Method::Connect;
        match Url::parse(&self.url, is_connect) {
            Ok(url) => {
                self.path = url.path;
                self.querystring = url.query.unwrap_or_default();
            }
            Err(()) => {
                if is_connect {
                    self.error = Some(ErrorKind::InvalidUrl);
                    return HeadersResult::Error;
                }
                // a request-target our grammar refuses routes nowhere
                debug!("unparsable request target {:?}", self.url);
            }
        }
        HeadersResult::Ok
    }

    fn on_body(&mut self, span: &[u8]) -> CallbackResult {
        self.body.extend_from_slice(span);
        CallbackResult::Ok
    }

    fn on_message_complete(&mut self) -> CallbackResult {
        self.finished = true;
        // stop at the message boundary so pipelined requests are served
        // strictly in order
        CallbackResult::Pause
    }
}

fn decode_component(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 2;
                    }
                    // malformed escapes are kept as-is
                    _ => out.push(b'%'),
                }
            }
            c => out.push(c),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits an `application/x-www-form-urlencoded` query string.
pub fn parse_query(querystring: &str) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if querystring.is_empty() {
        return query;
    }
    for pair in querystring.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.find('=') {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, ""),
        };
        query.push((decode_component(name), decode_component(value)));
    }
    query
}
