//! Event-driven HTTP/1.x wire parser.
//!
//! The parser is a byte-consuming state machine that is completely
//! independent of the I/O layer: bytes go in through `execute`, events come
//! out through the `Events` sink. Span callbacks (`on_url`, `on_header_*`,
//! `on_body`) reference sub-slices of the `execute` input and may be emitted
//! in several parts when a span crosses a read boundary; sinks accumulate.
//!
//! A hand-written machine is used instead of a generated state table; the
//! observable contract (event sequence, error code table, flag semantics)
//! is what the rest of the crate relies on.

mod error;
pub mod url;

pub use self::error::{ErrorKind, ParseError};

use enums::Method;

/// What kind of messages the parser expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
    /// Auto-detect from the first byte: `H` starts a response,
    /// anything else a request.
    Both,
}

/// Result of a plain event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Ok,
    Pause,
    Error,
}

/// Result of the `on_headers_complete` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersResult {
    Ok,
    /// The message has no body (e.g. a response to a HEAD request).
    SkipBody,
    /// Treat the message as an upgrade with no body.
    UpgradeSkipBody,
    Pause,
    Error,
}

/// Message summary passed to `on_headers_complete`.
#[derive(Debug, Clone)]
pub struct Head {
    pub method: Option<Method>,
    pub status_code: u16,
    pub http_major: u8,
    pub http_minor: u8,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub upgrade: bool,
    pub keep_alive: bool,
}

/// Event sink driven by `Parser::execute`.
///
/// Every method has a no-op default so sinks only implement what they need.
pub trait Events {
    fn on_message_begin(&mut self) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_url(&mut self, _span: &[u8]) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_status(&mut self, _span: &[u8]) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_header_field(&mut self, _span: &[u8]) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_header_value(&mut self, _span: &[u8]) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_headers_complete(&mut self, _head: &Head) -> HeadersResult {
        HeadersResult::Ok
    }
    fn on_body(&mut self, _span: &[u8]) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_message_complete(&mut self) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_chunk_header(&mut self, _size: u64) -> CallbackResult {
        CallbackResult::Ok
    }
    fn on_chunk_complete(&mut self) -> CallbackResult {
        CallbackResult::Ok
    }
}

/// Successful (or cooperatively interrupted) outcome of `execute`.
///
/// The `usize` carried by the paused variants is the number of input bytes
/// consumed before the parser stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The whole input was consumed; feed more bytes when available.
    Ok,
    /// A callback requested a pause.
    Paused(usize),
    /// The message completed and carries an upgrade; the bytes after the
    /// consumed prefix belong to the upgraded protocol.
    PausedUpgrade(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartReq,
    StartRes,
    StartBoth,
    // request line
    ReqMethod,
    ReqSpacesBeforeUrl,
    ReqUrl,
    ReqHttp(u8),
    ReqMajor,
    ReqDot,
    ReqMinor,
    ReqLineAlmostDone,
    ReqLineLf,
    // response status line
    ResHttp(u8),
    ResMajor,
    ResDot,
    ResMinor,
    ResSpaceBeforeStatus,
    ResStatus,
    ResReasonStart,
    ResReason,
    ResLineAlmostDone,
    // header section (headers and chunked trailers)
    HeaderFieldStart,
    HeaderField,
    HeaderValueDiscardWs,
    HeaderValue,
    HeaderAlmostDone,
    HeaderFold,
    HeadersAlmostDone,
    // message body
    BodyIdentity,
    BodyIdentityEof,
    ChunkSizeStart,
    ChunkSize,
    ChunkExt,
    ChunkSizeAlmostDone,
    ChunkData,
    ChunkDataAlmostDone,
    ChunkDataDone,
    // no more messages (after `finish` or upgrade)
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Special {
    None,
    Connection,
    ContentLength,
    TransferEncoding,
    Upgrade,
}

fn is_token(c: u8) -> bool {
    match c {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-'
        | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => true,
        _ => c.is_ascii_alphanumeric(),
    }
}

fn is_url_char(c: u8) -> bool {
    c > 0x20 && c != 0x7f
}

fn is_value_char(c: u8) -> bool {
    c == b'\t' || (c >= 0x20 && c != 0x7f)
}

const MAX_FIELD_MATCH: usize = 17; // "transfer-encoding"

/// The wire parser itself.
///
/// One instance parses a sequence of messages; it re-arms automatically
/// after `message_complete` and is `reset` by the connection between
/// kept-alive requests.
#[derive(Debug)]
pub struct Parser {
    kind: Kind,
    msg_is_request: bool,
    state: State,
    lenient: bool,
    paused: bool,
    error: Option<ParseError>,

    method: Option<Method>,
    method_buf: Vec<u8>,
    http_major: u8,
    http_minor: u8,
    status_code: u16,

    field_buf: String,
    special: Special,
    value_buf: String,
    value_pending: bool,
    have_header: bool,

    content_length: Option<u64>,
    te_seen: bool,
    chunked: bool,
    conn_close: bool,
    conn_keep_alive: bool,
    conn_upgrade: bool,
    upgrade_seen: bool,
    upgrade: bool,
    skipbody: bool,
    trailing: bool,
    needs_eof: bool,

    body_left: u64,
    chunk_size: u64,
}

impl Parser {
    pub fn new(kind: Kind) -> Parser {
        Parser {
            kind: kind,
            msg_is_request: kind != Kind::Response,
            state: match kind {
                Kind::Request => State::StartReq,
                Kind::Response => State::StartRes,
                Kind::Both => State::StartBoth,
            },
            lenient: false,
            paused: false,
            error: None,
            method: None,
            method_buf: Vec::new(),
            http_major: 0,
            http_minor: 0,
            status_code: 0,
            field_buf: String::new(),
            special: Special::None,
            value_buf: String::new(),
            value_pending: false,
            have_header: false,
            content_length: None,
            te_seen: false,
            chunked: false,
            conn_close: false,
            conn_keep_alive: false,
            conn_upgrade: false,
            upgrade_seen: false,
            upgrade: false,
            skipbody: false,
            trailing: false,
            needs_eof: false,
            body_left: 0,
            chunk_size: 0,
        }
    }

    /// Lenient mode admits obs-fold header continuations and a message that
    /// carries both `Content-Length` and `Transfer-Encoding`.
    pub fn set_lenient(&mut self, lenient: bool) {
        self.lenient = lenient;
    }

    /// Re-initializes the parser, keeping kind and leniency.
    pub fn reset(&mut self) {
        let lenient = self.lenient;
        *self = Parser::new(self.kind);
        self.lenient = lenient;
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn http_major(&self) -> u8 {
        self.http_major
    }

    pub fn http_minor(&self) -> u8 {
        self.http_minor
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    pub fn last_error(&self) -> Option<ParseError> {
        self.error
    }

    /// Keep-alive decision for the message whose headers were parsed last.
    pub fn should_keep_alive(&self) -> bool {
        if self.http_major == 1 && self.http_minor >= 1 {
            if self.conn_close {
                return false;
            }
        } else {
            if !self.conn_keep_alive {
                return false;
            }
        }
        !self.needs_eof
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn resume_after_upgrade(&mut self) {
        self.paused = false;
    }

    /// Signals end of input.
    ///
    /// Required for messages whose body runs until connection close; an EOF
    /// in the middle of a message is `invalid_eof_state`.
    pub fn finish<E: Events>(&mut self, ev: &mut E)
        -> Result<(), ParseError>
    {
        if let Some(err) = self.error {
            return Err(err);
        }
        match self.state {
            State::BodyIdentityEof => {
                if ev.on_message_complete() == CallbackResult::Error {
                    return Err(self.record(ErrorKind::CbMessageComplete, 0));
                }
                self.state = State::Dead;
                Ok(())
            }
            State::StartReq | State::StartRes | State::StartBoth
            | State::Dead => {
                self.state = State::Dead;
                Ok(())
            }
            _ => Err(self.record(ErrorKind::InvalidEofState, 0)),
        }
    }

    fn record(&mut self, kind: ErrorKind, pos: usize) -> ParseError {
        let err = ParseError::new(kind, pos);
        self.error = Some(err);
        err
    }

    fn reset_message(&mut self) {
        self.method = None;
        self.method_buf.clear();
        self.http_major = 0;
        self.http_minor = 0;
        self.status_code = 0;
        self.field_buf.clear();
        self.special = Special::None;
        self.value_buf.clear();
        self.value_pending = false;
        self.have_header = false;
        self.content_length = None;
        self.te_seen = false;
        self.chunked = false;
        self.conn_close = false;
        self.conn_keep_alive = false;
        self.conn_upgrade = false;
        self.upgrade_seen = false;
        self.upgrade = false;
        self.skipbody = false;
        self.trailing = false;
        self.needs_eof = false;
        self.body_left = 0;
        self.chunk_size = 0;
    }

    fn start_state(&self) -> State {
        match self.kind {
            Kind::Request => State::StartReq,
            Kind::Response => State::StartRes,
            Kind::Both => State::StartBoth,
        }
    }

    /// Applies the collected value of a special header once the header line
    /// (including any folds) is over.
    fn finalize_value(&mut self, pos: usize) -> Result<(), ParseError> {
        if !self.value_pending {
            return Ok(());
        }
        self.value_pending = false;
        match self.special {
            Special::None => {}
            Special::Upgrade => {
                self.upgrade_seen = true;
            }
            Special::Connection => {
                let value = ::std::mem::replace(
                    &mut self.value_buf, String::new());
                for token in value.split(',') {
                    let token = token.trim_matches(
                        |c| c == ' ' || c == '\t');
                    if token.eq_ignore_ascii_case("close") {
                        self.conn_close = true;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        self.conn_keep_alive = true;
                    } else if token.eq_ignore_ascii_case("upgrade") {
                        self.conn_upgrade = true;
                    }
                }
            }
            Special::ContentLength => {
                let value = ::std::mem::replace(
                    &mut self.value_buf, String::new());
                let digits = value.trim_matches(|c| c == ' ' || c == '\t');
                if digits.is_empty() {
                    return Err(
                        self.record(ErrorKind::InvalidContentLength, pos));
                }
                let mut parsed: u64 = 0;
                for c in digits.bytes() {
                    if !c.is_ascii_digit() {
                        return Err(self.record(
                            ErrorKind::InvalidContentLength, pos));
                    }
                    parsed = match parsed.checked_mul(10)
                        .and_then(|v| v.checked_add((c - b'0') as u64))
                    {
                        Some(v) => v,
                        None => return Err(self.record(
                            ErrorKind::InvalidContentLength, pos)),
                    };
                }
                if let Some(previous) = self.content_length {
                    if previous != parsed {
                        return Err(self.record(
                            ErrorKind::InvalidContentLength, pos));
                    }
                }
                self.content_length = Some(parsed);
            }
            Special::TransferEncoding => {
                self.te_seen = true;
                let value = ::std::mem::replace(
                    &mut self.value_buf, String::new());
                let last = value.split(',').last().unwrap_or("");
                let last = last.trim_matches(|c| c == ' ' || c == '\t');
                self.chunked = last.eq_ignore_ascii_case("chunked");
            }
        }
        self.value_buf.clear();
        self.special = Special::None;
        Ok(())
    }

    fn message_needs_eof(&self) -> bool {
        if self.msg_is_request {
            return false;
        }
        if self.status_code / 100 == 1 || self.status_code == 204
            || self.status_code == 304 || self.skipbody
        {
            return false;
        }
        if self.chunked || self.content_length.is_some() {
            return false;
        }
        true
    }

    /// Headers are in; selects the body kind and may complete the message.
    fn headers_done<E: Events>(&mut self, ev: &mut E, pos: usize)
        -> Result<Option<Status>, ParseError>
    {
        self.finalize_value(pos)?;
        if self.trailing {
            match ev.on_chunk_complete() {
                CallbackResult::Ok => {}
                CallbackResult::Pause => self.paused = true,
                CallbackResult::Error => {
                    return Err(self.record(ErrorKind::CbChunkComplete, pos));
                }
            }
            return self.message_done(ev, pos).map(Some);
        }

        if self.content_length.is_some() && self.te_seen && !self.lenient {
            return Err(
                self.record(ErrorKind::UnexpectedContentLength, pos));
        }
        self.upgrade = (self.conn_upgrade && self.upgrade_seen)
            || self.method == Some(Method::Connect);
        self.needs_eof = self.message_needs_eof();

        let head = Head {
            method: self.method,
            status_code: self.status_code,
            http_major: self.http_major,
            http_minor: self.http_minor,
            content_length: self.content_length,
            chunked: self.chunked,
            upgrade: self.upgrade,
            keep_alive: self.should_keep_alive(),
        };
        let mut pause_requested = false;
        match ev.on_headers_complete(&head) {
            HeadersResult::Ok => {}
            HeadersResult::SkipBody => self.skipbody = true,
            HeadersResult::UpgradeSkipBody => {
                self.skipbody = true;
                self.upgrade = true;
            }
            HeadersResult::Pause => pause_requested = true,
            HeadersResult::Error => {
                return Err(self.record(ErrorKind::CbHeadersComplete, pos));
            }
        }
        // recompute: skipbody influences the EOF decision for responses
        self.needs_eof = self.message_needs_eof();

        let has_body = self.chunked
            || self.content_length.map_or(false, |n| n > 0);
        if self.upgrade
            && (self.method == Some(Method::Connect) || self.skipbody
                || !has_body)
        {
            return self.message_done(ev, pos).map(Some);
        }
        if self.skipbody {
            return self.message_done(ev, pos).map(Some);
        }
        if self.chunked {
            self.state = State::ChunkSizeStart;
        } else if self.te_seen {
            // transfer-encoding without chunked as the last coding
            if self.msg_is_request {
                return Err(
                    self.record(ErrorKind::InvalidTransferEncoding, pos));
            }
            self.state = State::BodyIdentityEof;
        } else {
            match self.content_length {
                Some(0) => return self.message_done(ev, pos).map(Some),
                Some(n) => {
                    self.body_left = n;
                    self.state = State::BodyIdentity;
                }
                None => {
                    if self.needs_eof {
                        self.state = State::BodyIdentityEof;
                    } else {
                        return self.message_done(ev, pos).map(Some);
                    }
                }
            }
        }
        if pause_requested {
            self.paused = true;
            return Ok(Some(Status::Paused(pos + 1)));
        }
        Ok(None)
    }

    fn message_done<E: Events>(&mut self, ev: &mut E, pos: usize)
        -> Result<Status, ParseError>
    {
        match ev.on_message_complete() {
            CallbackResult::Ok => {}
            CallbackResult::Pause => self.paused = true,
            CallbackResult::Error => {
                return Err(self.record(ErrorKind::CbMessageComplete, pos));
            }
        }
        if self.upgrade {
            self.paused = true;
            self.state = State::Dead;
            return Ok(Status::PausedUpgrade(pos + 1));
        }
        self.state = self.start_state();
        if self.paused {
            return Ok(Status::Paused(pos + 1));
        }
        Ok(Status::Ok)
    }

    /// Feeds a slice of input to the parser.
    ///
    /// On `Status::Ok` the whole slice was consumed. The paused statuses
    /// report how many bytes were consumed; the rest of the slice has not
    /// been looked at. After a fatal error every call reports the same
    /// error until `reset`.
    pub fn execute<E: Events>(&mut self, ev: &mut E, data: &[u8])
        -> Result<Status, ParseError>
    {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.paused {
            return Err(ParseError::new(ErrorKind::Paused, 0));
        }

        let len = data.len();
        let mut i = 0;
        // span starts; zero means "continues from the previous buffer"
        let mut url_start = 0;
        let mut field_start = 0;
        let mut value_start = 0;
        let mut reason_start = 0;

        macro_rules! fail {
            ($kind:expr) => {
                return Err(self.record($kind, i))
            };
        }
        macro_rules! cb {
            ($call:expr, $kind:expr) => {
                match $call {
                    CallbackResult::Ok => {}
                    CallbackResult::Pause => {
                        self.paused = true;
                    }
                    CallbackResult::Error => fail!($kind),
                }
            };
        }

        while i < len {
            let c = data[i];
            match self.state {
                State::Dead => fail!(ErrorKind::ClosedConnection),

                State::StartReq | State::StartRes | State::StartBoth => {
                    if c == b'\r' || c == b'\n' {
                        i += 1;
                        continue;
                    }
                    self.reset_message();
                    cb!(ev.on_message_begin(), ErrorKind::CbMessageBegin);
                    match self.state {
                        State::StartRes => {
                            self.msg_is_request = false;
                            if c != b'H' {
                                fail!(ErrorKind::InvalidConstant);
                            }
                            self.state = State::ResHttp(1);
                            i += 1;
                        }
                        State::StartBoth if c == b'H' => {
                            self.msg_is_request = false;
                            self.state = State::ResHttp(1);
                            i += 1;
                        }
                        _ => {
                            self.msg_is_request = true;
                            if !is_token(c) {
                                fail!(ErrorKind::InvalidMethod);
                            }
                            self.method_buf.clear();
                            self.method_buf.push(c);
                            self.state = State::ReqMethod;
                            i += 1;
                        }
                    }
                }

                State::ReqMethod => {
                    if c == b' ' {
                        self.method =
                            Method::from_token(&self.method_buf);
                        if self.method.is_none() {
                            fail!(ErrorKind::InvalidMethod);
                        }
                        self.state = State::ReqSpacesBeforeUrl;
                    } else if is_token(c) {
                        if self.method_buf.len() >= 32 {
                            fail!(ErrorKind::InvalidMethod);
                        }
                        self.method_buf.push(c);
                    } else {
                        fail!(ErrorKind::InvalidMethod);
                    }
                    i += 1;
                }

                State::ReqSpacesBeforeUrl => {
                    if c == b' ' {
                        i += 1;
                    } else if is_url_char(c) {
                        self.state = State::ReqUrl;
                        url_start = i;
                    } else {
                        fail!(ErrorKind::InvalidUrl);
                    }
                }

                State::ReqUrl => {
                    if c == b' ' {
                        cb!(ev.on_url(&data[url_start..i]),
                            ErrorKind::User);
                        self.state = State::ReqHttp(0);
                        i += 1;
                    } else if is_url_char(c) {
                        i += 1;
                    } else {
                        fail!(ErrorKind::InvalidUrl);
                    }
                }

                State::ReqHttp(n) => {
                    let expected = b"HTTP/";
                    if n as usize >= expected.len() {
                        fail!(ErrorKind::Internal);
                    }
                    if c != expected[n as usize] {
                        fail!(ErrorKind::InvalidConstant);
                    }
                    self.state = if (n as usize) + 1 == expected.len() {
                        State::ReqMajor
                    } else {
                        State::ReqHttp(n + 1)
                    };
                    i += 1;
                }

                State::ResHttp(n) => {
                    let expected = b"HTTP/";
                    if n as usize >= expected.len() {
                        fail!(ErrorKind::Internal);
                    }
                    if c != expected[n as usize] {
                        fail!(ErrorKind::InvalidConstant);
                    }
                    self.state = if (n as usize) + 1 == expected.len() {
                        State::ResMajor
                    } else {
                        State::ResHttp(n + 1)
                    };
                    i += 1;
                }

                State::ReqMajor | State::ResMajor => {
                    if !c.is_ascii_digit() {
                        fail!(ErrorKind::InvalidVersion);
                    }
                    self.http_major = c - b'0';
                    self.state = if self.state == State::ReqMajor {
                        State::ReqDot
                    } else {
                        State::ResDot
                    };
                    i += 1;
                }

                State::ReqDot | State::ResDot => {
                    if c != b'.' {
                        fail!(ErrorKind::InvalidVersion);
                    }
                    self.state = if self.state == State::ReqDot {
                        State::ReqMinor
                    } else {
                        State::ResMinor
                    };
                    i += 1;
                }

                State::ReqMinor | State::ResMinor => {
                    if !c.is_ascii_digit() {
                        fail!(ErrorKind::InvalidVersion);
                    }
                    self.http_minor = c - b'0';
                    match (self.http_major, self.http_minor) {
                        (1, 0) | (1, 1) | (2, 0) => {}
                        _ => fail!(ErrorKind::InvalidVersion),
                    }
                    self.state = if self.state == State::ReqMinor {
                        State::ReqLineAlmostDone
                    } else {
                        State::ResSpaceBeforeStatus
                    };
                    i += 1;
                }

                State::ReqLineAlmostDone => {
                    match c {
                        b'\r' => {
                            self.state = State::ReqLineLf;
                            i += 1;
                        }
                        b'\n' => {
                            self.state = State::HeaderFieldStart;
                            i += 1;
                        }
                        _ => fail!(ErrorKind::InvalidVersion),
                    }
                }

                State::ReqLineLf => {
                    if c != b'\n' {
                        fail!(ErrorKind::LfExpected);
                    }
                    self.state = State::HeaderFieldStart;
                    i += 1;
                }

                State::ResSpaceBeforeStatus => {
                    if c == b' ' {
                        i += 1;
                    } else if c.is_ascii_digit() {
                        self.status_code = 0;
                        self.state = State::ResStatus;
                    } else {
                        fail!(ErrorKind::InvalidStatus);
                    }
                }

                State::ResStatus => {
                    if c.is_ascii_digit() {
                        self.status_code =
                            self.status_code * 10 + (c - b'0') as u16;
                        if self.status_code > 999 {
                            fail!(ErrorKind::InvalidStatus);
                        }
                        i += 1;
                    } else if c == b' ' {
                        self.state = State::ResReasonStart;
                        i += 1;
                    } else if c == b'\r' {
                        self.state = State::ResLineAlmostDone;
                        i += 1;
                    } else if c == b'\n' {
                        self.state = State::HeaderFieldStart;
                        i += 1;
                    } else {
                        fail!(ErrorKind::InvalidStatus);
                    }
                }

                State::ResReasonStart => {
                    if c == b'\r' {
                        self.state = State::ResLineAlmostDone;
                        i += 1;
                    } else if c == b'\n' {
                        self.state = State::HeaderFieldStart;
                        i += 1;
                    } else if is_value_char(c) {
                        self.state = State::ResReason;
                        reason_start = i;
                    } else {
                        fail!(ErrorKind::InvalidStatus);
                    }
                }

                State::ResReason => {
                    if c == b'\r' || c == b'\n' {
                        cb!(ev.on_status(&data[reason_start..i]),
                            ErrorKind::User);
                        self.state = if c == b'\r' {
                            State::ResLineAlmostDone
                        } else {
                            State::HeaderFieldStart
                        };
                        i += 1;
                    } else if is_value_char(c) {
                        i += 1;
                    } else {
                        fail!(ErrorKind::InvalidStatus);
                    }
                }

                State::ResLineAlmostDone => {
                    if c != b'\n' {
                        fail!(ErrorKind::LfExpected);
                    }
                    self.state = State::HeaderFieldStart;
                    i += 1;
                }

                State::HeaderFieldStart => {
                    if c == b'\r' {
                        self.state = State::HeadersAlmostDone;
                        i += 1;
                    } else if c == b'\n' {
                        self.state = State::HeadersAlmostDone;
                        // re-dispatch as the LF of the empty line
                    } else if (c == b' ' || c == b'\t') && self.have_header {
                        // obs-fold: continuation of the previous value
                        if !self.lenient {
                            fail!(ErrorKind::InvalidHeaderToken);
                        }
                        self.state = State::HeaderFold;
                        i += 1;
                    } else if is_token(c) {
                        self.finalize_value(i)?;
                        self.field_buf.clear();
                        self.state = State::HeaderField;
                        field_start = i;
                    } else {
                        fail!(ErrorKind::InvalidHeaderToken);
                    }
                }

                State::HeaderField => {
                    if is_token(c) {
                        if self.field_buf.len() < MAX_FIELD_MATCH {
                            self.field_buf
                                .push(c.to_ascii_lowercase() as char);
                        } else {
                            // longer than any special header name
                            self.field_buf.clear();
                            self.field_buf.push('\0');
                        }
                        i += 1;
                    } else if c == b':' {
                        if i > field_start {
                            cb!(ev.on_header_field(&data[field_start..i]),
                                ErrorKind::User);
                        }
                        self.special = match &self.field_buf[..] {
                            "connection" => Special::Connection,
                            "content-length" => Special::ContentLength,
                            "transfer-encoding" => Special::TransferEncoding,
                            "upgrade" => Special::Upgrade,
                            _ => Special::None,
                        };
                        self.state = State::HeaderValueDiscardWs;
                        i += 1;
                    } else {
                        fail!(ErrorKind::InvalidHeaderToken);
                    }
                }

                State::HeaderValueDiscardWs => {
                    if c == b' ' || c == b'\t' {
                        i += 1;
                    } else if c == b'\r' || c == b'\n' {
                        // empty value
                        cb!(ev.on_header_value(b""), ErrorKind::User);
                        self.value_pending = true;
                        self.have_header = true;
                        self.state = if c == b'\r' {
                            State::HeaderAlmostDone
                        } else {
                            State::HeaderFieldStart
                        };
                        i += 1;
                    } else if is_value_char(c) {
                        self.state = State::HeaderValue;
                        value_start = i;
                    } else {
                        fail!(ErrorKind::InvalidHeaderToken);
                    }
                }

                State::HeaderValue => {
                    if c == b'\r' || c == b'\n' {
                        let span = &data[value_start..i];
                        cb!(ev.on_header_value(span), ErrorKind::User);
                        if self.special != Special::None {
                            self.value_buf.push_str(
                                &String::from_utf8_lossy(span));
                        }
                        self.value_pending = true;
                        self.have_header = true;
                        self.state = if c == b'\r' {
                            State::HeaderAlmostDone
                        } else {
                            State::HeaderFieldStart
                        };
                        i += 1;
                    } else if is_value_char(c) {
                        i += 1;
                    } else {
                        fail!(ErrorKind::InvalidHeaderToken);
                    }
                }

                State::HeaderAlmostDone => {
                    if c != b'\n' {
                        fail!(ErrorKind::LfExpected);
                    }
                    self.state = State::HeaderFieldStart;
                    i += 1;
                }

                State::HeaderFold => {
                    if c == b' ' || c == b'\t' {
                        i += 1;
                    } else if is_value_char(c) {
                        // the fold is normalized to a single SP
                        cb!(ev.on_header_value(b" "), ErrorKind::User);
                        if self.special != Special::None {
                            self.value_buf.push(' ');
                        }
                        self.state = State::HeaderValue;
                        value_start = i;
                    } else {
                        fail!(ErrorKind::InvalidHeaderToken);
                    }
                }

                State::HeadersAlmostDone => {
                    if c != b'\n' {
                        fail!(ErrorKind::LfExpected);
                    }
                    if let Some(status) = self.headers_done(ev, i)? {
                        match status {
                            Status::Ok => {
                                i += 1;
                                continue;
                            }
                            other => return Ok(other),
                        }
                    }
                    i += 1;
                }

                State::BodyIdentity => {
                    let avail = (len - i) as u64;
                    let take = ::std::cmp::min(self.body_left, avail)
                        as usize;
                    cb!(ev.on_body(&data[i..i + take]), ErrorKind::User);
                    self.body_left -= take as u64;
                    let pos = i + take - 1;
                    i += take;
                    if self.body_left == 0 {
                        match self.message_done(ev, pos)? {
                            Status::Ok => {}
                            other => return Ok(other),
                        }
                    }
                }

                State::BodyIdentityEof => {
                    cb!(ev.on_body(&data[i..]), ErrorKind::User);
                    i = len;
                }

                State::ChunkSizeStart => {
                    let digit = hex_digit(c);
                    match digit {
                        Some(v) => {
                            self.chunk_size = v as u64;
                            self.state = State::ChunkSize;
                            i += 1;
                        }
                        None => fail!(ErrorKind::InvalidChunkSize),
                    }
                }

                State::ChunkSize => {
                    if let Some(v) = hex_digit(c) {
                        self.chunk_size = match self
                            .chunk_size
                            .checked_mul(16)
                            .and_then(|x| x.checked_add(v as u64))
                        {
                            Some(x) => x,
                            None => fail!(ErrorKind::InvalidChunkSize),
                        };
                        i += 1;
                    } else if c == b';' {
                        self.state = State::ChunkExt;
                        i += 1;
                    } else if c == b'\r' {
                        self.state = State::ChunkSizeAlmostDone;
                        i += 1;
                    } else if c == b'\n' {
                        self.state = State::ChunkSizeAlmostDone;
                    } else {
                        fail!(ErrorKind::InvalidChunkSize);
                    }
                }

                State::ChunkExt => {
                    if c == b'\r' {
                        self.state = State::ChunkSizeAlmostDone;
                        i += 1;
                    } else if c == b'\n' {
                        self.state = State::ChunkSizeAlmostDone;
                    } else if is_value_char(c) {
                        i += 1;
                    } else {
                        fail!(ErrorKind::InvalidChunkSize);
                    }
                }

                State::ChunkSizeAlmostDone => {
                    if c != b'\n' {
                        fail!(ErrorKind::LfExpected);
                    }
                    cb!(ev.on_chunk_header(self.chunk_size),
                        ErrorKind::CbChunkHeader);
                    if self.chunk_size == 0 {
                        self.trailing = true;
                        self.state = State::HeaderFieldStart;
                    } else {
                        self.body_left = self.chunk_size;
                        self.state = State::ChunkData;
                    }
                    i += 1;
                }

                State::ChunkData => {
                    let avail = (len - i) as u64;
                    let take = ::std::cmp::min(self.body_left, avail)
                        as usize;
                    cb!(ev.on_body(&data[i..i + take]), ErrorKind::User);
                    self.body_left -= take as u64;
                    i += take;
                    if self.body_left == 0 {
                        self.state = State::ChunkDataAlmostDone;
                    }
                }

                State::ChunkDataAlmostDone => {
                    if c == b'\r' {
                        self.state = State::ChunkDataDone;
                        i += 1;
                    } else if c == b'\n' {
                        self.state = State::ChunkDataDone;
                    } else {
                        fail!(ErrorKind::InvalidChunkSize);
                    }
                }

                State::ChunkDataDone => {
                    if c != b'\n' {
                        fail!(ErrorKind::LfExpected);
                    }
                    cb!(ev.on_chunk_complete(), ErrorKind::CbChunkComplete);
                    self.state = State::ChunkSizeStart;
                    i += 1;
                }
            }
            if self.paused && self.error.is_none() {
                // a span callback asked to pause
                return Ok(Status::Paused(i));
            }
        }

        // flush spans that continue into the next buffer
        match self.state {
            State::ReqUrl => {
                cb!(ev.on_url(&data[url_start..]), ErrorKind::User);
            }
            State::ResReason => {
                cb!(ev.on_status(&data[reason_start..]), ErrorKind::User);
            }
            State::HeaderField => {
                if len > field_start {
                    cb!(ev.on_header_field(&data[field_start..]),
                        ErrorKind::User);
                }
            }
            State::HeaderValue => {
                let span = &data[value_start..];
                cb!(ev.on_header_value(span), ErrorKind::User);
                if self.special != Special::None {
                    self.value_buf.push_str(&String::from_utf8_lossy(span));
                }
            }
            _ => {}
        }
        if self.paused {
            return Ok(Status::Paused(len));
        }
        Ok(Status::Ok)
    }
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'...b'9' => Some(c - b'0'),
        b'a'...b'f' => Some(c - b'a' + 10),
        b'A'...b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::{CallbackResult, Events, Head, HeadersResult, Kind, Parser};
    use super::{ErrorKind, Status};
    use enums::Method;

    #[derive(Debug, Default)]
    struct Sink {
        begun: usize,
        url: Vec<u8>,
        status: Vec<u8>,
        fields: Vec<String>,
        values: Vec<String>,
        last_was_value: bool,
        headers_complete: usize,
        head: Option<Head>,
        body: Vec<u8>,
        complete: usize,
        chunk_headers: Vec<u64>,
        chunks_complete: usize,
        pause_on_complete: bool,
    }

    impl Events for Sink {
        fn on_message_begin(&mut self) -> CallbackResult {
            self.begun += 1;
            CallbackResult::Ok
        }
        fn on_url(&mut self, span: &[u8]) -> CallbackResult {
            self.url.extend(span);
            CallbackResult::Ok
        }
        fn on_status(&mut self, span: &[u8]) -> CallbackResult {
            self.status.extend(span);
            CallbackResult::Ok
        }
        fn on_header_field(&mut self, span: &[u8]) -> CallbackResult {
            if self.last_was_value || self.fields.is_empty() {
                self.fields.push(String::new());
                self.values.push(String::new());
                self.last_was_value = false;
            }
            let last = self.fields.last_mut().unwrap();
            last.push_str(&String::from_utf8_lossy(span));
            CallbackResult::Ok
        }
        fn on_header_value(&mut self, span: &[u8]) -> CallbackResult {
            self.last_was_value = true;
            let last = self.values.last_mut().unwrap();
            last.push_str(&String::from_utf8_lossy(span));
            CallbackResult::Ok
        }
        fn on_headers_complete(&mut self, head: &Head) -> HeadersResult {
            self.headers_complete += 1;
            self.head = Some(head.clone());
            HeadersResult::Ok
        }
        fn on_body(&mut self, span: &[u8]) -> CallbackResult {
            self.body.extend(span);
            CallbackResult::Ok
        }
        fn on_message_complete(&mut self) -> CallbackResult {
            self.complete += 1;
            if self.pause_on_complete {
                CallbackResult::Pause
            } else {
                CallbackResult::Ok
            }
        }
        fn on_chunk_header(&mut self, size: u64) -> CallbackResult {
            self.chunk_headers.push(size);
            CallbackResult::Ok
        }
        fn on_chunk_complete(&mut self) -> CallbackResult {
            self.chunks_complete += 1;
            CallbackResult::Ok
        }
    }

    fn parse(data: &[u8]) -> (Sink, Result<Status, super::ParseError>) {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        let result = parser.execute(&mut sink, data);
        (sink, result)
    }

    #[test]
    fn simple_get() {
        let (sink, result) =
            parse(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        result.unwrap();
        assert_eq!(sink.begun, 1);
        assert_eq!(&sink.url, b"/hello");
        assert_eq!(sink.fields, vec!["Host".to_string()]);
        assert_eq!(sink.values, vec!["x".to_string()]);
        assert_eq!(sink.headers_complete, 1);
        assert_eq!(sink.complete, 1);
        let head = sink.head.unwrap();
        assert_eq!(head.method, Some(Method::Get));
        assert_eq!(head.http_major, 1);
        assert_eq!(head.http_minor, 1);
        assert!(head.keep_alive);
    }

    #[test]
    fn split_across_reads() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        let data = b"POST /long/path HTTP/1.1\r\nContent-Length: 5\r\n\
            \r\nhello";
        for chunk in data.chunks(3) {
            parser.execute(&mut sink, chunk).unwrap();
        }
        assert_eq!(&sink.url, b"/long/path");
        assert_eq!(&sink.body, b"hello");
        assert_eq!(sink.complete, 1);
        assert_eq!(parser.content_length(), Some(5));
    }

    #[test]
    fn event_order_with_body() {
        let (sink, result) = parse(
            b"PUT /u HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\nok");
        result.unwrap();
        assert_eq!(sink.begun, 1);
        assert_eq!(sink.headers_complete, 1);
        assert_eq!(&sink.body, b"ok");
        assert_eq!(sink.complete, 1);
    }

    #[test]
    fn keep_alive_flags() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(parser.should_keep_alive());

        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!parser.should_keep_alive());

        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink, b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!parser.should_keep_alive());
    }

    #[test]
    fn invalid_version() {
        let (_, result) = parse(b"GET /x HTTP/9.9\r\n\r\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidVersion);
    }

    #[test]
    fn invalid_method() {
        let (_, result) = parse(b"GETT /x HTTP/1.1\r\n\r\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidMethod);
    }

    #[test]
    fn error_is_sticky() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        let err = parser
            .execute(&mut sink, b"GET /x HTTP/9.9\r\n\r\n")
            .unwrap_err();
        let again = parser.execute(&mut sink, b"GET / HTTP/1.1\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, again);
    }

    #[test]
    fn chunked_body() {
        let (sink, result) = parse(
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n");
        result.unwrap();
        assert_eq!(&sink.body, b"abcdefg");
        assert_eq!(sink.chunk_headers, vec![3, 4, 0]);
        assert_eq!(sink.chunks_complete, 3);
        assert_eq!(sink.complete, 1);
    }

    #[test]
    fn chunk_extensions_are_skipped() {
        let (sink, result) = parse(
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              3;name=value\r\nabc\r\n0\r\n\r\n");
        result.unwrap();
        assert_eq!(&sink.body, b"abc");
    }

    #[test]
    fn chunked_trailers() {
        let (sink, result) = parse(
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              2\r\nhi\r\n0\r\nTrailer: yes\r\n\r\n");
        result.unwrap();
        assert_eq!(&sink.body, b"hi");
        assert_eq!(sink.complete, 1);
        assert_eq!(sink.fields.last().unwrap(), "Trailer");
        assert_eq!(sink.values.last().unwrap(), "yes");
    }

    #[test]
    fn chunk_size_overflow() {
        let (_, result) = parse(
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              ffffffffffffffffff\r\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidChunkSize);
    }

    #[test]
    fn content_length_overflow() {
        let (_, result) = parse(
            b"POST /c HTTP/1.1\r\nContent-Length: 99999999999999999999\r\n\
              \r\n");
        assert_eq!(result.unwrap_err().kind,
            ErrorKind::InvalidContentLength);
    }

    #[test]
    fn duplicate_content_length_disagreeing() {
        let (_, result) = parse(
            b"POST /c HTTP/1.1\r\nContent-Length: 2\r\n\
              Content-Length: 3\r\n\r\n");
        assert_eq!(result.unwrap_err().kind,
            ErrorKind::InvalidContentLength);
    }

    #[test]
    fn duplicate_content_length_agreeing() {
        let (sink, result) = parse(
            b"POST /c HTTP/1.1\r\nContent-Length: 2\r\n\
              Content-Length: 2\r\n\r\nhi");
        result.unwrap();
        assert_eq!(&sink.body, b"hi");
    }

    #[test]
    fn length_with_transfer_encoding_is_rejected() {
        let (_, result) = parse(
            b"POST /c HTTP/1.1\r\nContent-Length: 2\r\n\
              Transfer-Encoding: chunked\r\n\r\n");
        assert_eq!(result.unwrap_err().kind,
            ErrorKind::UnexpectedContentLength);
    }

    #[test]
    fn length_with_transfer_encoding_lenient() {
        let mut parser = Parser::new(Kind::Request);
        parser.set_lenient(true);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"POST /c HTTP/1.1\r\nContent-Length: 3\r\n\
              Transfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n")
            .unwrap();
        assert_eq!(&sink.body, b"hi");
    }

    #[test]
    fn transfer_encoding_without_chunked_last() {
        let (_, result) = parse(
            b"POST /c HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n");
        assert_eq!(result.unwrap_err().kind,
            ErrorKind::InvalidTransferEncoding);
    }

    #[test]
    fn obs_fold_rejected_when_strict() {
        let (_, result) = parse(
            b"GET / HTTP/1.1\r\nX-Long: part\r\n more\r\n\r\n");
        assert_eq!(result.unwrap_err().kind,
            ErrorKind::InvalidHeaderToken);
    }

    #[test]
    fn obs_fold_normalized_when_lenient() {
        let mut parser = Parser::new(Kind::Request);
        parser.set_lenient(true);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"GET / HTTP/1.1\r\nX-Long: part\r\n  more\r\n\r\n").unwrap();
        assert_eq!(sink.values, vec!["part more".to_string()]);
    }

    #[test]
    fn upgrade_pauses_after_message() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        let data: &[u8] =
            b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\
              Connection: Upgrade\r\n\r\n\x81\x05hello";
        let status = parser.execute(&mut sink, data).unwrap();
        let frame_start = data.len() - 7;
        assert_eq!(status, Status::PausedUpgrade(frame_start));
        assert!(parser.is_upgrade());
        assert_eq!(sink.complete, 1);
    }

    #[test]
    fn pause_on_message_complete() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        sink.pause_on_complete = true;
        let data: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let status = parser.execute(&mut sink, data).unwrap();
        assert_eq!(status, Status::Paused(19));
        assert_eq!(sink.complete, 1);
        assert_eq!(&sink.url, b"/a");
        // resume and feed the second pipelined request
        parser.resume();
        sink.url.clear();
        let status = parser.execute(&mut sink, &data[19..]).unwrap();
        assert_eq!(status, Status::Paused(19));
        assert_eq!(sink.complete, 2);
        assert_eq!(&sink.url, b"/b");
    }

    #[test]
    fn two_messages_stream_through_without_pause() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(sink.begun, 2);
        assert_eq!(sink.complete, 2);
    }

    #[test]
    fn response_with_content_length() {
        let mut parser = Parser::new(Kind::Response);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").unwrap();
        assert_eq!(parser.status_code(), 200);
        assert_eq!(&sink.status, b"OK");
        assert_eq!(&sink.body, b"hi");
        assert_eq!(sink.complete, 1);
    }

    #[test]
    fn response_body_until_eof() {
        let mut parser = Parser::new(Kind::Response);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"HTTP/1.1 200 OK\r\n\r\nstreaming").unwrap();
        assert_eq!(&sink.body, b"streaming");
        assert_eq!(sink.complete, 0);
        assert!(!parser.should_keep_alive());
        parser.finish(&mut sink).unwrap();
        assert_eq!(sink.complete, 1);
    }

    #[test]
    fn response_204_has_no_body() {
        let mut parser = Parser::new(Kind::Response);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        assert_eq!(sink.complete, 1);
        assert!(sink.body.is_empty());
    }

    #[test]
    fn finish_mid_message_is_an_error() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab").unwrap();
        let err = parser.finish(&mut sink).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidEofState);
    }

    #[test]
    fn data_after_finish_is_rejected() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink, b"GET / HTTP/1.1\r\n\r\n").unwrap();
        parser.finish(&mut sink).unwrap();
        let err = parser.execute(&mut sink, b"GET").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ClosedConnection);
    }

    #[test]
    fn both_kind_detects_from_first_byte() {
        let mut parser = Parser::new(Kind::Both);
        let mut sink = Sink::default();
        parser.execute(&mut sink,
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(parser.status_code(), 200);

        let mut parser = Parser::new(Kind::Both);
        let mut sink = Sink::default();
        parser.execute(&mut sink, b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parser.method(), Some(Method::Get));
    }

    #[test]
    fn connect_method_is_an_upgrade() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        let status = parser.execute(&mut sink,
            b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").unwrap();
        assert!(matches!(status, Status::PausedUpgrade(_)));
        assert_eq!(&sink.url, b"example.com:443");
    }

    #[test]
    fn empty_header_value() {
        let (sink, result) = parse(b"GET / HTTP/1.1\r\nX-Empty:\r\n\r\n");
        result.unwrap();
        assert_eq!(sink.fields, vec!["X-Empty".to_string()]);
        assert_eq!(sink.values, vec!["".to_string()]);
    }

    #[test]
    fn bad_header_name() {
        let (_, result) = parse(b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidHeaderToken);
    }

    #[test]
    fn reset_clears_a_sticky_error() {
        let mut parser = Parser::new(Kind::Request);
        let mut sink = Sink::default();
        parser.execute(&mut sink, b"BOGUS\x01 / HTTP/1.1\r\n\r\n")
            .unwrap_err();
        parser.reset();
        parser.execute(&mut sink, b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parser.method(), Some(Method::Get));
    }
}
