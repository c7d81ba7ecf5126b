extern crate cuehttp;
extern crate futures;
extern crate tk_bufstream;

use std::sync::{Arc, Mutex};

use futures::executor::{spawn, Notify, Spawn};
use futures::{Async, Future};
use tk_bufstream::MockData;

use cuehttp::{App, Connection, Context, Handler, Next, SendOptions};

struct NoopNotify;

impl Notify for NoopNotify {
    fn notify(&self, _id: usize) {}
}

fn poll_once<F: Future>(task: &mut Spawn<F>) -> Option<bool> {
    let notify = Arc::new(NoopNotify);
    match task.poll_future_notify(&notify, 0) {
        Ok(Async::Ready(_)) => Some(true),
        Ok(Async::NotReady) => Some(false),
        Err(_) => None,
    }
}

fn connection(handler: Handler)
    -> (MockData, Spawn<Connection<MockData>>)
{
    let mock = MockData::new();
    let task = spawn(Connection::new(mock.clone(), handler));
    (mock, task)
}

fn output_string(mock: &MockData) -> String {
    String::from_utf8_lossy(&mock.output(..)).to_string()
}

#[test]
fn buffered_get() {
    let handler: Handler = Arc::new(|ctx: &mut Context| {
        assert_eq!(ctx.path(), "/hello");
        assert_eq!(ctx.get("Host"), Some("x"));
        ctx.content_type("text/plain");
        ctx.body("hi");
        ctx.set_status(200);
    });
    let (mock, mut task) = connection(handler);
    assert_eq!(poll_once(&mut task), Some(false));
    mock.add_input("GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(false));

    let output = output_string(&mock);
    assert!(output.starts_with("HTTP/1.1 200 OK\r\n"), "{}", output);
    assert!(output.contains("Server: cuehttp\r\n"));
    assert!(output.contains("Content-type: text/plain\r\n"));
    assert!(output.contains("Content-length: 2\r\n"));
    assert!(output.contains("Connection: keep-alive\r\n"));
    assert!(output.ends_with("\r\n\r\nhi"));
}

#[test]
fn chunked_response() {
    use std::io::Write;

    let handler: Handler = Arc::new(|ctx: &mut Context| {
        ctx.set_status(200);
        ctx.chunked();
        let mut writer = ctx.body_stream();
        writer.write_all(b"abc").unwrap();
        writer.flush().unwrap();
        writer.write_all(b"defg").unwrap();
        writer.flush().unwrap();
    });
    let (mock, mut task) = connection(handler);
    mock.add_input("GET /stream HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(false));

    let output = output_string(&mock);
    assert!(output.starts_with("HTTP/1.1 200 OK\r\n"), "{}", output);
    assert!(output.contains("Transfer-Encoding: chunked\r\n"));
    assert!(!output.contains("Content-length"));
    assert!(output.ends_with("\r\n\r\n3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n"),
        "{}", output);
}

#[test]
fn keep_alive_serves_two_requests_with_fresh_state() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler: Handler = {
        let seen = seen.clone();
        Arc::new(move |ctx: &mut Context| {
            let names: Vec<String> = ctx.headers()
                .iter()
                .map(|&(ref name, _)| name.clone())
                .collect();
            seen.lock().unwrap().push((ctx.path().to_string(), names));
            ctx.set_status(200);
            ctx.body(ctx.path().to_string());
        })
    };
    let (mock, mut task) = connection(handler);
    mock.add_input("GET /one HTTP/1.1\r\nX-First: 1\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(false));
    mock.add_input("GET /two HTTP/1.1\r\nX-Second: 2\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(false));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "/one");
    assert_eq!(seen[0].1, vec!["X-First".to_string()]);
    assert_eq!(seen[1].0, "/two");
    // the second request must only see its own headers
    assert_eq!(seen[1].1, vec!["X-Second".to_string()]);

    let output = output_string(&mock);
    let responses = output.matches("HTTP/1.1 200 OK\r\n").count();
    assert_eq!(responses, 2);
    assert!(output.contains("/one"));
    assert!(output.ends_with("/two"));
}

#[test]
fn pipelined_requests_are_served_in_order() {
    let handler: Handler = Arc::new(|ctx: &mut Context| {
        ctx.set_status(200);
        ctx.body(ctx.path().to_string());
    });
    let (mock, mut task) = connection(handler);
    mock.add_input(
        "GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(false));

    let output = output_string(&mock);
    let first = output.find("/a").unwrap();
    let second = output.find("/b").unwrap();
    assert!(first < second);
}

#[test]
fn connection_close_is_honored() {
    let handler: Handler = Arc::new(|ctx: &mut Context| {
        ctx.set_status(200);
        ctx.body("done");
    });
    let (mock, mut task) = connection(handler);
    mock.add_input(
        "GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(true));
    let output = output_string(&mock);
    assert!(output.contains("Connection: close\r\n"));
}

#[test]
fn malformed_request_gets_a_400_and_the_connection_closes() {
    let handler: Handler = Arc::new(|_ctx: &mut Context| {
        panic!("middleware must not run for malformed requests");
    });
    let (mock, mut task) = connection(handler);
    mock.add_input("GET /x HTTP/9.9\r\n\r\n");
    assert_eq!(poll_once(&mut task), Some(true));
    let output = output_string(&mock);
    assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "{}", output);
}

#[test]
fn request_body_is_delivered_to_middleware() {
    let handler: Handler = Arc::new(|ctx: &mut Context| {
        let body = ctx.req().body().to_vec();
        assert_eq!(&body, b"ping");
        ctx.set_status(200);
        ctx.body(body);
    });
    let (mock, mut task) = connection(handler);
    mock.add_input(
        "POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nping");
    assert_eq!(poll_once(&mut task), Some(false));
    let output = output_string(&mock);
    assert!(output.ends_with("ping"));
}

fn websocket_app() -> (Handler, Arc<cuehttp::WsServer>) {
    let mut app = App::new();
    let wss = app.ws();
    wss.use_(|ctx: &mut Context, next: Next| {
        let ws = ctx.websocket();
        let echo = Arc::downgrade(&ws);
        ws.on_message(move |msg: Vec<u8>| {
            if let Some(ws) = echo.upgrade() {
                ws.send(msg, SendOptions::default());
            }
        });
        next.call(ctx);
    });
    (app.callback(), wss)
}

const HANDSHAKE: &'static str =
    "GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\
     Connection: Upgrade\r\n\
     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
     Sec-WebSocket-Version: 13\r\n\r\n";

#[test]
fn websocket_echo() {
    let (handler, wss) = websocket_app();
    let (mock, mut task) = connection(handler);
    mock.add_input(HANDSHAKE);
    assert_eq!(poll_once(&mut task), Some(false));

    let output = output_string(&mock);
    assert!(output.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "{}", output);
    assert!(output.contains(
        "Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(output.contains("Upgrade: WebSocket\r\n"));
    assert!(output.contains("Connection: Upgrade\r\n"));
    assert_eq!(wss.client_count(), 1);
    let handshake_len = mock.output(..).len();

    // client text frame "hi", masked with key 0x01020304
    mock.add_input(&[0x81u8, 0x82, 0x01, 0x02, 0x03, 0x04,
                     b'h' ^ 0x01, b'i' ^ 0x02][..]);
    assert_eq!(poll_once(&mut task), Some(false));

    let frames = mock.output(..)[handshake_len..].to_vec();
    // the echoed server frame is unmasked
    assert_eq!(&frames, &[0x81, 0x02, b'h', b'i']);
}

#[test]
fn websocket_ping_gets_a_pong_with_the_same_payload() {
    let (handler, _wss) = websocket_app();
    let (mock, mut task) = connection(handler);
    mock.add_input(HANDSHAKE);
    assert_eq!(poll_once(&mut task), Some(false));
    let handshake_len = mock.output(..).len();

    // masked ping with payload "p"
    mock.add_input(&[0x89u8, 0x81, 0, 0, 0, 0, b'p'][..]);
    assert_eq!(poll_once(&mut task), Some(false));

    let frames = mock.output(..)[handshake_len..].to_vec();
    assert_eq!(&frames, &[0x8A, 0x01, b'p']);
}

#[test]
fn websocket_close_frame_tears_the_connection_down() {
    let (handler, wss) = websocket_app();
    let (mock, mut task) = connection(handler);
    mock.add_input(HANDSHAKE);
    assert_eq!(poll_once(&mut task), Some(false));
    assert_eq!(wss.client_count(), 1);

    mock.add_input(&[0x88u8, 0x80, 0, 0, 0, 0][..]);
    assert_eq!(poll_once(&mut task), Some(true));
    assert_eq!(wss.client_count(), 0);
}

#[test]
fn handshake_without_key_is_not_an_upgrade() {
    let (handler, wss) = websocket_app();
    let (mock, mut task) = connection(handler);
    mock.add_input(
        "GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\
         Connection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n");
    let _ = poll_once(&mut task);
    let output = output_string(&mock);
    assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"),
        "{}", output);
    assert_eq!(wss.client_count(), 0);
}

#[test]
fn upgrade_request_without_ws_endpoint_gets_503() {
    let mut app = App::new();
    let handler = app.callback();
    let (mock, mut task) = connection(handler);
    mock.add_input(HANDSHAKE);
    let _ = poll_once(&mut task);
    let output = output_string(&mock);
    assert!(output.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "{}", output);
}

#[test]
fn server_push_reaches_the_client_via_broadcast() {
    let (handler, wss) = websocket_app();
    let (mock, mut task) = connection(handler);
    mock.add_input(HANDSHAKE);
    assert_eq!(poll_once(&mut task), Some(false));
    let handshake_len = mock.output(..).len();

    wss.broadcast("news", SendOptions::default());
    assert_eq!(poll_once(&mut task), Some(false));

    let frames = mock.output(..)[handshake_len..].to_vec();
    assert_eq!(&frames, &[0x81, 0x04, b'n', b'e', b'w', b's']);
}
