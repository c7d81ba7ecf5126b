//! Gzip response compression middleware.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use context::Context;
use enums::Method;
use middleware::{Middleware, Next};

#[derive(Debug, Clone, Copy)]
pub struct CompressOptions {
    /// Bodies smaller than this many bytes are left alone.
    pub threshold: u64,
    /// Gzip level, 0-9.
    pub level: u32,
}

impl Default for CompressOptions {
    fn default() -> CompressOptions {
        CompressOptions {
            threshold: 2048,
            level: 8,
        }
    }
}

pub fn deflate(src: &[u8], level: u32) -> Option<Vec<u8>> {
    let mut encoder =
        GzEncoder::new(Vec::new(), Compression::new(level));
    if encoder.write_all(src).is_err() {
        return None;
    }
    encoder.finish().ok()
}

/// Rewrites large buffered bodies with gzip after the rest of the chain
/// has produced them.
pub fn use_compress(options: CompressOptions) -> impl Middleware {
    move |ctx: &mut Context, next: Next| {
        next.call(ctx);

        if ctx.method() == Method::Head {
            return;
        }
        if ctx.res().committed() || ctx.res().length() < options.threshold {
            return;
        }
        let body = ctx.res_mut().dump_body();
        match deflate(&body, options.level) {
            Some(compressed) => {
                ctx.set("Content-Encoding", "gzip");
                ctx.body(compressed);
            }
            None => {
                ctx.set_status(500);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;
    use std::rc::Rc;

    use flate2::read::GzDecoder;
    use futures::sync::mpsc::unbounded;

    use body::ChunkSink;
    use context::Context;
    use middleware::{terminal, Middlewares, Next};
    use parser::{Kind, Parser};
    use super::{use_compress, CompressOptions};

    struct NullSink;

    impl ChunkSink for NullSink {
        fn send(&self, _data: &[u8]) -> bool {
            true
        }
    }

    fn context_for(request: &[u8]) -> Context {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut ctx = Context::new(Rc::new(NullSink), false, tx);
        let mut parser = Parser::new(Kind::Request);
        parser.execute(ctx.req_mut(), request).unwrap();
        ctx
    }

    fn big_body() -> String {
        "the quick brown fox jumps over the lazy dog ".repeat(100)
    }

    #[test]
    fn large_bodies_are_compressed() {
        let mut chain = Middlewares::new();
        chain.push(use_compress(CompressOptions::default()));
        let body = big_body();
        let expected = body.clone();
        chain.push(terminal(move |ctx: &mut Context| {
            ctx.set_status(200);
            ctx.body(body.clone());
        }));
        let mut ctx = context_for(b"GET / HTTP/1.1\r\n\r\n");
        chain.run(&mut ctx);

        assert_eq!(ctx.res().get("Content-Encoding"), Some("gzip"));
        let compressed = ctx.res_mut().dump_body();
        assert!(compressed.len() < expected.len());
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, expected);
    }

    #[test]
    fn small_bodies_are_left_alone() {
        let mut chain = Middlewares::new();
        chain.push(use_compress(CompressOptions::default()));
        chain.push(terminal(|ctx: &mut Context| {
            ctx.set_status(200);
            ctx.body("tiny");
        }));
        let mut ctx = context_for(b"GET / HTTP/1.1\r\n\r\n");
        chain.run(&mut ctx);
        assert_eq!(ctx.res().get("Content-Encoding"), None);
        assert_eq!(ctx.res_mut().dump_body(), b"tiny".to_vec());
    }

    #[test]
    fn head_requests_are_skipped() {
        let mut chain = Middlewares::new();
        chain.push(use_compress(CompressOptions::default()));
        let body = big_body();
        chain.push(terminal(move |ctx: &mut Context| {
            ctx.set_status(200);
            ctx.body(body.clone());
        }));
        let mut ctx = context_for(b"HEAD / HTTP/1.1\r\n\r\n");
        chain.run(&mut ctx);
        assert_eq!(ctx.res().get("Content-Encoding"), None);
    }

    #[test]
    fn content_length_follows_the_compressed_body() {
        let mut chain = Middlewares::new();
        chain.push(use_compress(CompressOptions::default()));
        let body = big_body();
        chain.push(terminal(move |ctx: &mut Context| {
            ctx.set_status(200);
            ctx.body(body.clone());
        }));
        let mut ctx = context_for(b"GET / HTTP/1.1\r\n\r\n");
        chain.run(&mut ctx);
        let length = ctx.res().length();
        let body = ctx.res_mut().dump_body();
        assert_eq!(length, body.len() as u64);
    }
}
