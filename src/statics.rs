//! Static file serving middleware.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use context::Context;
use enums::Method;
use middleware::{Middleware, Next};

/// Files larger than this stream with chunked transfer-encoding.
const CHUNKED_THRESHOLD: u64 = 5 * 1024 * 1024;

const READ_BLOCK: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct StaticOptions {
    /// Serve dotfiles.
    pub hidden: bool,
    /// Run after the rest of the chain and only for unclaimed requests.
    pub delay: bool,
    /// Directory index file; `index.html` when empty.
    pub index: String,
    /// Extensions probed when the path has none.
    pub extensions: Vec<String>,
    /// Emit permissive CORS headers.
    pub cross_domain: bool,
}

fn mime_for(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "text/xml",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

fn resolve(root: &Path, request_path: &str, options: &StaticOptions)
    -> Option<PathBuf>
{
    // no path traversal out of the root
    if request_path.split('/').any(|seg| seg == "..") {
        return None;
    }
    let mut path = request_path.to_string();
    if path.ends_with('/') {
        if options.index.is_empty() {
            path.push_str("index.html");
        } else {
            path.push_str(&options.index);
        }
    }
    let mut real_path = root.to_path_buf();
    real_path.push(path.trim_left_matches('/'));

    if !options.hidden {
        let dotted = real_path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with('.'));
        if dotted {
            return None;
        }
    }

    if real_path.extension().is_none() {
        for extension in &options.extensions {
            let probe = real_path.with_extension(extension);
            if probe.is_file() {
                return Some(probe);
            }
        }
    }
    if real_path.is_file() {
        Some(real_path)
    } else {
        None
    }
}

fn send_file(ctx: &mut Context, real_path: &Path,
             options: &StaticOptions)
{
    let mut file = match File::open(real_path) {
        Ok(file) => file,
        Err(err) => {
            debug!("can not open {:?}: {}", real_path, err);
            return;
        }
    };
    let size = match file.metadata() {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            debug!("can not stat {:?}: {}", real_path, err);
            return;
        }
    };

    if options.cross_domain {
        ctx.set("Access-Control-Allow-Origin", "*");
        ctx.set("Access-Control-Allow-Headers", "X-Requested-With");
        ctx.set("Access-Control-Allow-Methods", "GET,POST,OPTIONS");
    }
    if !ctx.res().has("Content-Type") {
        let extension = real_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        ctx.content_type(mime_for(extension));
    }
    ctx.set_status(200);
    if size > CHUNKED_THRESHOLD {
        ctx.chunked();
    } else {
        ctx.set_length(size);
    }

    let mut writer = ctx.body_stream();
    let mut block = vec![0u8; READ_BLOCK];
    loop {
        match file.read(&mut block) {
            Ok(0) => break,
            Ok(n) => {
                if writer.write_all(&block[..n]).is_err() {
                    break;
                }
                if writer.flush().is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!("read error on {:?}: {}", real_path, err);
                break;
            }
        }
    }
}

fn try_serve(ctx: &mut Context, root: &Path, options: &StaticOptions) {
    if ctx.method() != Method::Get && ctx.method() != Method::Head {
        return;
    }
    let request_path = ctx.path().to_string();
    if let Some(real_path) = resolve(root, &request_path, options) {
        send_file(ctx, &real_path, options);
    }
}

/// Serves files under `root` for GET and HEAD requests.
///
/// With `delay` set the lookup runs after the rest of the chain and only
/// when nothing downstream claimed the request.
pub fn use_static<R: Into<PathBuf>>(root: R, options: StaticOptions)
    -> impl Middleware
{
    let root = root.into();
    move |ctx: &mut Context, next: Next| {
        if options.delay {
            next.call(ctx);
            if ctx.status() != 404 || ctx.has_body() {
                return;
            }
            try_serve(ctx, &root, &options);
        } else {
            try_serve(ctx, &root, &options);
            next.call(ctx);
        }
    }
}
