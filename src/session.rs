//! Cookie- or store-backed sessions.
//!
//! The middleware lazily attaches a `Session` to the context, lets the
//! rest of the chain run, and then commits. By default the whole payload
//! travels base64-encoded inside the session cookie; with an external
//! store only a generated key does.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64;
use rand::{thread_rng, Rng};
use serde_json::map::Map;
use serde_json::{self, Value};

use context::Context;
use cookies::{Cookie, EXPIRES_EPOCH};
use middleware::{Middleware, Next};

/// External session store hooks, keyed by the generated session id.
#[derive(Clone)]
pub struct SessionStore {
    pub get: Arc<Fn(&str) -> Option<String> + Send + Sync>,
    pub set: Arc<Fn(&str, &str, i64) + Send + Sync>,
    pub destroy: Arc<Fn(&str) + Send + Sync>,
}

/// Hooks that carry the session key somewhere other than the cookie
/// (a custom header, for example).
#[derive(Clone)]
pub struct ExternalKey {
    pub get: Arc<Fn(&mut Context) -> Option<String> + Send + Sync>,
    pub set: Arc<Fn(&mut Context, &str) + Send + Sync>,
    pub destroy: Arc<Fn(&mut Context, &str) + Send + Sync>,
}

#[derive(Clone)]
pub struct SessionOptions {
    /// Cookie (or store key) name.
    pub key: String,
    /// Session lifetime in seconds; `-1` makes a browser session.
    pub max_age: i64,
    /// Commit automatically when the chain returns.
    pub auto_commit: bool,
    pub store: Option<SessionStore>,
    pub external_key: Option<ExternalKey>,
    pub genid: Option<Arc<Fn() -> String + Send + Sync>>,
    /// Prefix for generated session ids.
    pub prefix: String,
}

impl Default for SessionOptions {
    fn default() -> SessionOptions {
        SessionOptions {
            key: "cuehttp".to_string(),
            max_age: 24 * 60 * 60,
            auto_commit: true,
            store: None,
            external_key: None,
            genid: None,
            prefix: String::new(),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| {
            d.as_secs() as i64 * 1000 + (d.subsec_nanos() / 1_000_000) as i64
        })
        .unwrap_or(0)
}

fn random_id() -> String {
    let bytes: [u8; 16] = thread_rng().gen();
    let mut out = String::with_capacity(36);
    for (index, byte) in bytes.iter().enumerate() {
        if matches!(index, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        write!(out, "{:02x}", byte).unwrap();
    }
    out
}

/// One request's session data.
pub struct Session {
    options: SessionOptions,
    external_key: String,
    data: BTreeMap<String, String>,
    prev: String,
    removed: bool,
}

impl Session {
    pub fn new(options: SessionOptions, ctx: &mut Context) -> Session {
        let mut session = Session {
            options: options,
            external_key: String::new(),
            data: BTreeMap::new(),
            prev: String::new(),
            removed: false,
        };
        if session.options.store.is_some() {
            session.init_from_store(ctx);
        } else {
            session.init_from_cookie(ctx);
        }
        session
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|v| &v[..])
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
        where K: Into<String>, V: Into<String>
    {
        self.data.insert(key.into(), value.into());
    }

    /// Schedules the session for destruction at commit time.
    pub fn remove(&mut self) {
        self.removed = true;
    }

    fn genid(&self) -> String {
        match self.options.genid {
            Some(ref genid) => (**genid)(),
            None => format!("{}{}", self.options.prefix, random_id()),
        }
    }

    fn init_from_cookie(&mut self, ctx: &mut Context) {
        let raw = {
            let jar = ctx.cookies();
            let value =
                jar.borrow().get(&self.options.key).map(|v| v.to_string());
            value
        };
        if let Some(raw) = raw {
            if let Ok(json) = base64::decode(&raw) {
                let json = String::from_utf8_lossy(&json).into_owned();
                if self.parse(&json) {
                    self.prev = self.dump();
                }
            }
        }
    }

    fn init_from_store(&mut self, ctx: &mut Context) {
        self.external_key = match self.options.external_key {
            Some(ref hooks) => {
                (*hooks.get)(ctx).unwrap_or_default()
            }
            None => {
                let jar = ctx.cookies();
                let value = jar.borrow()
                    .get(&self.options.key)
                    .map(|v| v.to_string());
                value.unwrap_or_default()
            }
        };
        if self.external_key.is_empty() {
            self.external_key = self.genid();
        }
        let stored = {
            let store = self.options.store.as_ref().unwrap();
            (*store.get)(&self.external_key)
        };
        if let Some(json) = stored {
            if self.parse(&json) {
                self.prev = self.dump();
            }
        }
    }

    fn parse(&mut self, json: &str) -> bool {
        let root: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(_) => return false,
        };
        let object = match root.as_object() {
            Some(object) => object,
            None => return false,
        };
        if let Some(expire) =
            object.get("_expire").and_then(|v| v.as_i64())
        {
            if expire < now_ms() {
                return false;
            }
        }
        for (key, value) in object {
            if key.starts_with('_') {
                continue;
            }
            if let Some(value) = value.as_str() {
                self.data.insert(key.clone(), value.to_string());
            }
        }
        true
    }

    fn dump(&self) -> String {
        let mut map = Map::new();
        for (key, value) in &self.data {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Value::Object(map).to_string()
    }

    fn payload(&self) -> String {
        let mut map = Map::new();
        for (key, value) in &self.data {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        if self.options.max_age == -1 {
            map.insert("_session".to_string(), Value::Bool(true));
        } else {
            map.insert("_max_age".to_string(),
                Value::from(self.options.max_age));
            map.insert("_expire".to_string(),
                Value::from(now_ms() + self.options.max_age * 1000));
        }
        Value::Object(map).to_string()
    }

    fn session_cookie(&self, value: String) -> Cookie {
        let mut cookie = Cookie::new(self.options.key.clone(), value);
        cookie.set_max_age(self.options.max_age);
        cookie
    }

    fn destroy(&mut self, ctx: &mut Context) {
        if let Some(ref store) = self.options.store {
            (*store.destroy)(&self.external_key);
        }
        match self.options.external_key {
            Some(ref hooks) => {
                (*hooks.destroy)(ctx, &self.external_key);
            }
            None => {
                let mut cookie =
                    Cookie::new(self.options.key.clone(), "expired");
                cookie.set_expires(EXPIRES_EPOCH);
                ctx.cookies().borrow_mut().set(cookie);
            }
        }
    }

    /// Writes the session out if it changed since the request started.
    pub fn commit(&mut self, ctx: &mut Context) {
        if self.removed {
            self.destroy(ctx);
            return;
        }
        if self.data.is_empty() {
            return;
        }
        if self.prev == self.dump() {
            return;
        }
        let payload = self.payload();
        if self.options.store.is_some() {
            {
                let store = self.options.store.as_ref().unwrap();
                (*store.set)(&self.external_key, &payload,
                    self.options.max_age);
            }
            match self.options.external_key {
                Some(ref hooks) => {
                    (*hooks.set)(ctx, &self.external_key);
                }
                None => {
                    let cookie =
                        self.session_cookie(self.external_key.clone());
                    ctx.cookies().borrow_mut().set(cookie);
                }
            }
            return;
        }
        let encoded = base64::encode(&payload);
        let cookie = self.session_cookie(encoded);
        ctx.cookies().borrow_mut().set(cookie);
    }
}

/// Session middleware.
pub fn use_session(options: SessionOptions) -> impl Middleware {
    move |ctx: &mut Context, next: Next| {
        let auto_commit = options.auto_commit;
        if !ctx.session_enabled() {
            let session = Session::new(options.clone(), ctx);
            ctx.set_session(session);
        }
        next.call(ctx);
        if auto_commit {
            if let Some(mut session) = ctx.take_session() {
                session.commit(ctx);
                ctx.set_session(session);
            }
        }
    }
}
