//! Exact-match request router.
//!
//! Routes are stored in a hash map keyed by the literal string
//! `METHOD+PREFIX+PATH`; there are no wildcards and no parameter
//! extraction. Installed as a middleware, the router only fires while the
//! response still carries the default 404, and a miss simply defers to
//! whatever middleware comes after it.

use std::collections::HashMap;
use std::sync::Arc;

use context::Context;
use middleware::{dispatch, Middleware, Next};

const ALL_METHODS: &'static [&'static str] =
    &["DELETE", "GET", "HEAD", "POST", "PUT"];

/// Routing table builder.
pub struct Router {
    prefix: String,
    handlers: HashMap<String, Arc<Vec<Arc<Middleware>>>>,
}

impl Router {
    pub fn new() -> Router {
        Router {
            prefix: String::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_prefix<P: Into<String>>(prefix: P) -> Router {
        Router {
            prefix: prefix.into(),
            handlers: HashMap::new(),
        }
    }

    /// Sets the prefix applied to every registered path.
    pub fn prefix<P: Into<String>>(&mut self, prefix: P) -> &mut Router {
        self.prefix = prefix.into();
        self
    }

    /// Registers a chain of handlers for one method and path.
    pub fn register(&mut self, method: &str, path: &str,
                    handlers: Vec<Arc<Middleware>>) -> &mut Router
    {
        let key = format!("{}+{}{}", method, self.prefix, path);
        self.handlers.insert(key, Arc::new(handlers));
        self
    }

    pub fn del<M: Middleware + 'static>(&mut self, path: &str, handler: M)
        -> &mut Router
    {
        self.register("DELETE", path,
            vec![Arc::new(handler) as Arc<Middleware>])
    }

    pub fn get<M: Middleware + 'static>(&mut self, path: &str, handler: M)
        -> &mut Router
    {
        self.register("GET", path,
            vec![Arc::new(handler) as Arc<Middleware>])
    }

    pub fn head<M: Middleware + 'static>(&mut self, path: &str, handler: M)
        -> &mut Router
    {
        self.register("HEAD", path,
            vec![Arc::new(handler) as Arc<Middleware>])
    }

    pub fn post<M: Middleware + 'static>(&mut self, path: &str, handler: M)
        -> &mut Router
    {
        self.register("POST", path,
            vec![Arc::new(handler) as Arc<Middleware>])
    }

    pub fn put<M: Middleware + 'static>(&mut self, path: &str, handler: M)
        -> &mut Router
    {
        self.register("PUT", path,
            vec![Arc::new(handler) as Arc<Middleware>])
    }

    /// Registers the same handler under DELETE, GET, HEAD, POST and PUT.
    pub fn all<M: Middleware + 'static>(&mut self, path: &str, handler: M)
        -> &mut Router
    {
        let handler: Arc<Middleware> = Arc::new(handler);
        for method in ALL_METHODS {
            self.register(*method, path, vec![handler.clone()]);
        }
        self
    }

    /// All-method redirect with status 301.
    pub fn redirect(&mut self, path: &str, destination: &str)
        -> &mut Router
    {
        self.redirect_with_status(path, destination, 301)
    }

    pub fn redirect_with_status(&mut self, path: &str, destination: &str,
                                status: u16) -> &mut Router
    {
        let destination = destination.to_string();
        self.all(path, move |ctx: &mut Context, next: Next| {
            ctx.redirect(destination.clone());
            ctx.set_status(status);
            next.call(ctx);
        })
    }

    /// Freezes the table into a middleware.
    pub fn routes(&self) -> Routes {
        Routes {
            prefix: self.prefix.clone(),
            handlers: Arc::new(self.handlers.clone()),
        }
    }
}

/// The router as a middleware.
#[derive(Clone)]
pub struct Routes {
    prefix: String,
    handlers: Arc<HashMap<String, Arc<Vec<Arc<Middleware>>>>>,
}

impl Middleware for Routes {
    fn call(&self, ctx: &mut Context, next: Next) {
        // the router only claims requests nothing upstream has touched
        if ctx.status() == 404 {
            let key = format!("{}+{}{}",
                ctx.method().as_str(), self.prefix, ctx.path());
            if let Some(chain) = self.handlers.get(&key) {
                let chain = chain.clone();
                dispatch(&chain, ctx);
            }
        }
        next.call(ctx);
    }
}
