//! Onion-model middleware composition.
//!
//! A middleware receives the context and a `Next` continuation; everything
//! it does before `next.call(ctx)` runs before the deeper handlers, and
//! everything after runs once they have returned. `Next` is consumed by
//! `call`, so a handler can invoke it at most once; not invoking it
//! short-circuits the rest of the chain.

use std::sync::Arc;

use context::Context;

/// A single element of the middleware chain.
pub trait Middleware: Send + Sync {
    fn call(&self, ctx: &mut Context, next: Next);
}

impl<F> Middleware for F
    where F: Fn(&mut Context, Next) + Send + Sync
{
    fn call(&self, ctx: &mut Context, next: Next) {
        self(ctx, next)
    }
}

/// Continuation into the rest of the chain.
pub struct Next<'a> {
    chain: &'a [Arc<Middleware>],
}

impl<'a> Next<'a> {
    /// Runs the next handler (and through it the rest of the chain).
    /// A no-op at the end of the chain.
    pub fn call(self, ctx: &mut Context) {
        if let Some((head, rest)) = self.chain.split_first() {
            head.call(ctx, Next { chain: rest });
        }
    }
}

/// Runs a whole chain against a context.
pub fn dispatch(chain: &[Arc<Middleware>], ctx: &mut Context) {
    Next { chain: chain }.call(ctx);
}

/// Adaptor for handlers that do not take a continuation: the function runs
/// and the rest of the chain is invoked right after it, so terminal
/// handlers compose transparently.
pub struct Terminal<F>(F);

impl<F> Middleware for Terminal<F>
    where F: Fn(&mut Context) + Send + Sync
{
    fn call(&self, ctx: &mut Context, next: Next) {
        (self.0)(ctx);
        next.call(ctx);
    }
}

/// Wraps a `next`-less handler into a middleware.
pub fn terminal<F>(f: F) -> Terminal<F>
    where F: Fn(&mut Context) + Send + Sync
{
    Terminal(f)
}

/// The ordered middleware list of an application or websocket endpoint.
#[derive(Clone, Default)]
pub struct Middlewares {
    chain: Vec<Arc<Middleware>>,
}

impl Middlewares {
    pub fn new() -> Middlewares {
        Middlewares { chain: Vec::new() }
    }

    pub fn push<M: Middleware + 'static>(&mut self, middleware: M) {
        self.chain.push(Arc::new(middleware));
    }

    pub fn push_arc(&mut self, middleware: Arc<Middleware>) {
        self.chain.push(middleware);
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Snapshot of the chain for sharing with the worker threads.
    pub fn compose(&self) -> Arc<Vec<Arc<Middleware>>> {
        Arc::new(self.chain.clone())
    }

    pub fn run(&self, ctx: &mut Context) {
        dispatch(&self.chain, ctx);
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use futures::sync::mpsc::unbounded;

    use body::ChunkSink;
    use context::Context;
    use super::{terminal, Middlewares, Next};

    struct NullSink;

    impl ChunkSink for NullSink {
        fn send(&self, _data: &[u8]) -> bool {
            true
        }
    }

    fn test_context() -> Context {
        let (tx, rx) = unbounded();
        drop(rx);
        Context::new(Rc::new(NullSink), false, tx)
    }

    #[test]
    fn onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Middlewares::new();
        for name in &["a", "b", "c"] {
            let log = log.clone();
            let name = name.to_string();
            chain.push(move |ctx: &mut Context, next: Next| {
                log.lock().unwrap().push(format!("{}:before", name));
                next.call(ctx);
                log.lock().unwrap().push(format!("{}:after", name));
            });
        }
        let mut ctx = test_context();
        chain.run(&mut ctx);
        assert_eq!(&log.lock().unwrap()[..], &[
            "a:before", "b:before", "c:before",
            "c:after", "b:after", "a:after",
        ]);
    }

    #[test]
    fn short_circuit_skips_deeper_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Middlewares::new();
        {
            let log = log.clone();
            chain.push(move |_ctx: &mut Context, _next: Next| {
                log.lock().unwrap().push("first");
            });
        }
        {
            let log = log.clone();
            chain.push(move |ctx: &mut Context, next: Next| {
                log.lock().unwrap().push("second");
                next.call(ctx);
            });
        }
        let mut ctx = test_context();
        chain.run(&mut ctx);
        assert_eq!(&log.lock().unwrap()[..], &["first"]);
    }

    #[test]
    fn terminal_handlers_keep_the_chain_going() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Middlewares::new();
        {
            let log = log.clone();
            chain.push(terminal(move |_ctx: &mut Context| {
                log.lock().unwrap().push("terminal");
            }));
        }
        {
            let log = log.clone();
            chain.push(terminal(move |_ctx: &mut Context| {
                log.lock().unwrap().push("after");
            }));
        }
        let mut ctx = test_context();
        chain.run(&mut ctx);
        assert_eq!(&log.lock().unwrap()[..], &["terminal", "after"]);
    }

    #[test]
    fn every_reachable_handler_runs_exactly_once() {
        let mut chain = Middlewares::new();
        for _ in 0..5 {
            chain.push(|ctx: &mut Context, next: Next| {
                let n = ctx.status();
                ctx.set_status(n + 1);
                next.call(ctx);
            });
        }
        let mut ctx = test_context();
        ctx.set_status(0);
        chain.run(&mut ctx);
        assert_eq!(ctx.status(), 5);
    }

    #[test]
    fn empty_chain_is_a_no_op() {
        let chain = Middlewares::new();
        let mut ctx = test_context();
        chain.run(&mut ctx);
        assert_eq!(ctx.status(), 404);
    }
}
