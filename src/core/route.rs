//! Named endpoints: a URL pattern, a terminal handler and the per-route
//! middleware chain wrapped around it.
//!
//! Route-level middlewares are independent of the global list and always
//! execute, even when global middlewares are disabled.

use crate::core::middleware::{handler_fn, HandlerFn, MiddlewareFn};

pub struct Route {
    pattern: String,
    /// `chain[0]` is the dispatch head, the last element the original
    /// terminal handler.
    chain: Vec<HandlerFn>,
}

impl Route {
    pub fn new(pattern: impl Into<String>, handler: HandlerFn) -> Self {
        Self {
            pattern: pattern.into(),
            chain: vec![handler],
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Wrap the current head with `mw`; the middleware registered last
    /// becomes the outermost call.
    pub fn register_middleware(&mut self, mw: MiddlewareFn) -> &mut Self {
        let head = self.chain[0].clone();
        let wrapper = handler_fn(move |ctx| mw(ctx, head.clone()));
        self.chain.insert(0, wrapper);
        self
    }

    /// Register several middlewares so the leftmost argument runs first at
    /// dispatch time.
    pub fn register_middlewares(&mut self, mws: Vec<MiddlewareFn>) -> &mut Self {
        for mw in mws.into_iter().rev() {
            self.register_middleware(mw);
        }
        self
    }

    /// Head of the executable chain.
    pub fn chain_head(&self) -> HandlerFn {
        self.chain[0].clone()
    }

    /// The innermost, original handler.
    pub fn handler(&self) -> HandlerFn {
        self.chain[self.chain.len() - 1].clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        body::Body,
        http::{Method, Request},
    };

    use super::*;
    use crate::core::{
        context::ContextPool,
        middleware::{handler_fn, middleware_fn},
    };

    fn run_head(route: &Route) {
        let head = route.chain_head();
        let pool = ContextPool::new();
        let mut ctx = pool.acquire(
            Request::builder()
                .method(Method::GET)
                .uri("/x")
                .body(Body::empty())
                .unwrap(),
        );
        futures::executor::block_on(head(&mut ctx));
    }

    fn tagged_handler(log: Arc<Mutex<Vec<&'static str>>>) -> HandlerFn {
        handler_fn(move |_ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push("handler");
            })
        })
    }

    fn tagged_mw(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> MiddlewareFn {
        middleware_fn(move |ctx, next| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(tag);
                next(ctx).await;
            })
        })
    }

    #[test]
    fn leftmost_registered_middleware_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut route = Route::new("/api/users", tagged_handler(log.clone()));
        route.register_middlewares(vec![
            tagged_mw(log.clone(), "a"),
            tagged_mw(log.clone(), "b"),
        ]);

        run_head(&route);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "handler"]);
    }

    #[test]
    fn handler_returns_the_innermost_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut route = Route::new("/api/users", tagged_handler(log.clone()));
        route.register_middleware(tagged_mw(log.clone(), "outer"));

        let pool = ContextPool::new();
        let mut ctx = pool.acquire(
            Request::builder()
                .method(Method::GET)
                .uri("/x")
                .body(Body::empty())
                .unwrap(),
        );
        let bare = route.handler();
        futures::executor::block_on(bare(&mut ctx));

        // Calling the bare handler bypasses every wrapper.
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }
}
