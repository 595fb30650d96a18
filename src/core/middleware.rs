//! Pre/post middleware units and chain assembly.
//!
//! A middleware is a `(ctx, next)` function that may call `next` zero or
//! one time; not calling it short-circuits everything further down. The
//! phase decides where it sits relative to the terminal handler:
//! * **Pre** — runs before the handler; a short-circuit skips the handler
//!   and the whole post chain.
//! * **Post** — runs after the handler; a short-circuit stops later post
//!   middlewares but cannot un-write the response buffer.
//!
//! The assembled chain always ends in a terminal flush stage, so a fully
//! traversed chain produces exactly one wire flush.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::core::context::RequestContext;

/// A leaf stage of the chain: handlers and already-wrapped middlewares.
pub type HandlerFn =
    Arc<dyn for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ()> + Send + Sync>;

/// The raw middleware shape before it is folded into a chain.
pub type MiddlewareFn = Arc<
    dyn for<'a> Fn(&'a mut RequestContext, HandlerFn) -> BoxFuture<'a, ()> + Send + Sync,
>;

/// Decides per request whether a global middleware participates.
pub type MatcherFn = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Coerce a closure into a [`HandlerFn`].
pub fn handler_fn<F>(f: F) -> HandlerFn
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Coerce a closure into a [`MiddlewareFn`].
pub fn middleware_fn<F>(f: F) -> MiddlewareFn
where
    F: for<'a> Fn(&'a mut RequestContext, HandlerFn) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Matcher that lets a middleware run for every request.
pub fn match_all() -> MatcherFn {
    Arc::new(|_| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewarePhase {
    Pre,
    Post,
}

/// A registered global middleware: function, matcher, phase and whether it
/// survives the middleware-disabled run level.
#[derive(Clone)]
pub struct Middleware {
    func: MiddlewareFn,
    matcher: MatcherFn,
    phase: MiddlewarePhase,
    always_allowed: bool,
}

impl Middleware {
    pub fn new(func: MiddlewareFn, matcher: MatcherFn, phase: MiddlewarePhase) -> Self {
        Self {
            func,
            matcher,
            phase,
            always_allowed: false,
        }
    }

    pub fn pre(func: MiddlewareFn, matcher: MatcherFn) -> Self {
        Self::new(func, matcher, MiddlewarePhase::Pre)
    }

    pub fn post(func: MiddlewareFn, matcher: MatcherFn) -> Self {
        Self::new(func, matcher, MiddlewarePhase::Post)
    }

    /// Force this middleware to run even when globals are disabled.
    pub fn always_allowed(mut self) -> Self {
        self.always_allowed = true;
        self
    }

    pub fn is_always_allowed(&self) -> bool {
        self.always_allowed
    }

    pub fn phase(&self) -> MiddlewarePhase {
        self.phase
    }

    pub fn matches(&self, ctx: &RequestContext) -> bool {
        (self.matcher)(ctx)
    }

    pub(crate) fn func(&self) -> MiddlewareFn {
        self.func.clone()
    }
}

/// Fold middlewares right-to-left around `tail`, so the first list element
/// is the outermost call at dispatch time.
pub(crate) fn fold_chain(middlewares: &[MiddlewareFn], tail: HandlerFn) -> HandlerFn {
    middlewares.iter().rev().fold(tail, |next, mw| {
        let mw = mw.clone();
        handler_fn(move |ctx| mw(ctx, next.clone()))
    })
}

/// Build the per-request root: pre chain → handler → post chain → flush.
///
/// The flush stage is the post chain's tail, so post middlewares observe
/// the filled buffer and may still rewrite headers/body before the freeze.
/// A pre short-circuit skips handler and post alike; the serve loop's
/// fallback finalize covers the flush in that case.
pub(crate) fn assemble_chain(
    pre: &[MiddlewareFn],
    handler: HandlerFn,
    post: &[MiddlewareFn],
) -> HandlerFn {
    let flush: HandlerFn = handler_fn(|ctx| {
        Box::pin(async move {
            ctx.flush();
        })
    });

    let post_chain = fold_chain(post, flush);

    let with_post: HandlerFn = {
        let handler = handler.clone();
        handler_fn(move |ctx| {
            let handler = handler.clone();
            let post_chain = post_chain.clone();
            Box::pin(async move {
                handler(ctx).await;
                post_chain(ctx).await;
            })
        })
    };

    fold_chain(pre, with_post)
}
