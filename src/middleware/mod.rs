//! Middleware layer.
//!
//! A [`Stage`] turns the next handler into a new handler. It may inspect the
//! request, answer on its own (a filter answering `403`), or call through.
//! A [`Chain`] is an ordered list of stages and is itself a stage.
//!
//! # Ordering
//!
//! Stages run in the order they were appended. To make that true the chain
//! wraps in reverse: the last appended stage sits closest to the terminal
//! handler.
//!
//! ```text
//! Chain::new().append(a).append(b).apply(h)   ==   a.wrap(b.wrap(h))
//!
//! request ──▶ a ──▶ b ──▶ h
//! ```
//!
//! Built-in stages:
//! - [`HeaderFilter`] — required header names and values
//! - [`HmacFilter`] — keyed-digest signature over the request body
//! - [`IpFilter`] — source address inside a set of CIDR ranges
//!
//! ```rust
//! use gatehouse::middleware::{Chain, HeaderFilter, HeaderRequirement, IpFilter};
//! use gatehouse::Request;
//!
//! # fn main() -> Result<(), gatehouse::ConfigError> {
//! let gate = Chain::new()
//!     .append(IpFilter::new(["10.0.0.0/8", "localhost"], None)?)
//!     .append(HeaderFilter::new(HeaderRequirement::from_pairs([("x-key", ["secret"])])?));
//!
//! let handler = gate.apply(|_req: Request| async { "Hi!" });
//! # let _ = handler;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::handler::{self, BoxedHandler, Handler};

pub mod cidr;
mod header;
mod hmac;
mod ip;

pub use cidr::CidrSet;
pub use header::{HeaderFilter, HeaderRequirement, ValueSet};
pub use hmac::{DefaultStrategy, Encoding, GithubStrategy, HmacConfig, HmacFilter, HmacValidator, Provider};
pub use ip::IpFilter;

// ── Stage ─────────────────────────────────────────────────────────────────────

/// A request-gating transform: next handler in, handler out.
///
/// Stages are built once and shared by every request passing through them,
/// so `wrap` takes `&self` and any configuration is read-only.
pub trait Stage: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<S: Stage + ?Sized> Stage for Arc<S> {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (**self).wrap(next)
    }
}

/// A [`Stage`] made from a closure. Build one with [`from_fn`].
#[derive(Clone)]
pub struct FromFn<F>(F);

/// Turns a `Fn(BoxedHandler) -> BoxedHandler` closure into a [`Stage`].
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    FromFn(f)
}

impl<F> Stage for FromFn<F>
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (self.0)(next)
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered composition of stages.
///
/// `Chain::new()` is the identity: applied to a handler it returns that
/// handler unchanged. Every combinator consumes `self` and returns the new
/// chain, so building reads top to bottom in execution order.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Left fold of [`append`](Chain::append) over `stages`, in order.
    pub fn assemble<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Stage,
    {
        stages.into_iter().fold(Self::new(), |chain, stage| chain.append(stage))
    }

    /// Adds `other` so it runs after everything already in the chain.
    pub fn append(mut self, other: impl Stage) -> Self {
        self.stages.push(Arc::new(other));
        self
    }

    /// Adds `other` so it runs before everything already in the chain.
    pub fn prepend(self, other: impl Stage) -> Self {
        let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(self.stages.len() + 1);
        stages.push(Arc::new(other));
        stages.extend(self.stages);
        Self { stages }
    }

    /// Wraps a terminal handler with every stage of the chain.
    pub fn apply(&self, handler: impl Handler) -> BoxedHandler {
        self.wrap(handler.into_boxed_handler())
    }

    /// Applies the chain to a terminal handler that answers an empty
    /// `200 OK`, for chains whose stages produce the whole response.
    pub fn serve(&self) -> BoxedHandler {
        self.apply(handler::noop)
    }

    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }
}

impl Stage for Chain {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self.stages
            .iter()
            .rev()
            .fold(next, |next, stage| stage.wrap(next))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("stages", &self.stages.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Empty;

    use super::*;
    use crate::{Request, Response};

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    /// A stage that records its name, then calls through.
    fn mark(name: &'static str, trace: &Trace) -> impl Stage + use<> {
        let trace = Arc::clone(trace);
        from_fn(move |next: BoxedHandler| {
            let trace = Arc::clone(&trace);
            (move |req: Request| {
                let next = Arc::clone(&next);
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().unwrap().push(name);
                    next.call(req).await
                }
            })
            .into_boxed_handler()
        })
    }

    fn request() -> Request {
        Request::new(http::Request::get("/").body(Empty::<Bytes>::new()).unwrap())
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let handler = Chain::new().apply(|_req: Request| async { "Hi!" });
        let res = handler.call(request()).await;
        assert_eq!(res.body(), b"Hi!");
    }

    #[tokio::test]
    async fn append_runs_in_insertion_order() {
        let trace = Trace::default();
        let chain = Chain::new().append(mark("a", &trace)).append(mark("b", &trace));
        chain.serve().call(request()).await;
        assert_eq!(*trace.lock().unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn prepend_runs_first() {
        let trace = Trace::default();
        let chain = Chain::new().append(mark("a", &trace)).prepend(mark("b", &trace));
        chain.serve().call(request()).await;
        assert_eq!(*trace.lock().unwrap(), ["b", "a"]);
    }

    #[tokio::test]
    async fn nested_chains_compose_associatively() {
        let trace = Trace::default();
        let left = Chain::new()
            .append(Chain::new().append(mark("a", &trace)).append(mark("b", &trace)))
            .append(mark("c", &trace));
        let right = Chain::new()
            .append(mark("a", &trace))
            .append(Chain::new().append(mark("b", &trace)).append(mark("c", &trace)));

        left.serve().call(request()).await;
        right.serve().call(request()).await;
        assert_eq!(*trace.lock().unwrap(), ["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn serve_answers_empty_ok() {
        let res = Chain::new().serve().call(request()).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn a_stage_can_answer_without_calling_next() {
        let stop = from_fn(|_next: BoxedHandler| {
            (|_req: Request| async { Response::forbidden() }).into_boxed_handler()
        });
        let trace = Trace::default();
        let res = Chain::new()
            .append(stop)
            .append(mark("unreached", &trace))
            .serve()
            .call(request())
            .await;

        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert!(trace.lock().unwrap().is_empty());
    }
}
