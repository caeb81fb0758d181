//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. Gatekeeping happens in
//! the handlers themselves: mount `chain.apply(handler)` on a path and every
//! request to that path runs the chain first.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so calls chain naturally.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a plain async handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.handle(method, path, handler.into_boxed_handler())
    }

    /// Register an already-erased handler, typically the output of
    /// [`Chain::apply`](crate::middleware::Chain::apply) or
    /// [`Chain::serve`](crate::middleware::Chain::serve).
    ///
    /// ```rust
    /// use gatehouse::middleware::{Chain, IpFilter};
    /// use gatehouse::{Request, Router};
    /// use http::Method;
    ///
    /// # fn main() -> Result<(), gatehouse::ConfigError> {
    /// let local_only = Chain::new().append(IpFilter::new(["localhost"], None)?);
    ///
    /// let app = Router::new()
    ///     .handle(Method::GET, "/admin", local_only.apply(|_req: Request| async { "ok" }))
    ///     .on(Method::GET, "/", |_req: Request| async { "public" });
    /// # let _ = app;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Panics
    ///
    /// Same as [`on`](Router::on).
    pub fn handle(mut self, method: Method, path: &str, handler: BoxedHandler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}
