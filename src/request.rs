//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::error::BodyError;

/// A type-erased error coming out of a body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body stream carried by a [`Request`].
///
/// Boxed so that a live network body and a buffered replay can sit behind
/// the same type. Filters that read the body swap one for the other.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// An incoming HTTP request as seen by stages and handlers.
pub struct Request {
    inner: http::Request<Body>,
    remote_addr: Option<SocketAddr>,
    params: HashMap<String, String>,
}

impl Request {
    /// Wraps any `http::Request` whose body yields [`Bytes`].
    ///
    /// ```rust
    /// use bytes::Bytes;
    /// use http_body_util::Full;
    ///
    /// let req = gatehouse::Request::new(
    ///     http::Request::post("/hooks")
    ///         .header("x-key", "secret")
    ///         .body(Full::new(Bytes::from_static(b"payload")))
    ///         .unwrap(),
    /// );
    /// assert_eq!(req.header("X-Key"), Some("secret"));
    /// ```
    pub fn new<B>(req: http::Request<B>) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: req.map(boxed),
            remote_addr: None,
            params: HashMap::new(),
        }
    }

    pub(crate) fn from_hyper(
        req: hyper::Request<hyper::body::Incoming>,
        remote_addr: SocketAddr,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: req.map(boxed),
            remote_addr: Some(remote_addr),
            params,
        }
    }

    /// Sets the transport-reported peer address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { self.inner.method() }
    pub fn uri(&self) -> &Uri { self.inner.uri() }
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Returns the first value when the
    /// header repeats, and `None` for values that are not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)?.to_str().ok()
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Reads the whole body into memory and leaves an identical, replayable
    /// body in its place.
    ///
    /// Calling this again (from a later stage or the handler) returns the same
    /// bytes. On error the body is left empty.
    pub async fn bytes(&mut self) -> Result<Bytes, BodyError> {
        let body = std::mem::replace(self.inner.body_mut(), boxed(Empty::<Bytes>::new()));
        let bytes = body.collect().await.map_err(BodyError)?.to_bytes();
        *self.inner.body_mut() = boxed(Full::new(bytes.clone()));
        Ok(bytes)
    }

    /// Gives up the request view and returns the body stream.
    pub fn into_body(self) -> Body {
        self.inner.into_body()
    }
}

fn boxed<B>(body: B) -> Body
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}
