//! # gatehouse
//!
//! Request gatekeeping for HTTP handlers. A handful of filters, one way to
//! chain them, and nothing that guesses on your behalf.
//!
//! ## The contract
//!
//! Every filter is a [`Stage`](middleware::Stage): it looks at a request and
//! either calls the next handler or answers `403 Forbidden` with an empty
//! body. A [`Chain`](middleware::Chain) runs stages in the order they were
//! appended and is a stage itself.
//!
//! - [`HeaderFilter`](middleware::HeaderFilter) — required header values
//! - [`HmacFilter`](middleware::HmacFilter) — body signatures (HMAC-SHA256,
//!   or Github's `X-Hub-Signature`)
//! - [`IpFilter`](middleware::IpFilter) — source address in CIDR ranges
//!
//! Broken configuration fails when the chain is assembled, never at request
//! time. A request that cannot be checked (unreadable body, malformed
//! signature, unparseable address) is denied and logged through `tracing`.
//!
//! What gatehouse does not do: TLS, sessions, token issuance, or boolean
//! policy beyond "all stages in order".
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gatehouse::middleware::{Chain, HeaderFilter, HeaderRequirement, HmacConfig, HmacFilter, IpFilter};
//! use gatehouse::{EnvSecrets, Request, Response, Router, Secret, Server};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gatehouse::Error> {
//!     let internal = Chain::new()
//!         .append(IpFilter::new(["10.0.0.0/8", "localhost"], None)?)
//!         .append(HeaderFilter::new(HeaderRequirement::from_pairs([("x-team", ["ops"])])?));
//!
//!     let webhooks = Chain::new().append(HmacFilter::with_secrets(
//!         HmacConfig::github(Secret::named("GITHUB_WEBHOOK_SECRET")),
//!         &EnvSecrets,
//!     )?);
//!
//!     let app = Router::new()
//!         .handle(Method::GET,  "/internal/stats", internal.apply(stats))
//!         .handle(Method::POST, "/hooks/github",   webhooks.apply(deploy));
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn stats(_req: Request) -> Response {
//!     Response::json(br#"{"up":true}"#.to_vec())
//! }
//!
//! async fn deploy(mut req: Request) -> Response {
//!     // The filter already read the body; it is still here.
//!     let payload = req.bytes().await.unwrap_or_default();
//!     Response::text(format!("{} bytes accepted", payload.len()))
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod secret;
mod server;

pub mod middleware;

pub use error::{BodyError, ConfigError, Error, ValidationError};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
pub use request::{Body, BoxError, Request};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use secret::{EnvSecrets, Secret, SecretProvider};
pub use server::Server;
