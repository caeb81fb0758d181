//! gatehouse example: one route per filter, plus a chain of two.
//!
//! Run with:
//!   GITHUB_WEBHOOK_SECRET=ThisIsMySecret RUST_LOG=gatehouse=debug cargo run --example gate
//!
//! Try:
//!   curl -i http://localhost:3000/local                       # 200 from localhost
//!   curl -i http://localhost:3000/team                        # 403
//!   curl -i -H 'x-team: ops' http://localhost:3000/team       # 200
//!   curl -i -X POST http://localhost:3000/hooks/github \
//!        -H 'x-hub-signature: sha1=8c08e9b7e2bdb4d87982f40d6bf6d36c0d0caab4' \
//!        -d 'ThisIsARequest'                                  # 200
//!   curl -i -H 'x-team: ops' http://localhost:3000/ops        # 200 from localhost only

use gatehouse::middleware::{Chain, HeaderFilter, HeaderRequirement, HmacConfig, HmacFilter, IpFilter};
use gatehouse::{EnvSecrets, Error, Request, Response, Router, Secret, Server};
use http::Method;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let local = IpFilter::new(["localhost"], None)?;
    let team = HeaderFilter::new(HeaderRequirement::from_pairs([("x-team", ["ops"])])?);
    let github = HmacFilter::with_secrets(
        HmacConfig::github(Secret::named("GITHUB_WEBHOOK_SECRET")),
        &EnvSecrets,
    )?;

    let app = Router::new()
        .handle(Method::GET,  "/local",        Chain::new().append(local.clone()).apply(hello))
        .handle(Method::GET,  "/team",         Chain::new().append(team.clone()).apply(hello))
        .handle(Method::POST, "/hooks/github", Chain::new().append(github).apply(webhook))
        .handle(Method::GET,  "/ops",          Chain::assemble([
            Chain::new().append(local),
            Chain::new().append(team),
        ]).apply(hello));

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

async fn hello(_req: Request) -> &'static str {
    "Hi!"
}

// The HMAC filter read the body to check it; the handler reads it again.
async fn webhook(mut req: Request) -> Response {
    match req.bytes().await {
        Ok(body) => Response::text(format!("accepted {} bytes\n", body.len())),
        Err(_) => Response::status(http::StatusCode::BAD_REQUEST),
    }
}
