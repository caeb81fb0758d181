//! Source address filter.

use std::sync::Arc;

use http::header::HeaderName;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Stage;
use crate::middleware::cidr::{CidrSet, parse_candidate};
use crate::request::Request;
use crate::response::Response;

/// Lets a request through only when its source address is inside one of the
/// configured ranges; answers `403 Forbidden` otherwise.
///
/// The address is taken from the transport peer, or from a header when one
/// is configured (for deployments behind a proxy). Either way it must look
/// like `host:port`; see [`parse_candidate`].
#[derive(Clone, Debug)]
pub struct IpFilter {
    config: Arc<IpFilterConfig>,
}

#[derive(Debug)]
struct IpFilterConfig {
    networks: CidrSet,
    header: Option<HeaderName>,
}

impl IpFilter {
    /// Builds the filter. `header` of `None` or `Some("")` means the
    /// transport peer address is checked.
    pub fn new<I, S>(ranges: I, header: Option<&str>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let networks = CidrSet::parse(ranges)?;
        let header = header
            .filter(|h| !h.is_empty())
            .map(|h| HeaderName::try_from(h).map_err(|_| ConfigError::InvalidHeaderName(h.to_owned())))
            .transpose()?;

        info!(
            networks = networks.len(),
            header = ?header,
            "ip filter enabled"
        );

        Ok(Self { config: Arc::new(IpFilterConfig { networks, header }) })
    }

    pub fn networks(&self) -> &CidrSet {
        &self.config.networks
    }
}

impl IpFilterConfig {
    /// The raw address string this request is judged by.
    fn candidate(&self, req: &Request) -> Option<String> {
        match &self.header {
            Some(name) => req.headers().get(name)?.to_str().ok().map(str::to_owned),
            None => req.remote_addr().map(|addr| addr.to_string()),
        }
    }
}

impl Stage for IpFilter {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(IpGate { config: Arc::clone(&self.config), next })
    }
}

struct IpGate {
    config: Arc<IpFilterConfig>,
    next: BoxedHandler,
}

impl ErasedHandler for IpGate {
    fn call(&self, req: Request) -> BoxFuture {
        let raw = self.config.candidate(&req).unwrap_or_default();
        match parse_candidate(&raw) {
            Some(ip) if self.config.networks.contains(ip) => return self.next.call(req),
            Some(_) => warn!(ip = %raw, url = %req.uri(), "request denied: ip not permitted"),
            None => warn!(ip = %raw, url = %req.uri(), "request denied: invalid ip"),
        }
        Box::pin(async { Response::forbidden() })
    }
}
